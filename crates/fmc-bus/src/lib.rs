//! In-process retained-topic message broker.
//!
//! Fans published messages out to every matching subscriber and keeps the
//! last retained message per topic so late subscribers see current state.
//! External collaborators reach it through the server's WebSocket bridge.

use fmc_core::bus::{BusMessage, LagHandler, MessageBus, TopicFilter};
use fmc_core::{Error, Result};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default per-subscriber buffer.
pub const DEFAULT_CAPACITY: usize = 1024;

pub struct Broker {
    retained: Mutex<BTreeMap<String, BusMessage>>,
    sender: broadcast::Sender<BusMessage>,
}

impl Broker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            retained: Mutex::new(BTreeMap::new()),
            sender,
        }
    }

    fn lock_retained(&self) -> Result<MutexGuard<'_, BTreeMap<String, BusMessage>>> {
        self.retained
            .lock()
            .map_err(|_| Error::Bus("retained store poisoned".to_string()))
    }

    /// The retained message on `topic`, if any.
    pub fn retained(&self, topic: &str) -> Result<Option<BusMessage>> {
        Ok(self.lock_retained()?.get(topic).cloned())
    }

    /// Every retained message matching `filter`, in topic order.
    pub fn retained_matching(&self, filter: &TopicFilter) -> Result<Vec<BusMessage>> {
        Ok(self
            .lock_retained()?
            .values()
            .filter(|m| filter.matches(&m.topic))
            .cloned()
            .collect())
    }

    fn subscribe_inner(
        &self,
        filter: TopicFilter,
        on_lag: Option<LagHandler>,
    ) -> Result<BoxStream<'static, BusMessage>> {
        let retained = self.lock_retained()?;
        let receiver = self.sender.subscribe();
        let backlog: VecDeque<BusMessage> = retained
            .values()
            .filter(|m| filter.matches(&m.topic))
            .cloned()
            .collect();
        drop(retained);

        let stream = stream::unfold(
            (backlog, receiver, filter, on_lag),
            |(mut backlog, mut receiver, filter, on_lag)| async move {
                if let Some(message) = backlog.pop_front() {
                    return Some((message, (backlog, receiver, filter, on_lag)));
                }
                loop {
                    match receiver.recv().await {
                        Ok(message) if filter.matches(&message.topic) => {
                            return Some((message, (backlog, receiver, filter, on_lag)));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(filter = %filter, skipped, "Subscriber lagged, messages dropped");
                            if let Some(on_lag) = &on_lag {
                                on_lag(&filter, skipped);
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(stream.boxed())
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageBus for Broker {
    fn publish(&self, message: BusMessage) -> Result<()> {
        // Holding the lock across the send keeps retained replay and live
        // delivery in one order for new subscribers.
        let mut retained = self.lock_retained()?;
        if message.retain {
            if message.payload.is_empty() {
                retained.remove(&message.topic);
            } else {
                retained.insert(message.topic.clone(), message.clone());
            }
        }
        debug!(topic = %message.topic, bytes = message.payload.len(), retain = message.retain, "Publish");
        // No subscribers is not an error.
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self, filter: TopicFilter) -> Result<BoxStream<'static, BusMessage>> {
        self.subscribe_inner(filter, None)
    }

    fn subscribe_with_lag(
        &self,
        filter: TopicFilter,
        on_lag: LagHandler,
    ) -> Result<BoxStream<'static, BusMessage>> {
        self.subscribe_inner(filter, Some(on_lag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn filter(s: &str) -> TopicFilter {
        s.parse().unwrap()
    }

    async fn next(stream: &mut BoxStream<'static, BusMessage>) -> BusMessage {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
    }

    #[tokio::test]
    async fn test_live_delivery_respects_filter() {
        let broker = Broker::default();
        let mut sub = broker.subscribe(filter("operation-finished/+/+")).unwrap();

        broker
            .publish(BusMessage::new("run-status", "Stopped"))
            .unwrap();
        broker
            .publish(BusMessage::new("operation-finished/A/1of2", ""))
            .unwrap();

        let msg = next(&mut sub).await;
        assert_eq!(msg.topic, "operation-finished/A/1of2");
    }

    #[tokio::test]
    async fn test_retained_replay() {
        let broker = Broker::default();
        broker
            .publish(BusMessage::retained("run-status", "RealRun/x"))
            .unwrap();
        broker
            .publish(BusMessage::retained("run-status", "Stopped/x"))
            .unwrap();
        broker
            .publish(BusMessage::new("screen-startup", "urHandler"))
            .unwrap();

        let mut sub = broker.subscribe(filter("#")).unwrap();
        let msg = next(&mut sub).await;
        assert_eq!(msg.topic, "run-status");
        assert_eq!(msg.payload_str(), "Stopped/x");

        broker
            .publish(BusMessage::new("screen-startup", "PLCHandler"))
            .unwrap();
        let msg = next(&mut sub).await;
        assert_eq!(msg.payload_str(), "PLCHandler");
    }

    #[tokio::test]
    async fn test_empty_retained_payload_clears_topic() {
        let broker = Broker::default();
        broker
            .publish(BusMessage::retained("operation-queue-snapshot", "null"))
            .unwrap();
        assert!(broker.retained("operation-queue-snapshot").unwrap().is_some());

        broker
            .publish(BusMessage::retained("operation-queue-snapshot", ""))
            .unwrap();
        assert!(broker.retained("operation-queue-snapshot").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retained_matching() {
        let broker = Broker::default();
        broker
            .publish(BusMessage::retained("fault/scheduler", "{}"))
            .unwrap();
        broker
            .publish(BusMessage::retained("fault/launcher", "{}"))
            .unwrap();
        broker
            .publish(BusMessage::retained("run-status", "Stopped"))
            .unwrap();

        let faults = broker.retained_matching(&filter("fault/+")).unwrap();
        let topics: Vec<_> = faults.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, vec!["fault/launcher", "fault/scheduler"]);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_reports_skipped() {
        let broker = Broker::new(2);
        let skipped = Arc::new(Mutex::new(Vec::new()));
        let record = skipped.clone();
        let mut sub = broker
            .subscribe_with_lag(
                filter("screen-startup"),
                Arc::new(move |f: &TopicFilter, n: u64| record.lock().unwrap().push((f.to_string(), n))),
            )
            .unwrap();

        for role in ["a", "b", "c", "d", "e"] {
            broker.publish(BusMessage::new("screen-startup", role)).unwrap();
        }

        assert_eq!(next(&mut sub).await.payload_str(), "d");
        assert_eq!(next(&mut sub).await.payload_str(), "e");
        assert_eq!(
            *skipped.lock().unwrap(),
            vec![("screen-startup".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broker = Broker::new(4);
        assert_eq!(broker.subscriber_count(), 0);
        broker.publish(BusMessage::new("anything", "x")).unwrap();
    }
}
