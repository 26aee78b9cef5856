//! Message bus trait and message types.
//!
//! The bus is a retained-topic publish/subscribe transport. Topics are
//! `/`-separated; subscriptions use MQTT-style filters where `+` matches one
//! level and a trailing `#` matches any remaining levels.

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::{Error, Result};

/// A message on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Retained messages are replayed to late subscribers.
    pub retain: bool,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    pub fn retained(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            retain: true,
            ..Self::new(topic, payload)
        }
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Topic levels.
    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.topic.split('/')
    }
}

/// A subscription filter such as `operation-finished/+/+` or `fault/#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicFilter(String);

impl TopicFilter {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `topic` is matched by this filter.
    pub fn matches(&self, topic: &str) -> bool {
        let mut topic_levels = topic.split('/');
        for level in self.0.split('/') {
            match level {
                "#" => return true,
                "+" => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                exact => {
                    if topic_levels.next() != Some(exact) {
                        return false;
                    }
                }
            }
        }
        topic_levels.next().is_none()
    }
}

impl FromStr for TopicFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidInput("empty topic filter".to_string()));
        }
        let levels: Vec<&str> = s.split('/').collect();
        for (idx, level) in levels.iter().enumerate() {
            let wildcard = level.contains('#') || level.contains('+');
            let valid = match *level {
                "#" => idx == levels.len() - 1,
                "+" => true,
                _ => !wildcard,
            };
            if !valid {
                return Err(Error::InvalidInput(format!("invalid topic filter: {}", s)));
            }
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for TopicFilter {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TopicFilter> for String {
    fn from(filter: TopicFilter) -> Self {
        filter.0
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Called with the subscription's filter and the number of messages a slow
/// subscriber skipped.
pub type LagHandler = Arc<dyn Fn(&TopicFilter, u64) + Send + Sync>;

/// Trait for bus transports.
///
/// Publishing is fire-and-forget and must not block the caller.
pub trait MessageBus: Send + Sync {
    /// Publish a message.
    fn publish(&self, message: BusMessage) -> Result<()>;

    /// Subscribe to every topic matching `filter`. Retained messages that
    /// match are delivered first.
    fn subscribe(&self, filter: TopicFilter) -> Result<BoxStream<'static, BusMessage>>;

    /// Like [`subscribe`](Self::subscribe), but `on_lag` is told whenever the
    /// subscriber falls behind and messages are skipped. Transports that never
    /// drop messages can keep the default.
    fn subscribe_with_lag(
        &self,
        filter: TopicFilter,
        on_lag: LagHandler,
    ) -> Result<BoxStream<'static, BusMessage>> {
        let _ = on_lag;
        self.subscribe(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(s: &str) -> TopicFilter {
        s.parse().unwrap()
    }

    #[test]
    fn test_exact_match() {
        assert!(filter("run-status").matches("run-status"));
        assert!(!filter("run-status").matches("run-status/x"));
        assert!(!filter("run-status/x").matches("run-status"));
    }

    #[test]
    fn test_single_level_wildcard() {
        let f = filter("operation-finished/+/+");
        assert!(f.matches("operation-finished/A/1of2"));
        assert!(!f.matches("operation-finished/A"));
        assert!(!f.matches("operation-finished/A/1of2/extra"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let f = filter("fault/#");
        assert!(f.matches("fault/scheduler"));
        assert!(f.matches("fault/a/b/c"));
        assert!(f.matches("fault"));
        assert!(!f.matches("faults/x"));
        assert!(filter("#").matches("anything/at/all"));
    }

    #[test]
    fn test_invalid_filters() {
        assert!("".parse::<TopicFilter>().is_err());
        assert!("a/#/b".parse::<TopicFilter>().is_err());
        assert!("a/b+".parse::<TopicFilter>().is_err());
        assert!("a/#x".parse::<TopicFilter>().is_err());
    }

    #[test]
    fn test_payload_str() {
        let msg = BusMessage::retained("screen-startup", "urHandler");
        assert!(msg.retain);
        assert_eq!(msg.payload_str(), "urHandler");
        assert_eq!(msg.levels().collect::<Vec<_>>(), vec!["screen-startup"]);
    }
}
