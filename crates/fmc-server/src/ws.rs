//! WebSocket bridge to the message broker.
//!
//! External collaborators (the operator UI, hardware handlers, workers) speak
//! JSON frames over `/ws`:
//!
//! ```json
//! {"type": "subscribe", "filter": "operation-finished/#"}
//! {"type": "unsubscribe", "filter": "operation-finished/#"}
//! {"type": "publish", "topic": "startup-milestone/1of2", "payload": "A", "retain": false}
//! ```
//!
//! and receive `subscribed`, `unsubscribed`, `message` and `error` frames.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use fmc_bus::Broker;
use fmc_core::bus::{BusMessage, MessageBus, TopicFilter};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::AppState;

/// Outgoing frames buffered per connection.
const OUTBOX_CAPACITY: usize = 256;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broker))
}

async fn handle_socket(socket: WebSocket, broker: Arc<Broker>) {
    info!("WebSocket connection established");

    let (mut sink, mut stream) = socket.split();
    let (outbox, mut outbox_rx) = mpsc::channel::<WsMessage>(OUTBOX_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = BridgeSession::new(broker, outbox.clone());

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<WsCommand>(&text) {
                    Ok(cmd) => session.handle(cmd),
                    Err(e) => Some(WsMessage::Error {
                        message: format!("invalid frame: {}", e),
                    }),
                };
                if let Some(reply) = reply {
                    if outbox.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket connection closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    session.close();
    drop(outbox);
    let _ = writer.await;
}

/// Subscriptions held by one connection.
struct BridgeSession {
    broker: Arc<Broker>,
    outbox: mpsc::Sender<WsMessage>,
    subscriptions: HashMap<TopicFilter, JoinHandle<()>>,
}

impl BridgeSession {
    fn new(broker: Arc<Broker>, outbox: mpsc::Sender<WsMessage>) -> Self {
        Self {
            broker,
            outbox,
            subscriptions: HashMap::new(),
        }
    }

    /// Apply one client command, returning the reply frame.
    fn handle(&mut self, cmd: WsCommand) -> Option<WsMessage> {
        let result = match cmd {
            WsCommand::Subscribe { filter } => self.subscribe(filter),
            WsCommand::Unsubscribe { filter } => self.unsubscribe(filter),
            WsCommand::Publish {
                topic,
                payload,
                retain,
            } => self.publish(topic, payload, retain),
        };
        match result {
            Ok(reply) => reply,
            Err(message) => Some(WsMessage::Error { message }),
        }
    }

    fn subscribe(&mut self, filter: String) -> Result<Option<WsMessage>, String> {
        let parsed: TopicFilter = filter.parse().map_err(|e| format!("{}", e))?;
        if self.subscriptions.contains_key(&parsed) {
            return Ok(Some(WsMessage::Subscribed { filter }));
        }

        let mut messages = self
            .broker
            .subscribe(parsed.clone())
            .map_err(|e| e.to_string())?;
        let outbox = self.outbox.clone();
        let task = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                if outbox.send(WsMessage::from(message)).await.is_err() {
                    break;
                }
            }
        });

        info!(filter = %parsed, "Client subscribed");
        self.subscriptions.insert(parsed, task);
        Ok(Some(WsMessage::Subscribed { filter }))
    }

    fn unsubscribe(&mut self, filter: String) -> Result<Option<WsMessage>, String> {
        let parsed: TopicFilter = filter.parse().map_err(|e| format!("{}", e))?;
        match self.subscriptions.remove(&parsed) {
            Some(task) => {
                task.abort();
                info!(filter = %parsed, "Client unsubscribed");
                Ok(Some(WsMessage::Unsubscribed { filter }))
            }
            None => Err(format!("not subscribed to {}", filter)),
        }
    }

    fn publish(
        &mut self,
        topic: String,
        payload: String,
        retain: bool,
    ) -> Result<Option<WsMessage>, String> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(format!("cannot publish to '{}'", topic));
        }
        debug!(topic = %topic, retain, "Client published");
        let message = if retain {
            BusMessage::retained(topic, payload)
        } else {
            BusMessage::new(topic, payload)
        };
        self.broker.publish(message).map_err(|e| e.to_string())?;
        Ok(None)
    }

    fn close(&mut self) {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Subscribe {
        filter: String,
    },
    Unsubscribe {
        filter: String,
    },
    Publish {
        topic: String,
        #[serde(default)]
        payload: String,
        #[serde(default)]
        retain: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    Subscribed {
        filter: String,
    },
    Unsubscribed {
        filter: String,
    },
    Message {
        topic: String,
        payload: String,
        retain: bool,
    },
    Error {
        message: String,
    },
}

impl From<BusMessage> for WsMessage {
    fn from(message: BusMessage) -> Self {
        WsMessage::Message {
            payload: message.payload_str().into_owned(),
            topic: message.topic,
            retain: message.retain,
        }
    }
}
