//! Classification of bus messages the scheduler consumes.

use bytes::Bytes;
use fmc_core::bus::BusMessage;
use fmc_core::{RunStatus, Topics};
use tracing::warn;

/// An input to the scheduler, decoded from a bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A run-status token was published.
    RunStatus(RunStatus),
    /// A queue document (or JSON `null`) was submitted. Parsing is left to
    /// the scheduler so malformed payloads can be reported as faults.
    Submit(Bytes),
    /// `operation-finished/<process>/<kofn>`.
    OperationFinished { process: String, suffix: String },
    /// `startup-milestone/<kofn>` with the process base name as payload.
    StartupMilestone { process: String, suffix: String },
    /// A worker role announced it is up.
    ScreenStartup(String),
}

impl Inbound {
    /// Decode `message` against the configured topic names. Messages on
    /// foreign topics, and run statuses with unknown tokens, yield `None`.
    pub fn route(topics: &Topics, message: &BusMessage) -> Option<Self> {
        let topic = message.topic.as_str();

        if topic == topics.run_status {
            return match message.payload_str().parse::<RunStatus>() {
                Ok(status) => Some(Inbound::RunStatus(status)),
                Err(e) => {
                    warn!(payload = %message.payload_str(), error = %e, "Ignoring unknown run status");
                    None
                }
            };
        }

        if topic == topics.queue_submit {
            return Some(Inbound::Submit(message.payload.clone()));
        }

        if topic == topics.screen_startup {
            return Some(Inbound::ScreenStartup(
                message.payload_str().trim().to_string(),
            ));
        }

        if let Some(rest) = strip_prefix_level(topic, &topics.operation_finished) {
            let (process, suffix) = rest.split_once('/')?;
            if process.is_empty() || suffix.is_empty() || suffix.contains('/') {
                return None;
            }
            return Some(Inbound::OperationFinished {
                process: process.to_string(),
                suffix: suffix.to_string(),
            });
        }

        if let Some(suffix) = strip_prefix_level(topic, &topics.startup_milestone) {
            if suffix.is_empty() || suffix.contains('/') {
                return None;
            }
            return Some(Inbound::StartupMilestone {
                process: message.payload_str().trim().to_string(),
                suffix: suffix.to_string(),
            });
        }

        None
    }
}

/// `topic` below `prefix`, matching whole levels only.
fn strip_prefix_level<'a>(topic: &'a str, prefix: &str) -> Option<&'a str> {
    topic.strip_prefix(prefix)?.strip_prefix('/')
}
