//! Outbound messages: queue snapshot, priority counter, checklist, run
//! status and fault events.

use chrono::{DateTime, Utc};
use fmc_core::bus::BusMessage;
use fmc_core::{QueueDocument, Result, RunStatus, Topics};
use serde::{Deserialize, Serialize};

use crate::checklist::ReadinessChecklist;

/// Fault report published on `<fault>/<component>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultEvent {
    /// Which internal path raised the fault.
    pub origin: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl FaultEvent {
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Builds the scheduler's outbound bus messages.
#[derive(Debug, Clone)]
pub struct Publisher {
    topics: Topics,
    component: String,
}

impl Publisher {
    pub fn new(topics: Topics, component: impl Into<String>) -> Self {
        Self {
            topics,
            component: component.into(),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Retained queue snapshot; JSON `null` when no run is loaded.
    pub fn snapshot(&self, document: Option<&QueueDocument>) -> Result<BusMessage> {
        let payload = match document {
            Some(doc) => doc.to_json()?,
            None => "null".to_string(),
        };
        Ok(BusMessage::retained(self.topics.queue_snapshot.clone(), payload))
    }

    pub fn next_startup_priority(&self, priority: u32) -> BusMessage {
        BusMessage::new(
            self.topics.next_startup_priority.clone(),
            priority.to_string(),
        )
    }

    pub fn checklist(&self, checklist: &ReadinessChecklist) -> Result<BusMessage> {
        Ok(BusMessage::retained(
            self.topics.screen_checklist.clone(),
            serde_json::to_string_pretty(checklist)?,
        ))
    }

    /// Retained run status.
    pub fn status(&self, status: &RunStatus) -> BusMessage {
        BusMessage::retained(self.topics.run_status.clone(), status.to_string())
    }

    pub fn fault(&self, fault: &FaultEvent) -> Result<BusMessage> {
        Ok(BusMessage::new(
            self.topics.fault_topic(&self.component),
            serde_json::to_vec(fault)?,
        ))
    }
}
