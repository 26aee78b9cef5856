//! Topic names used by the scheduler.

use serde::{Deserialize, Serialize};

/// Bus topics the scheduler consumes and publishes. Every name is
/// configurable; the defaults match the rest of the cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    /// Run-status tokens, consumed and published (retained).
    pub run_status: String,
    /// Queue document submissions.
    pub queue_submit: String,
    /// Queue document snapshot, published every tick (retained).
    pub queue_snapshot: String,
    /// Current startup priority counter, published every tick.
    pub next_startup_priority: String,
    /// Prefix of `<prefix>/<processBaseName>/<k>of<n>` completion reports.
    pub operation_finished: String,
    /// Prefix of `<prefix>/<k>of<n>` startup milestones.
    pub startup_milestone: String,
    /// Worker-role readiness announcements.
    pub screen_startup: String,
    /// Readiness checklist, published every tick (retained).
    pub screen_checklist: String,
    /// Prefix of `<prefix>/<origin>` fault events.
    pub fault: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            run_status: "run-status".to_string(),
            queue_submit: "operation-queue-submit".to_string(),
            queue_snapshot: "operation-queue-snapshot".to_string(),
            next_startup_priority: "next-startup-priority".to_string(),
            operation_finished: "operation-finished".to_string(),
            startup_milestone: "startup-milestone".to_string(),
            screen_startup: "screen-startup".to_string(),
            screen_checklist: "screen-checklist".to_string(),
            fault: "fault".to_string(),
        }
    }
}

impl Topics {
    /// Topic a worker publishes to when its operation finishes.
    pub fn operation_finished_topic(&self, process_base: &str, suffix: &str) -> String {
        format!("{}/{}/{}", self.operation_finished, process_base, suffix)
    }

    /// Topic a worker publishes its startup milestone to.
    pub fn startup_milestone_topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.startup_milestone, suffix)
    }

    pub fn fault_topic(&self, origin: &str) -> String {
        format!("{}/{}", self.fault, origin)
    }

    /// Filters covering every topic the scheduler consumes.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.run_status.clone(),
            self.queue_submit.clone(),
            format!("{}/+/+", self.operation_finished),
            format!("{}/+", self.startup_milestone),
            self.screen_startup.clone(),
        ]
    }
}
