//! Simulated launcher for quick-simulation runs and dry runs.
//!
//! No worker is started. Instead a background task plays the worker's side
//! of the protocol: first operations announce their startup milestone, then
//! every operation reports that it finished.

use bytes::Bytes;
use fmc_config::SimulationConfig;
use fmc_core::Topics;
use fmc_core::bus::{BusMessage, MessageBus};
use fmc_core::launcher::{SessionHandle, SessionLauncher, SessionSpec};
use fmc_core::{Error, Result, SessionName};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tracing::{debug, warn};

pub struct SimulatedLauncher {
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    timing: SimulationConfig,
    launched: Mutex<Vec<SessionName>>,
}

impl SimulatedLauncher {
    pub fn new(bus: Arc<dyn MessageBus>, topics: Topics, timing: SimulationConfig) -> Self {
        Self {
            bus,
            topics,
            timing,
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Sessions launched so far, in launch order.
    pub fn launched(&self) -> Vec<SessionName> {
        self.launched
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }
}

impl SessionLauncher for SimulatedLauncher {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn launch(&self, spec: SessionSpec) -> Result<SessionHandle> {
        self.launched
            .lock()
            .map_err(|_| Error::Internal("launch log poisoned".to_string()))?
            .push(spec.name.clone());

        let bus = self.bus.clone();
        let key = spec.operation.clone();
        let milestone = key
            .is_first()
            .then(|| self.topics.startup_milestone_topic(&key.suffix()));
        let finished = self
            .topics
            .operation_finished_topic(&key.process, &key.suffix());
        let timing = self.timing.clone();

        tokio::spawn(async move {
            if let Some(topic) = milestone {
                sleep(timing.startup_delay).await;
                debug!(operation = %key, "Simulated startup milestone");
                if let Err(e) = bus.publish(BusMessage::new(topic, key.process.clone())) {
                    warn!(operation = %key, error = %e, "Failed to publish startup milestone");
                }
            }
            sleep(timing.operation_delay).await;
            debug!(operation = %key, "Simulated operation finished");
            if let Err(e) = bus.publish(BusMessage::new(finished, Bytes::new())) {
                warn!(operation = %key, error = %e, "Failed to publish completion");
            }
        });

        Ok(SessionHandle {
            launcher_id: format!("simulated:{}", spec.name),
            name: spec.name,
            launcher_name: self.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmc_bus::Broker;
    use fmc_core::RunIdentifier;
    use fmc_core::launcher::WorkerProgram;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    fn make_spec(op: &str) -> SessionSpec {
        SessionSpec::new(
            op.parse().unwrap(),
            RunIdentifier::new("sim-run"),
            WorkerProgram::default(),
        )
    }

    fn fast() -> SimulationConfig {
        SimulationConfig {
            startup_delay: Duration::from_millis(1),
            operation_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_first_operation_reports_milestone_then_finish() {
        let broker = Arc::new(Broker::default());
        let mut sub = broker.subscribe("#".parse().unwrap()).unwrap();
        let launcher = SimulatedLauncher::new(broker.clone(), Topics::default(), fast());

        let handle = launcher.launch(make_spec("A_1of2")).unwrap();
        assert_eq!(handle.launcher_id, "simulated:A_1of2~sim-run");

        let first = timeout(Duration::from_secs(1), sub.next()).await.unwrap().unwrap();
        assert_eq!(first.topic, "startup-milestone/1of2");
        assert_eq!(first.payload_str(), "A");

        let second = timeout(Duration::from_secs(1), sub.next()).await.unwrap().unwrap();
        assert_eq!(second.topic, "operation-finished/A/1of2");
        assert_eq!(launcher.launched().len(), 1);
    }

    #[tokio::test]
    async fn test_later_operation_only_finishes() {
        let broker = Arc::new(Broker::default());
        let mut sub = broker.subscribe("#".parse().unwrap()).unwrap();
        let launcher = SimulatedLauncher::new(broker.clone(), Topics::default(), fast());

        launcher.launch(make_spec("A_2of2")).unwrap();

        let msg = timeout(Duration::from_secs(1), sub.next()).await.unwrap().unwrap();
        assert_eq!(msg.topic, "operation-finished/A/2of2");
    }
}
