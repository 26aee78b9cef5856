//! Cell orchestrator - drives the scheduler from the bus and a fixed tick.
//!
//! The orchestrator is the single owner of the [`Scheduler`]. One task
//! alternates between poll ticks and inbound bus messages, so ticks never
//! overlap and callbacks never race a tick. Effects returned by the scheduler
//! are carried out in order before the next input is taken.

use fmc_config::{CellConfig, SchedulerConfig};
use fmc_core::bus::{BusMessage, LagHandler, MessageBus, TopicFilter};
use fmc_core::launcher::SessionLauncher;
use fmc_core::{Error, Result, SessionName};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::checklist::ReadinessChecklist;
use crate::inbound::Inbound;
use crate::scheduler::{Effect, RunMode, Scheduler};

const EVENT_CAPACITY: usize = 256;

/// Event emitted while the cell runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellEvent {
    ModeChanged { from: RunMode, to: RunMode },
    SessionLaunched { session: SessionName },
    LaunchFailed { session: SessionName, message: String },
    /// The scheduler's subscription fell behind the bus and skipped messages.
    /// A skipped completion or milestone leaves its process waiting.
    MessagesDropped { filter: String, skipped: u64 },
}

/// Owns the scheduler and wires it to the bus and the session launcher.
pub struct CellOrchestrator {
    scheduler: Scheduler,
    bus: Arc<dyn MessageBus>,
    launcher: Arc<dyn SessionLauncher>,
    poll_interval: Duration,
    inbox_capacity: usize,
    events: broadcast::Sender<CellEvent>,
}

impl CellOrchestrator {
    pub fn new(
        scheduler: Scheduler,
        bus: Arc<dyn MessageBus>,
        launcher: Arc<dyn SessionLauncher>,
        config: &SchedulerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            scheduler,
            bus,
            launcher,
            poll_interval: config.poll_interval,
            inbox_capacity: config.inbox_capacity.max(1),
            events,
        }
    }

    /// Build an orchestrator from a full cell configuration.
    pub fn from_config(
        config: &CellConfig,
        bus: Arc<dyn MessageBus>,
        launcher: Arc<dyn SessionLauncher>,
    ) -> Self {
        let scheduler = Scheduler::new(
            config.topics.clone(),
            config.launcher.worker.clone(),
            ReadinessChecklist::new(config.readiness.iter().cloned()),
        );
        Self::new(scheduler, bus, launcher, &config.scheduler)
    }

    /// Receive events from the orchestrator. Slow receivers miss events;
    /// the orchestrator never waits on them.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CellEvent> {
        self.events.subscribe()
    }

    /// Subscribe to the scheduler's topics and start the actor task.
    ///
    /// Subscriptions are in place when this returns, so nothing published
    /// afterwards is missed.
    pub fn spawn(self) -> Result<CellHandle> {
        let (inbox_tx, inbox_rx) = mpsc::channel(self.inbox_capacity);
        let mut forwarders = Vec::new();

        let events = self.events.clone();
        let on_lag: LagHandler = Arc::new(move |filter: &TopicFilter, skipped: u64| {
            error!(filter = %filter, skipped, "Scheduler missed bus messages");
            let _ = events.send(CellEvent::MessagesDropped {
                filter: filter.to_string(),
                skipped,
            });
        });

        for topic in self.scheduler.topics().subscriptions() {
            let filter: TopicFilter = topic.parse()?;
            let mut stream = self.bus.subscribe_with_lag(filter.clone(), on_lag.clone())?;
            let tx = inbox_tx.clone();
            forwarders.push(tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                debug!(filter = %filter, "Subscription ended");
            }));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let scheduler = self.run(inbox_rx, shutdown_rx).await;
            for forwarder in forwarders {
                forwarder.abort();
            }
            scheduler
        });

        Ok(CellHandle {
            inbox: inbox_tx,
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<BusMessage>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Scheduler {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(poll_interval = ?self.poll_interval, launcher = self.launcher.name(), "Cell orchestrator started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let before = self.scheduler.mode();
                    let effects = self.scheduler.poll();
                    self.apply(before, effects);
                }
                Some(message) = inbox.recv() => {
                    let Some(inbound) = Inbound::route(self.scheduler.topics(), &message) else {
                        continue;
                    };
                    let before = self.scheduler.mode();
                    let effects = self.scheduler.handle(inbound);
                    self.apply(before, effects);
                }
            }
        }

        info!("Cell orchestrator stopped");
        self.scheduler
    }

    /// Carry out effects in order, then settle a finished stop. `before` is
    /// the mode prior to the input that produced `effects`.
    fn apply(&mut self, before: RunMode, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Launch(spec) => {
                    let session = spec.name.clone();
                    match self.launcher.launch(spec) {
                        Ok(handle) => {
                            debug!(session = %handle.name, launcher_id = %handle.launcher_id, "Session launched");
                            self.emit(CellEvent::SessionLaunched { session });
                        }
                        Err(e) => {
                            // Not fed back: the operation stays running and
                            // only its own process stalls.
                            error!(session = %session, error = %e, "Failed to launch worker session");
                            self.emit(CellEvent::LaunchFailed {
                                session,
                                message: e.to_string(),
                            });
                        }
                    }
                }
                Effect::Publish(message) => {
                    let topic = message.topic.clone();
                    if let Err(e) = self.bus.publish(message) {
                        warn!(topic = %topic, error = %e, "Failed to publish");
                    }
                }
            }
        }

        let mid = self.scheduler.mode();
        if mid != before {
            self.emit(CellEvent::ModeChanged {
                from: before,
                to: mid,
            });
        }
        if mid == RunMode::Stopping {
            self.scheduler.finish_stop();
            self.emit(CellEvent::ModeChanged {
                from: mid,
                to: self.scheduler.mode(),
            });
        }
    }

    fn emit(&self, event: CellEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Handle to a running orchestrator.
pub struct CellHandle {
    inbox: mpsc::Sender<BusMessage>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Scheduler>,
}

impl CellHandle {
    /// Hand a message straight to the scheduler, bypassing the bus.
    pub async fn deliver(&self, message: BusMessage) -> Result<()> {
        self.inbox
            .send(message)
            .await
            .map_err(|_| Error::Internal("orchestrator is not running".to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the actor and return the scheduler's final state.
    pub async fn shutdown(self) -> Result<Scheduler> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|e| Error::Internal(format!("orchestrator task failed: {}", e)))
    }
}
