//! The process-queue scheduler state machine.
//!
//! [`Scheduler`] owns the queue document, the startup priority counter and the
//! run mode. It performs no I/O: every entry point returns the [`Effect`]s the
//! caller must carry out (worker launches and bus publishes), in order. The
//! [`CellOrchestrator`](crate::CellOrchestrator) is the only caller in a
//! running cell.
//!
//! Per tick, processes are scanned in document order and operations in part
//! order. A process launches at most one operation per tick and never has more
//! than one running. A first operation starts only on a tick where the shared
//! startup priority counter equals its priority; later operations start only
//! once the first operation's startup tasks are complete. A tick that finds
//! nothing running or launchable ends the run.

use derive_more::Display;
use fmc_core::bus::BusMessage;
use fmc_core::launcher::{SessionSpec, WorkerProgram};
use fmc_core::{
    Completion, Error, OperationKey, QueueDocument, Result, RunKind, RunStatus, StatusToken,
    Topics,
};
use tracing::{debug, error, info, warn};

use crate::checklist::ReadinessChecklist;
use crate::inbound::Inbound;
use crate::publisher::{FaultEvent, Publisher};

/// Name the scheduler uses as the origin of its own status and fault messages.
pub const COMPONENT: &str = "scheduler";

/// Comment attached to the running token when a run is confirmed.
const CONFIRMED: &str = "confirmed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Idle,
    /// A start was requested; waiting for a queue document.
    Starting(RunKind),
    Active(RunKind),
    /// Terminal status published; returns to `Idle` via
    /// [`Scheduler::finish_stop`].
    Stopping,
}

/// Why a run was terminated. Published as `Stopped/scheduler/<origin>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StopOrigin {
    #[display("run-complete")]
    RunComplete,
    #[display("fault")]
    Fault,
    #[display("empty-queue")]
    EmptyQueue,
    #[display("malformed-submission")]
    MalformedSubmission,
}

/// Work the caller must perform on the scheduler's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start one worker session. Fire-and-forget.
    Launch(SessionSpec),
    Publish(BusMessage),
}

/// Result of scanning the document once.
struct Scan {
    launches: Vec<OperationKey>,
    /// Operations running or launched during the scan.
    active: usize,
}

pub struct Scheduler {
    publisher: Publisher,
    program: WorkerProgram,
    mode: RunMode,
    document: Option<QueueDocument>,
    next_startup_priority: u32,
    checklist: ReadinessChecklist,
}

impl Scheduler {
    pub fn new(topics: Topics, program: WorkerProgram, checklist: ReadinessChecklist) -> Self {
        Self {
            publisher: Publisher::new(topics, COMPONENT),
            program,
            mode: RunMode::Idle,
            document: None,
            next_startup_priority: 1,
            checklist,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn document(&self) -> Option<&QueueDocument> {
        self.document.as_ref()
    }

    pub fn next_startup_priority(&self) -> u32 {
        self.next_startup_priority
    }

    pub fn checklist(&self) -> &ReadinessChecklist {
        &self.checklist
    }

    pub fn topics(&self) -> &Topics {
        self.publisher.topics()
    }

    /// Dispatch a decoded bus message to its handler.
    pub fn handle(&mut self, inbound: Inbound) -> Vec<Effect> {
        match inbound {
            Inbound::RunStatus(status) => self.on_run_status(&status),
            Inbound::Submit(payload) => self.submit_queue(&payload),
            Inbound::OperationFinished { process, suffix } => {
                self.on_operation_finished(&process, &suffix);
                Vec::new()
            }
            Inbound::StartupMilestone { process, suffix } => {
                self.on_startup_tasks_complete(&process, &suffix)
            }
            Inbound::ScreenStartup(role) => {
                self.checklist.mark_ready(&role);
                Vec::new()
            }
        }
    }

    pub fn on_run_status(&mut self, status: &RunStatus) -> Vec<Effect> {
        match status.token {
            StatusToken::Starting(kind) => {
                if let RunMode::Active(active) = self.mode {
                    warn!(requested = ?kind, active = ?active, "Ignoring start request while a run is active");
                    return Vec::new();
                }
                info!(kind = ?kind, "Run starting; waiting for operation queue");
                self.mode = RunMode::Starting(kind);
                Vec::new()
            }
            StatusToken::Running(kind) => {
                if matches!(self.mode, RunMode::Starting(_)) && self.document.is_some() {
                    info!(kind = ?kind, "Run confirmed externally");
                    self.mode = RunMode::Active(kind);
                } else {
                    debug!(kind = ?kind, mode = ?self.mode, "Ignoring running status");
                }
                Vec::new()
            }
            StatusToken::Stopped => {
                if self.mode == RunMode::Idle && self.document.is_none() {
                    return Vec::new();
                }
                info!(origin = ?status.origin, "Run stopped; clearing operation queue");
                self.mode = RunMode::Idle;
                self.document = None;
                let mut effects = Vec::new();
                self.push_snapshot(&mut effects);
                effects
            }
        }
    }

    /// Ingest a submitted queue document. Only accepted while starting.
    pub fn submit_queue(&mut self, payload: &[u8]) -> Vec<Effect> {
        if !matches!(self.mode, RunMode::Starting(_)) {
            warn!(mode = ?self.mode, "Ignoring queue submission outside a starting run");
            return Vec::new();
        }

        let doc = match QueueDocument::from_json(payload) {
            Ok(Some(doc)) if !doc.is_empty() => doc,
            Ok(_) => {
                warn!("Run started with an empty operation queue");
                return self.abort_submission(StopOrigin::EmptyQueue, None);
            }
            Err(e) => return self.abort_submission(StopOrigin::MalformedSubmission, Some(e)),
        };

        if self
            .document
            .as_ref()
            .is_some_and(|live| live.run_identifier == doc.run_identifier)
        {
            debug!(run_id = %doc.run_identifier, "Ignoring resubmission of the current run");
            return Vec::new();
        }

        let gaps = doc.priority_gaps();
        if !gaps.is_empty() {
            warn!(run_id = %doc.run_identifier, ?gaps, "Startup priorities leave gaps; later processes may never start");
        }

        info!(
            run_id = %doc.run_identifier,
            processes = doc.processes.len(),
            operations = doc.operations().count(),
            "Accepted operation queue"
        );
        self.next_startup_priority = 1;
        self.document = Some(doc);

        let mut effects = Vec::new();
        self.push_snapshot(&mut effects);
        effects
    }

    /// One poll tick.
    pub fn poll(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();

        if let RunMode::Starting(kind) = self.mode {
            if self.document.is_some() {
                info!(kind = ?kind, "Run confirmed");
                self.mode = RunMode::Active(kind);
                let status = RunStatus::new(StatusToken::Running(kind), COMPONENT, CONFIRMED);
                effects.push(Effect::Publish(self.publisher.status(&status)));
            }
        }

        if matches!(self.mode, RunMode::Active(_)) {
            match self.scan() {
                Ok(scan) => {
                    if let Some(doc) = &self.document {
                        for key in scan.launches {
                            info!(operation = %key, run_id = %doc.run_identifier, "Launching operation");
                            effects.push(Effect::Launch(SessionSpec::new(
                                key,
                                doc.run_identifier.clone(),
                                self.program.clone(),
                            )));
                        }
                    }

                    if scan.active == 0 {
                        if self.document.as_ref().is_some_and(|doc| !doc.is_finished()) {
                            warn!(
                                next_startup_priority = self.next_startup_priority,
                                "No operation can start; ending run with unfinished work"
                            );
                        } else {
                            info!("Every operation finished; stopping run");
                        }
                        effects.extend(self.stop(StopOrigin::RunComplete));
                    }
                }
                Err(e) => effects.extend(self.fail(StopOrigin::Fault, &e)),
            }
        }

        self.push_snapshot(&mut effects);
        effects.push(Effect::Publish(
            self.publisher.next_startup_priority(self.next_startup_priority),
        ));
        match self.publisher.checklist(&self.checklist) {
            Ok(msg) => effects.push(Effect::Publish(msg)),
            Err(e) => error!(error = %e, "Failed to encode readiness checklist"),
        }

        effects
    }

    /// Completion callback. Unconditional and idempotent.
    pub fn on_operation_finished(&mut self, process: &str, suffix: &str) {
        let key = match OperationKey::from_suffix(process, suffix) {
            Ok(key) => key,
            Err(e) => {
                debug!(process, suffix, error = %e, "Ignoring completion with invalid operation");
                return;
            }
        };

        match self.document.as_mut().and_then(|doc| doc.operation_mut(&key)) {
            Some(op) => {
                if op.complete == Completion::Done {
                    debug!(operation = %key, "Duplicate completion");
                } else {
                    info!(operation = %key, "Operation finished");
                }
                op.mark_done();
            }
            None => debug!(operation = %key, "Ignoring completion for unknown operation"),
        }
    }

    /// Startup-milestone callback. Opens the startup gate of the named first
    /// operation; misses are logged and ignored.
    pub fn on_startup_tasks_complete(&mut self, process: &str, suffix: &str) -> Vec<Effect> {
        let key = match OperationKey::from_suffix(process, suffix) {
            Ok(key) if key.is_first() => key,
            _ => {
                debug!(process, suffix, "Ignoring startup milestone for a non-first operation");
                return Vec::new();
            }
        };

        let gate = self
            .document
            .as_mut()
            .and_then(|doc| doc.operation_mut(&key))
            .and_then(|op| op.startup.as_mut());
        match gate {
            Some(gate) => {
                gate.tasks_complete = true;
                info!(operation = %key, priority = gate.priority, "Startup tasks complete");
            }
            None => {
                debug!(operation = %key, "Ignoring startup milestone for unknown operation");
                return Vec::new();
            }
        }

        let mut effects = Vec::new();
        self.push_snapshot(&mut effects);
        effects
    }

    /// Leave `Stopping` once the terminal status has been published.
    pub fn finish_stop(&mut self) {
        if self.mode == RunMode::Stopping {
            debug!("Run stopped");
            self.mode = RunMode::Idle;
        }
    }

    fn scan(&mut self) -> Result<Scan> {
        let mut scan = Scan {
            launches: Vec::new(),
            active: 0,
        };
        let Some(doc) = self.document.as_mut() else {
            return Ok(scan);
        };
        let next = &mut self.next_startup_priority;

        for process in &mut doc.processes {
            let gate = process
                .first()
                .ok_or_else(|| {
                    Error::MalformedDocument(format!("process '{}' has no first operation", process.name))
                })?
                .startup
                .ok_or_else(|| {
                    Error::MalformedDocument(format!(
                        "process '{}' has no startup priority",
                        process.name
                    ))
                })?;

            for op in &mut process.operations {
                if op.key.is_first() {
                    match op.complete {
                        Completion::NotStarted => {
                            if gate.priority == *next {
                                op.mark_running();
                                scan.launches.push(op.key.clone());
                                scan.active += 1;
                                break;
                            }
                        }
                        Completion::Running => {
                            scan.active += 1;
                            if gate.tasks_complete {
                                advance(next, gate.priority);
                            }
                            break;
                        }
                        Completion::Done => {}
                    }
                } else {
                    if !gate.tasks_complete {
                        break;
                    }
                    match op.complete {
                        Completion::NotStarted => {
                            op.mark_running();
                            scan.launches.push(op.key.clone());
                            scan.active += 1;
                            break;
                        }
                        Completion::Running => {
                            scan.active += 1;
                            break;
                        }
                        Completion::Done => {}
                    }
                }
            }
        }

        Ok(scan)
    }

    /// Publish the terminal status and drop the document.
    fn stop(&mut self, origin: StopOrigin) -> Vec<Effect> {
        self.mode = RunMode::Stopping;
        self.document = None;
        let status = RunStatus::new(StatusToken::Stopped, COMPONENT, origin.to_string());
        vec![Effect::Publish(self.publisher.status(&status))]
    }

    /// Report a fault and stop the run.
    fn fail(&mut self, origin: StopOrigin, err: &Error) -> Vec<Effect> {
        error!(origin = %origin, error = %err, "Scheduler fault; stopping run");
        let mut effects = Vec::new();
        match self
            .publisher
            .fault(&FaultEvent::new(origin.to_string(), err.to_string()))
        {
            Ok(msg) => effects.push(Effect::Publish(msg)),
            Err(e) => error!(error = %e, "Failed to encode fault event"),
        }
        effects.extend(self.stop(origin));
        effects
    }

    /// Reject a submission: stop immediately and go straight back to idle.
    fn abort_submission(&mut self, origin: StopOrigin, err: Option<Error>) -> Vec<Effect> {
        let mut effects = match err {
            Some(e) => self.fail(origin, &e),
            None => self.stop(origin),
        };
        self.finish_stop();
        self.push_snapshot(&mut effects);
        effects
    }

    fn push_snapshot(&self, effects: &mut Vec<Effect>) {
        match self.publisher.snapshot(self.document.as_ref()) {
            Ok(msg) => effects.push(Effect::Publish(msg)),
            Err(e) => error!(error = %e, "Failed to encode queue snapshot"),
        }
    }
}

/// Move the counter past `priority`. Never moves it backwards.
fn advance(next: &mut u32, priority: u32) {
    let target = priority.saturating_add(1);
    if target > *next {
        info!(from = *next, to = target, "Next startup priority");
        *next = target;
    }
}
