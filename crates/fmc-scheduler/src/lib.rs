//! Process-queue scheduling for the manufacturing cell.
//!
//! [`Scheduler`] is the state machine that decides which operation of which
//! queued process runs next. [`CellOrchestrator`] owns it inside a single
//! task, feeding it bus messages and poll ticks and carrying out the launches
//! and publishes it asks for.

pub mod checklist;
pub mod inbound;
pub mod orchestrator;
pub mod publisher;
pub mod scheduler;

pub use checklist::ReadinessChecklist;
pub use inbound::Inbound;
pub use orchestrator::{CellEvent, CellHandle, CellOrchestrator};
pub use publisher::{FaultEvent, Publisher};
pub use scheduler::{Effect, RunMode, Scheduler, StopOrigin};
