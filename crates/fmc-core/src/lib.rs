//! Core domain types and traits for the manufacturing cell scheduler.
//!
//! This crate contains:
//! - The operation queue document and its wire format
//! - Operation keys and completion states
//! - Run-status tokens and run identifiers
//! - Bus and session launcher traits
//! - Topic names

pub mod bus;
pub mod error;
pub mod id;
pub mod launcher;
pub mod operation;
pub mod queue;
pub mod status;
pub mod topics;

pub use error::{Error, Result};
pub use id::{RunIdentifier, SessionName};
pub use operation::{Completion, Operation, OperationKey, StartupGate};
pub use queue::{ProcessRequest, QueueDocument};
pub use status::{RunKind, RunStatus, StatusToken};
pub use topics::Topics;
