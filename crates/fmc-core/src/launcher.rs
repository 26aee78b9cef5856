//! Session launcher trait and launch types.
//!
//! A launcher starts one isolated worker session per operation. Launching is
//! fire-and-forget: the scheduler never waits for the worker, it only learns
//! about progress from the bus.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::Result;
use crate::id::{RunIdentifier, SessionName};
use crate::operation::OperationKey;

/// Environment variable carrying the session name into the worker.
pub const ENV_SESSION: &str = "FMC_SESSION";
/// Environment variable carrying the operation name into the worker.
pub const ENV_OPERATION: &str = "FMC_OPERATION";
/// Environment variable carrying the run identifier into the worker.
pub const ENV_RUN_ID: &str = "FMC_RUN_ID";

/// The worker program a session runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProgram {
    /// Executable to run (e.g. `python3`).
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory for the session.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Append `-d` so the worker runs in debug mode.
    pub debug: bool,
}

impl WorkerProgram {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Full argument vector including the debug flag.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.args.clone();
        if self.debug {
            argv.push("-d".to_string());
        }
        argv
    }
}

/// Everything needed to start one worker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub name: SessionName,
    pub operation: OperationKey,
    pub run: RunIdentifier,
    pub program: WorkerProgram,
}

impl SessionSpec {
    pub fn new(operation: OperationKey, run: RunIdentifier, program: WorkerProgram) -> Self {
        Self {
            name: SessionName::new(&operation, &run),
            operation,
            run,
            program,
        }
    }

    /// Environment handed to the worker: the program's own variables plus
    /// the session identity.
    pub fn env(&self) -> HashMap<String, String> {
        let mut env = self.program.env.clone();
        env.insert(ENV_SESSION.to_string(), self.name.to_string());
        env.insert(ENV_OPERATION.to_string(), self.operation.to_string());
        env.insert(ENV_RUN_ID.to_string(), self.run.to_string());
        env
    }
}

/// Handle to a launched session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub name: SessionName,
    /// Launcher-specific identifier (e.g. a pid or screen session name).
    pub launcher_id: String,
    /// Name of the launcher that started the session.
    pub launcher_name: &'static str,
}

/// Trait for worker session launchers.
///
/// Implementations must return without waiting for the worker and must
/// accept concurrent calls for different session names.
pub trait SessionLauncher: Send + Sync {
    /// Name of this launcher.
    fn name(&self) -> &'static str;

    /// Start a new isolated session.
    fn launch(&self, spec: SessionSpec) -> Result<SessionHandle>;
}
