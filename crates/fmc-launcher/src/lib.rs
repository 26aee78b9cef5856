//! Worker session launchers for the manufacturing cell scheduler.
//!
//! Provides launcher implementations for starting one worker per operation:
//! - GNU screen (production cells)
//! - Plain child processes
//! - Simulated workers (quick simulation, dry runs)

pub mod process;
pub mod screen;
pub mod simulated;

use fmc_config::{LauncherConfig, LauncherKind};
use fmc_core::Topics;
use fmc_core::bus::MessageBus;
use std::sync::Arc;

pub use fmc_core::launcher::{SessionHandle, SessionLauncher, SessionSpec, WorkerProgram};
pub use process::ProcessLauncher;
pub use screen::ScreenLauncher;
pub use simulated::SimulatedLauncher;

/// Build the launcher selected by configuration. The simulated launcher
/// reports back over `bus`.
pub fn from_config(
    config: &LauncherConfig,
    bus: Arc<dyn MessageBus>,
    topics: &Topics,
) -> Arc<dyn SessionLauncher> {
    match config.kind {
        LauncherKind::Screen => Arc::new(ScreenLauncher::from_config(config)),
        LauncherKind::Process => Arc::new(ProcessLauncher::new()),
        LauncherKind::Simulated => Arc::new(SimulatedLauncher::new(
            bus,
            topics.clone(),
            config.simulation.clone(),
        )),
    }
}

/// Quote a string for POSIX shells.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
