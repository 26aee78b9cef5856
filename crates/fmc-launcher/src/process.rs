//! Plain child-process launcher.

use fmc_config::SessionVariables;
use fmc_core::launcher::{SessionHandle, SessionLauncher, SessionSpec};
use fmc_core::{Error, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Launches each worker as a direct child process. The child is not
/// supervised; it reports progress over the bus like any other worker.
#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Build the command for a session without starting it.
    pub fn command(&self, spec: &SessionSpec) -> Command {
        let vars = SessionVariables::from_spec(spec);
        let mut command = Command::new(&spec.program.program);
        command
            .args(vars.interpolate_vec(&spec.program.argv()))
            .envs(vars.interpolate_map(&spec.env()))
            .stdin(Stdio::null());
        if let Some(dir) = &spec.program.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl SessionLauncher for ProcessLauncher {
    fn name(&self) -> &'static str {
        "process"
    }

    fn launch(&self, spec: SessionSpec) -> Result<SessionHandle> {
        let child = self.command(&spec).spawn().map_err(|e| {
            Error::Launch(format!(
                "failed to start {} for {}: {}",
                spec.program.program, spec.name, e
            ))
        })?;

        let pid = child
            .id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "exited".to_string());
        info!(session = %spec.name, pid = %pid, "Started worker process");

        Ok(SessionHandle {
            name: spec.name,
            launcher_id: pid,
            launcher_name: self.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmc_core::RunIdentifier;
    use fmc_core::launcher::WorkerProgram;

    fn make_spec(program: &str) -> SessionSpec {
        SessionSpec::new(
            "A_1of1".parse().unwrap(),
            RunIdentifier::new("admin-20200427-085948-QuickSim"),
            WorkerProgram::new(program).arg("${operation}"),
        )
    }

    #[test]
    fn test_command_args() {
        let command = ProcessLauncher::new().command(&make_spec("echo"));
        let std = command.as_std();
        assert_eq!(std.get_program(), "echo");
        let args: Vec<_> = std.get_args().collect();
        assert_eq!(args, vec!["A_1of1"]);
    }

    #[tokio::test]
    #[ignore]
    async fn test_launch_true() {
        let handle = ProcessLauncher::new().launch(make_spec("true")).unwrap();
        assert_eq!(handle.launcher_name, "process");
    }

    #[tokio::test]
    async fn test_launch_missing_program() {
        let result = ProcessLauncher::new().launch(make_spec("/nonexistent/fmc-worker"));
        assert!(matches!(result, Err(Error::Launch(_))));
    }
}
