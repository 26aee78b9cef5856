//! GNU screen session launcher.
//!
//! Each operation runs in a detached screen session named after the
//! session, so operators can attach to a worker with `screen -r <name>`.
//! The launch script runs inline through `<shell> -c`; a copy is written to
//! the script directory in the background for post-mortem inspection.

use fmc_config::{LauncherConfig, SessionVariables};
use fmc_core::launcher::{SessionHandle, SessionLauncher, SessionSpec};
use fmc_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::shell_quote;

/// Launches each worker in its own detached `screen` session.
pub struct ScreenLauncher {
    screen_binary: String,
    shell: String,
    script_dir: PathBuf,
}

impl ScreenLauncher {
    pub fn new(screen_binary: impl Into<String>, shell: impl Into<String>, script_dir: PathBuf) -> Self {
        Self {
            screen_binary: screen_binary.into(),
            shell: shell.into(),
            script_dir,
        }
    }

    pub fn from_config(config: &LauncherConfig) -> Self {
        Self::new(
            config.screen_binary.clone(),
            config.shell.clone(),
            config.script_dir.clone(),
        )
    }

    /// Shell script that starts the detached session.
    pub fn script(&self, spec: &SessionSpec) -> String {
        let vars = SessionVariables::from_spec(spec);
        let worker = std::iter::once(spec.program.program.clone())
            .chain(vars.interpolate_vec(&spec.program.argv()))
            .map(|part| shell_quote(&part))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "echo {}\n{} -dmS {} {} -c {}\n",
            shell_quote(&format!("Starting {}", spec.name)),
            self.screen_binary,
            shell_quote(spec.name.as_str()),
            self.shell,
            shell_quote(&worker),
        )
    }

    fn script_path(&self, spec: &SessionSpec) -> PathBuf {
        self.script_dir.join(format!("{}.sh", spec.name))
    }

    /// Build the command for a session without starting it.
    pub fn command(&self, spec: &SessionSpec) -> Command {
        let vars = SessionVariables::from_spec(spec);
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(self.script(spec))
            .envs(vars.interpolate_map(&spec.env()))
            .stdin(Stdio::null());
        if let Some(dir) = &spec.program.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

async fn keep_script(path: &Path, script: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, script).await
}

impl SessionLauncher for ScreenLauncher {
    fn name(&self) -> &'static str {
        "screen"
    }

    fn launch(&self, spec: SessionSpec) -> Result<SessionHandle> {
        // `screen -dm` detaches immediately; the shell exits right after and
        // is reaped by the runtime.
        self.command(&spec)
            .spawn()
            .map_err(|e| Error::Launch(format!("failed to start {}: {}", self.shell, e)))?;

        info!(session = %spec.name, operation = %spec.operation, "Started screen session");

        let script_path = self.script_path(&spec);
        let script = self.script(&spec);
        tokio::spawn(async move {
            match keep_script(&script_path, &script).await {
                Ok(()) => debug!(script = %script_path.display(), "Wrote session script"),
                Err(e) => warn!(script = %script_path.display(), error = %e, "Failed to keep session script"),
            }
        });

        Ok(SessionHandle {
            launcher_id: spec.name.to_string(),
            name: spec.name,
            launcher_name: self.name(),
        })
    }
}
