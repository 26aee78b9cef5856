//! Cell configuration parsing (`cell.kdl`).
//!
//! ```kdl
//! scheduler {
//!     poll-interval-ms 1000
//! }
//! topics {
//!     queue-submit "system/processQueue"
//! }
//! launcher "screen" {
//!     program "python3"
//!     arg "_mesProcess.py"
//!     working-dir "/opt/mes"
//!     debug #false
//! }
//! readiness {
//!     role "CNCHandler"
//!     role "urHandler"
//! }
//! server {
//!     bind "0.0.0.0:3000"
//! }
//! ```
//!
//! Every node is optional; anything left out keeps its default.

use crate::{ConfigError, ConfigResult};
use fmc_core::Topics;
use fmc_core::launcher::WorkerProgram;
use kdl::{KdlDocument, KdlNode};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Worker roles the cell expects to announce themselves on startup.
pub const DEFAULT_READINESS_ROLES: [&str; 5] = [
    "CNCHandler",
    "urHandler",
    "PLCHandler",
    "ResourceHandler",
    "VisionHandler",
];

/// Complete cell configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CellConfig {
    pub scheduler: SchedulerConfig,
    pub topics: Topics,
    pub launcher: LauncherConfig,
    /// Worker roles tracked by the readiness checklist.
    pub readiness: Vec<String>,
    pub server: ServerConfig,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            topics: Topics::default(),
            launcher: LauncherConfig::default(),
            readiness: DEFAULT_READINESS_ROLES
                .iter()
                .map(|r| r.to_string())
                .collect(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Fixed period of the poll tick.
    pub poll_interval: Duration,
    /// Buffer of inbound bus events waiting for the scheduler.
    pub inbox_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            inbox_capacity: 256,
        }
    }
}

/// Which session launcher starts workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherKind {
    /// Detached GNU screen session per operation.
    Screen,
    /// Plain child process per operation.
    Process,
    /// No worker; milestones and completions are published after delays.
    Simulated,
}

impl FromStr for LauncherKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "screen" => Ok(LauncherKind::Screen),
            "process" => Ok(LauncherKind::Process),
            "simulated" => Ok(LauncherKind::Simulated),
            other => Err(ConfigError::invalid(
                "launcher kind",
                format!("unknown launcher: {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    pub kind: LauncherKind,
    /// Program each session runs.
    pub worker: WorkerProgram,
    /// `screen` executable used by the screen launcher.
    pub screen_binary: String,
    /// Shell the screen launcher runs the worker under.
    pub shell: String,
    /// Where the screen launcher writes its per-session scripts.
    pub script_dir: PathBuf,
    pub simulation: SimulationConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            kind: LauncherKind::Screen,
            worker: WorkerProgram::new("python3").arg("_mesProcess.py"),
            screen_binary: "screen".to_string(),
            shell: "bash".to_string(),
            script_dir: PathBuf::from("_mesBashFiles"),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Timing of the simulated launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Delay before a first operation reports its startup milestone.
    pub startup_delay: Duration,
    /// Delay before an operation reports it finished. Keep it above the poll
    /// interval: a first operation that finishes before any tick sees it
    /// running never advances the startup priority counter.
    pub operation_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_millis(200),
            operation_delay: Duration::from_millis(2500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Per-subscriber buffer of the in-process broker. A subscriber that
    /// falls further behind skips messages; if the scheduler skips a
    /// completion or startup milestone, that process waits until the run is
    /// stopped.
    pub bus_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            bus_capacity: 1024,
        }
    }
}

/// Read and parse a configuration file.
pub fn load_cell_config(path: impl AsRef<Path>) -> ConfigResult<CellConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_cell_config(&content)
}

/// Parse a cell configuration from KDL text.
pub fn parse_cell_config(kdl: &str) -> ConfigResult<CellConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = CellConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "scheduler" => parse_scheduler(node, &mut config.scheduler)?,
            "topics" => parse_topics(node, &mut config.topics)?,
            "launcher" => parse_launcher(node, &mut config.launcher)?,
            "readiness" => config.readiness = parse_readiness(node)?,
            "server" => parse_server(node, &mut config.server)?,
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_scheduler(node: &KdlNode, config: &mut SchedulerConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "poll-interval-ms" => {
                config.poll_interval =
                    Duration::from_millis(positive_int_arg(child, "poll-interval-ms")?);
            }
            "inbox-capacity" => {
                config.inbox_capacity = positive_int_arg(child, "inbox-capacity")? as usize;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_topics(node: &KdlNode, topics: &mut Topics) -> ConfigResult<()> {
    for child in children(node) {
        let name = child.name().value();
        let value = get_first_string_arg(child)
            .ok_or_else(|| ConfigError::MissingField(format!("topic name for {}", name)))?;
        if value.is_empty() || value.contains(['+', '#']) {
            return Err(ConfigError::invalid(
                name,
                format!("'{}' is not a plain topic name", value),
            ));
        }

        let slot = match name {
            "run-status" => &mut topics.run_status,
            "queue-submit" => &mut topics.queue_submit,
            "queue-snapshot" => &mut topics.queue_snapshot,
            "next-startup-priority" => &mut topics.next_startup_priority,
            "operation-finished" => &mut topics.operation_finished,
            "startup-milestone" => &mut topics.startup_milestone,
            "screen-startup" => &mut topics.screen_startup,
            "screen-checklist" => &mut topics.screen_checklist,
            "fault" => &mut topics.fault,
            other => {
                return Err(ConfigError::invalid(
                    "topics",
                    format!("unknown topic: {}", other),
                ));
            }
        };
        *slot = value;
    }
    Ok(())
}

fn parse_launcher(node: &KdlNode, config: &mut LauncherConfig) -> ConfigResult<()> {
    if let Some(kind) = get_first_string_arg(node) {
        config.kind = kind.parse()?;
    }

    let mut args: Option<Vec<String>> = None;

    for child in children(node) {
        match child.name().value() {
            "program" => {
                config.worker.program = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("launcher program".to_string()))?;
            }
            "arg" | "args" => {
                args.get_or_insert_with(Vec::new)
                    .extend(get_all_string_args(child));
            }
            "working-dir" => {
                config.worker.working_dir = get_first_string_arg(child).map(PathBuf::from);
            }
            "debug" => {
                config.worker.debug = get_first_bool_arg(child).ok_or_else(|| {
                    ConfigError::invalid("debug", "expected #true or #false")
                })?;
            }
            "env" => {
                for var in children(child) {
                    let key = var.name().value().to_string();
                    if let Some(val) = get_first_string_arg(var) {
                        config.worker.env.insert(key, val);
                    }
                }
            }
            "screen-binary" => {
                if let Some(bin) = get_first_string_arg(child) {
                    config.screen_binary = bin;
                }
            }
            "shell" => {
                if let Some(shell) = get_first_string_arg(child) {
                    config.shell = shell;
                }
            }
            "script-dir" => {
                if let Some(dir) = get_first_string_arg(child) {
                    config.script_dir = PathBuf::from(dir);
                }
            }
            "startup-delay-ms" => {
                config.simulation.startup_delay =
                    Duration::from_millis(non_negative_int_arg(child, "startup-delay-ms")?);
            }
            "operation-delay-ms" => {
                config.simulation.operation_delay =
                    Duration::from_millis(non_negative_int_arg(child, "operation-delay-ms")?);
            }
            _ => {}
        }
    }

    if let Some(args) = args {
        config.worker.args = args;
    }
    if config.worker.program.is_empty() {
        return Err(ConfigError::MissingField("launcher program".to_string()));
    }
    Ok(())
}

fn parse_readiness(node: &KdlNode) -> ConfigResult<Vec<String>> {
    let mut roles: Vec<String> = Vec::new();
    for child in children(node) {
        if child.name().value() != "role" {
            continue;
        }
        let role = get_first_string_arg(child)
            .ok_or_else(|| ConfigError::MissingField("readiness role name".to_string()))?;
        if roles.contains(&role) {
            return Err(ConfigError::Duplicate(format!("readiness role '{}'", role)));
        }
        roles.push(role);
    }
    Ok(roles)
}

fn parse_server(node: &KdlNode, config: &mut ServerConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "bind" => {
                let bind = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("server bind".to_string()))?;
                config.bind = bind.parse().map_err(|_| {
                    ConfigError::invalid("bind", format!("not a socket address: {}", bind))
                })?;
            }
            "bus-capacity" => {
                config.bus_capacity = positive_int_arg(child, "bus-capacity")? as usize;
            }
            _ => {}
        }
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes().iter())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn non_negative_int_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = get_first_int_arg(node)
        .ok_or_else(|| ConfigError::invalid(field, "expected an integer"))?;
    u64::try_from(value).map_err(|_| ConfigError::invalid(field, format!("out of range: {}", value)))
}

fn positive_int_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    match non_negative_int_arg(node, field)? {
        0 => Err(ConfigError::invalid(field, "must be greater than zero")),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_cell_config("").unwrap();
        assert_eq!(config, CellConfig::default());
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(1));
        assert_eq!(config.launcher.kind, LauncherKind::Screen);
        assert_eq!(config.readiness.len(), 5);
        assert_eq!(config.topics.queue_submit, "operation-queue-submit");
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            scheduler {
                poll-interval-ms 250
                inbox-capacity 64
            }

            topics {
                queue-submit "system/processQueue"
                run-status "system/status"
            }

            launcher "process" {
                program "/usr/bin/python3"
                arg "_mesProcess.py"
                arg "--session" "${session}"
                working-dir "/opt/mes"
                debug #true
                env {
                    CELL "bu-fmc"
                }
            }

            readiness {
                role "urHandler"
                role "PLCHandler"
            }

            server {
                bind "127.0.0.1:8080"
                bus-capacity 32
            }
        "#;

        let config = parse_cell_config(kdl).unwrap();
        assert_eq!(config.scheduler.poll_interval, Duration::from_millis(250));
        assert_eq!(config.scheduler.inbox_capacity, 64);
        assert_eq!(config.topics.queue_submit, "system/processQueue");
        assert_eq!(config.topics.run_status, "system/status");
        assert_eq!(config.topics.fault, "fault");

        assert_eq!(config.launcher.kind, LauncherKind::Process);
        assert_eq!(config.launcher.worker.program, "/usr/bin/python3");
        assert_eq!(
            config.launcher.worker.args,
            vec!["_mesProcess.py", "--session", "${session}"]
        );
        assert_eq!(
            config.launcher.worker.working_dir,
            Some(PathBuf::from("/opt/mes"))
        );
        assert!(config.launcher.worker.debug);
        assert_eq!(
            config.launcher.worker.env.get("CELL").map(String::as_str),
            Some("bu-fmc")
        );

        assert_eq!(config.readiness, vec!["urHandler", "PLCHandler"]);
        assert_eq!(config.server.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.server.bus_capacity, 32);
    }

    #[test]
    fn test_simulated_launcher_delays() {
        let kdl = r#"
            launcher "simulated" {
                startup-delay-ms 0
                operation-delay-ms 20
            }
        "#;
        let config = parse_cell_config(kdl).unwrap();
        assert_eq!(config.launcher.kind, LauncherKind::Simulated);
        assert_eq!(config.launcher.simulation.startup_delay, Duration::ZERO);
        assert_eq!(
            config.launcher.simulation.operation_delay,
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            "scheduler { poll-interval-ms 0 }",
            "scheduler { poll-interval-ms -5 }",
            r#"launcher "docker""#,
            r#"server { bind "not-an-address" }"#,
            r#"topics { fault "fault/#" }"#,
            r#"topics { bogus "x" }"#,
        ];
        for kdl in cases {
            let result = parse_cell_config(kdl);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { .. })),
                "expected invalid value for {}",
                kdl
            );
        }
    }

    #[test]
    fn test_duplicate_role() {
        let kdl = r#"readiness { role "urHandler"; role "urHandler"; }"#;
        assert!(matches!(
            parse_cell_config(kdl),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_cell_config("scheduler {"),
            Err(ConfigError::Parse(_))
        ));
    }
}
