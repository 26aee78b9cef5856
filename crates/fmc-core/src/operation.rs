//! Operations: one unit of sequential work inside a process.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::{Error, Result};

static OPERATION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<process>.+)_(?P<part>\d+)of(?P<total>\d+)$").unwrap());

static OPERATION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<part>\d+)of(?P<total>\d+)$").unwrap());

/// Identity of an operation: the `k`-th of `n` operations of a process.
///
/// Renders as `<process>_<k>of<n>` only at the wire boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey {
    /// Process base name (the process file name without its extension).
    pub process: String,
    pub part: u32,
    pub total: u32,
}

impl OperationKey {
    pub fn new(process: impl Into<String>, part: u32, total: u32) -> Result<Self> {
        let process = process.into();
        if process.is_empty() {
            return Err(Error::InvalidInput("empty process name".to_string()));
        }
        if part == 0 || part > total {
            return Err(Error::InvalidInput(format!(
                "operation part {} out of range 1..={}",
                part, total
            )));
        }
        Ok(Self {
            process,
            part,
            total,
        })
    }

    /// Rebuild a key from a process base name and a `<k>of<n>` suffix, the
    /// form used by worker report topics.
    pub fn from_suffix(process: &str, suffix: &str) -> Result<Self> {
        let caps = OPERATION_SUFFIX
            .captures(suffix)
            .ok_or_else(|| Error::InvalidInput(format!("bad operation suffix: {}", suffix)))?;
        Self::new(
            process,
            parse_number(&caps["part"])?,
            parse_number(&caps["total"])?,
        )
    }

    /// The `<k>of<n>` suffix.
    pub fn suffix(&self) -> String {
        format!("{}of{}", self.part, self.total)
    }

    pub fn is_first(&self) -> bool {
        self.part == 1
    }

    /// Key of the first operation of the same process.
    pub fn first(&self) -> Self {
        Self {
            process: self.process.clone(),
            part: 1,
            total: self.total,
        }
    }
}

fn parse_number(s: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| Error::InvalidInput(format!("operation number out of range: {}", s)))
}

impl FromStr for OperationKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = OPERATION_KEY
            .captures(s)
            .ok_or_else(|| Error::InvalidInput(format!("bad operation name: {}", s)))?;
        Self::new(
            &caps["process"],
            parse_number(&caps["part"])?,
            parse_number(&caps["total"])?,
        )
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}of{}", self.process, self.part, self.total)
    }
}

/// Completion state of an operation. Only ever moves forward:
/// `NotStarted -> Running -> Done`.
///
/// On the wire this is `false`, `"Running"` or `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "CompletionRepr", into = "CompletionRepr")]
pub enum Completion {
    #[default]
    NotStarted,
    Running,
    Done,
}

impl Completion {
    pub fn is_finished(&self) -> bool {
        matches!(self, Completion::Done)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CompletionRepr {
    Flag(bool),
    Label(String),
}

const RUNNING_LABEL: &str = "Running";

impl TryFrom<CompletionRepr> for Completion {
    type Error = String;

    fn try_from(repr: CompletionRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            CompletionRepr::Flag(false) => Ok(Completion::NotStarted),
            CompletionRepr::Flag(true) => Ok(Completion::Done),
            CompletionRepr::Label(label) if label == RUNNING_LABEL => Ok(Completion::Running),
            CompletionRepr::Label(label) => Err(format!("unknown completion state: {}", label)),
        }
    }
}

impl From<Completion> for CompletionRepr {
    fn from(c: Completion) -> Self {
        match c {
            Completion::NotStarted => CompletionRepr::Flag(false),
            Completion::Running => CompletionRepr::Label(RUNNING_LABEL.to_string()),
            Completion::Done => CompletionRepr::Flag(true),
        }
    }
}

/// Startup gate carried only by the first operation of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupGate {
    /// Operator-assigned order among first operations.
    pub priority: u32,
    /// Set once the worker reports its one-time setup is done; unlocks the
    /// rest of the process and the next startup priority.
    pub tasks_complete: bool,
}

impl StartupGate {
    pub fn new(priority: u32) -> Self {
        Self {
            priority,
            tasks_complete: false,
        }
    }
}

/// One operation of a queued process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub key: OperationKey,
    pub complete: Completion,
    pub startup: Option<StartupGate>,
}

impl Operation {
    pub fn new(key: OperationKey) -> Self {
        Self {
            key,
            complete: Completion::NotStarted,
            startup: None,
        }
    }

    pub fn with_startup(mut self, gate: StartupGate) -> Self {
        self.startup = Some(gate);
        self
    }

    /// Move `NotStarted -> Running`. Returns `false` and leaves the state
    /// alone for any other starting state.
    pub fn mark_running(&mut self) -> bool {
        if self.complete == Completion::NotStarted {
            self.complete = Completion::Running;
            true
        } else {
            false
        }
    }

    /// Mark finished. Unconditional and idempotent; late or duplicate finish
    /// reports are tolerated.
    pub fn mark_done(&mut self) {
        self.complete = Completion::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operation_key() {
        let key: OperationKey = "ACordganizerLid_1of2".parse().unwrap();
        assert_eq!(key.process, "ACordganizerLid");
        assert_eq!(key.part, 1);
        assert_eq!(key.total, 2);
        assert!(key.is_first());
        assert_eq!(key.to_string(), "ACordganizerLid_1of2");
        assert_eq!(key.suffix(), "1of2");
    }

    #[test]
    fn test_process_name_with_underscores() {
        let key: OperationKey = "pick_and_place_3of10".parse().unwrap();
        assert_eq!(key.process, "pick_and_place");
        assert_eq!(key.part, 3);
        assert_eq!(key.total, 10);
        assert_eq!(key.first().to_string(), "pick_and_place_1of10");
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!("noSuffix".parse::<OperationKey>().is_err());
        assert!("A_0of2".parse::<OperationKey>().is_err());
        assert!("A_3of2".parse::<OperationKey>().is_err());
        assert!("_1of1".parse::<OperationKey>().is_err());
        assert!("A_99999999999of99999999999".parse::<OperationKey>().is_err());
    }

    #[test]
    fn test_from_suffix() {
        let key = OperationKey::from_suffix("B", "2of3").unwrap();
        assert_eq!(key.to_string(), "B_2of3");
        assert!(OperationKey::from_suffix("B", "two").is_err());
    }

    #[test]
    fn test_completion_wire_format() {
        assert_eq!(
            serde_json::to_string(&Completion::NotStarted).unwrap(),
            "false"
        );
        assert_eq!(
            serde_json::to_string(&Completion::Running).unwrap(),
            "\"Running\""
        );
        assert_eq!(serde_json::to_string(&Completion::Done).unwrap(), "true");

        let running: Completion = serde_json::from_str("\"Running\"").unwrap();
        assert_eq!(running, Completion::Running);
        assert!(serde_json::from_str::<Completion>("\"Paused\"").is_err());
        assert!(serde_json::from_str::<Completion>("1").is_err());
    }

    #[test]
    fn test_completion_only_moves_forward() {
        let mut op = Operation::new("A_1of1".parse().unwrap());
        assert!(op.mark_running());
        assert!(!op.mark_running());
        op.mark_done();
        assert!(!op.mark_running());
        assert_eq!(op.complete, Completion::Done);
        op.mark_done();
        assert_eq!(op.complete, Completion::Done);
    }
}
