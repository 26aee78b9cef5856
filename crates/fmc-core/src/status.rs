//! Run-status tokens carried on the `run-status` topic.
//!
//! Payloads look like `<token>[/<origin>[/<comment>]]`. Only the token drives
//! state; the origin and comment are carried for diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// How a run drives the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunKind {
    RealRun,
    FullSimulation,
    QuickSimulation,
}

impl RunKind {
    /// Token published while a run of this kind is active.
    pub fn running_token(&self) -> &'static str {
        match self {
            RunKind::RealRun => "RealRun",
            RunKind::FullSimulation => "FullSimulation",
            RunKind::QuickSimulation => "QuickSimulation",
        }
    }

    /// Short suffix used inside run identifiers.
    pub fn run_type(&self) -> &'static str {
        match self {
            RunKind::RealRun => "RealRun",
            RunKind::FullSimulation => "FullSim",
            RunKind::QuickSimulation => "QuickSim",
        }
    }

    pub fn from_run_type(s: &str) -> Option<Self> {
        match s {
            "RealRun" => Some(RunKind::RealRun),
            "FullSim" => Some(RunKind::FullSimulation),
            "QuickSim" => Some(RunKind::QuickSimulation),
            _ => None,
        }
    }
}

impl FromStr for RunKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "realrun" | "real" => Ok(RunKind::RealRun),
            "fullsimulation" | "fullsim" | "full" => Ok(RunKind::FullSimulation),
            "quicksimulation" | "quicksim" | "quick" => Ok(RunKind::QuickSimulation),
            _ => Err(Error::InvalidInput(format!("unknown run kind: {}", s))),
        }
    }
}

/// The state-bearing part of a run-status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusToken {
    Starting(RunKind),
    Running(RunKind),
    Stopped,
}

impl StatusToken {
    /// Parse a bare token. Accepts both the current spelling
    /// (`Starting-RealRun`) and the legacy one (`Starting_Real-Run`).
    pub fn parse(token: &str) -> Option<Self> {
        let token = match token {
            "Starting_Real-Run" => "Starting-RealRun",
            "Starting_Full-Simulation" => "Starting-FullSimulation",
            "Starting_Quick-Simulation" => "Starting-QuickSimulation",
            "Real-Run" => "RealRun",
            "Full-Simulation" => "FullSimulation",
            "Quick-Simulation" => "QuickSimulation",
            other => other,
        };

        match token {
            "Starting-RealRun" => Some(StatusToken::Starting(RunKind::RealRun)),
            "Starting-FullSimulation" => Some(StatusToken::Starting(RunKind::FullSimulation)),
            "Starting-QuickSimulation" => Some(StatusToken::Starting(RunKind::QuickSimulation)),
            "RealRun" => Some(StatusToken::Running(RunKind::RealRun)),
            "FullSimulation" => Some(StatusToken::Running(RunKind::FullSimulation)),
            "QuickSimulation" => Some(StatusToken::Running(RunKind::QuickSimulation)),
            "Stopped" => Some(StatusToken::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for StatusToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusToken::Starting(kind) => write!(f, "Starting-{}", kind.running_token()),
            StatusToken::Running(kind) => f.write_str(kind.running_token()),
            StatusToken::Stopped => f.write_str("Stopped"),
        }
    }
}

/// A full run-status payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub token: StatusToken,
    pub origin: Option<String>,
    pub comment: Option<String>,
}

impl RunStatus {
    pub fn new(token: StatusToken, origin: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            token,
            origin: Some(origin.into()),
            comment: Some(comment.into()),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(3, '/');
        let raw = parts.next().unwrap_or_default();
        let token = StatusToken::parse(raw)
            .ok_or_else(|| Error::InvalidInput(format!("unknown run status: {}", raw)))?;
        let origin = parts.next().map(str::to_string);
        let comment = parts.next().map(str::to_string);
        Ok(Self {
            token,
            origin,
            comment,
        })
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)?;
        if let Some(origin) = &self.origin {
            write!(f, "/{}", origin)?;
        }
        if let Some(comment) = &self.comment {
            write!(f, "/{}", comment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_with_origin() {
        let status: RunStatus = "Stopped/scheduler/run-complete".parse().unwrap();
        assert_eq!(status.token, StatusToken::Stopped);
        assert_eq!(status.origin.as_deref(), Some("scheduler"));
        assert_eq!(status.comment.as_deref(), Some("run-complete"));
        assert_eq!(status.to_string(), "Stopped/scheduler/run-complete");
    }

    #[test]
    fn test_parse_bare_token() {
        let status: RunStatus = "Starting-QuickSimulation".parse().unwrap();
        assert_eq!(
            status.token,
            StatusToken::Starting(RunKind::QuickSimulation)
        );
        assert!(status.origin.is_none());
    }

    #[test]
    fn test_parse_legacy_spelling() {
        assert_eq!(
            StatusToken::parse("Starting_Real-Run"),
            Some(StatusToken::Starting(RunKind::RealRun))
        );
        assert_eq!(
            StatusToken::parse("Full-Simulation"),
            Some(StatusToken::Running(RunKind::FullSimulation))
        );
    }

    #[test]
    fn test_unknown_token() {
        assert!("Faulted/x".parse::<RunStatus>().is_err());
        assert!(StatusToken::parse("").is_none());
    }

    #[test]
    fn test_run_kind_from_str() {
        assert_eq!("real-run".parse::<RunKind>().unwrap(), RunKind::RealRun);
        assert_eq!("QuickSim".parse::<RunKind>().unwrap(), RunKind::QuickSimulation);
        assert!("slow".parse::<RunKind>().is_err());
    }
}
