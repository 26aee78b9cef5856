//! Run and session identifiers.

use chrono::NaiveDateTime;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::operation::OperationKey;
use crate::status::RunKind;

/// Identifies one production run, e.g. `admin-20200803-112302-FullSim`.
///
/// The identifier is opaque to the scheduler; only the launcher and reports
/// look inside it. Documents built elsewhere may carry any string here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct RunIdentifier(String);

impl RunIdentifier {
    /// Wrap an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build `<user>-<YYYYMMDD>-<HHMMSS>-<RunType>` for a new run.
    pub fn generate(user: &str, kind: RunKind, at: NaiveDateTime) -> Self {
        Self(format!(
            "{}-{}-{}",
            user,
            at.format("%Y%m%d-%H%M%S"),
            kind.run_type()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Operator that submitted the run, when the identifier is in the
    /// generated format.
    pub fn user(&self) -> Option<&str> {
        let mut parts = self.0.rsplitn(4, '-');
        let _run_type = parts.next()?;
        let _time = parts.next()?;
        let _date = parts.next()?;
        parts.next().filter(|u| !u.is_empty())
    }

    /// Run mode embedded in the identifier, when recognisable.
    pub fn run_kind(&self) -> Option<RunKind> {
        self.0
            .rsplit('-')
            .next()
            .and_then(RunKind::from_run_type)
    }
}

impl From<&str> for RunIdentifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of the isolated session a worker runs in.
///
/// Joins the operation name and run identifier so reports from different
/// runs of the same operation never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct SessionName(String);

impl SessionName {
    pub const SEPARATOR: char = '~';

    pub fn new(operation: &OperationKey, run: &RunIdentifier) -> Self {
        Self(format!("{}{}{}", operation, Self::SEPARATOR, run))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a session name back into its operation and run parts.
    pub fn parts(&self) -> Option<(&str, &str)> {
        self.0.split_once(Self::SEPARATOR)
    }
}
