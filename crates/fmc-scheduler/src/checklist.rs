//! Worker-role readiness checklist.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Tracks which worker roles have announced themselves on `screen-startup`.
/// Informational only; it never gates scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReadinessChecklist {
    roles: BTreeMap<String, bool>,
}

impl ReadinessChecklist {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(|r| (r.into(), false)).collect(),
        }
    }

    /// Mark `role` ready. Unknown roles are added.
    pub fn mark_ready(&mut self, role: &str) {
        if role.is_empty() {
            return;
        }
        match self.roles.insert(role.to_string(), true) {
            Some(true) => debug!(role, "Role already ready"),
            Some(false) => info!(role, "Worker role ready"),
            None => info!(role, "Unlisted worker role ready"),
        }
    }

    pub fn is_ready(&self, role: &str) -> bool {
        self.roles.get(role).copied().unwrap_or(false)
    }

    pub fn all_ready(&self) -> bool {
        self.roles.values().all(|ready| *ready)
    }

    /// Roles still waiting to announce themselves.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.roles
            .iter()
            .filter(|(_, ready)| !**ready)
            .map(|(role, _)| role.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_ready() {
        let mut checklist = ReadinessChecklist::new(["CNCHandler", "PLCHandler"]);
        assert!(!checklist.all_ready());

        checklist.mark_ready("CNCHandler");
        assert!(checklist.is_ready("CNCHandler"));
        assert_eq!(checklist.pending().collect::<Vec<_>>(), vec!["PLCHandler"]);

        checklist.mark_ready("PLCHandler");
        assert!(checklist.all_ready());
    }

    #[test]
    fn test_unknown_role_is_added() {
        let mut checklist = ReadinessChecklist::new(["CNCHandler"]);
        checklist.mark_ready("LabelPrinter");
        assert!(checklist.is_ready("LabelPrinter"));
        assert!(!checklist.all_ready());
    }

    #[test]
    fn test_serializes_as_object() {
        let mut checklist = ReadinessChecklist::new(["urHandler", "CNCHandler"]);
        checklist.mark_ready("urHandler");
        let json = serde_json::to_value(&checklist).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "CNCHandler": false, "urHandler": true })
        );
    }
}
