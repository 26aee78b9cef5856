//! Variable interpolation for worker program arguments.
//!
//! Supports variables like:
//! - `${session}` - Session name (`<operation>~<run id>`)
//! - `${operation}` - Operation name (e.g. `A_1of2`)
//! - `${process}` - Process base name
//! - `${part}` / `${total}` - Operation position and count
//! - `${suffix}` - `<part>of<total>`
//! - `${run.id}` - Run identifier
//! - `${run.user}` - Operator embedded in the run identifier
//! - `${run.type}` - Run type embedded in the run identifier
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)

use fmc_core::launcher::SessionSpec;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Values available to worker argument templates.
#[derive(Debug, Clone, Default)]
pub struct SessionVariables {
    pub session: String,
    pub operation: String,
    pub process: String,
    pub part: u32,
    pub total: u32,
    pub run_id: String,
    pub run_user: String,
    pub run_type: String,
    /// Environment variables
    pub env: HashMap<String, String>,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl SessionVariables {
    /// Variables describing one session launch.
    pub fn from_spec(spec: &SessionSpec) -> Self {
        Self {
            session: spec.name.to_string(),
            operation: spec.operation.to_string(),
            process: spec.operation.process.clone(),
            part: spec.operation.part,
            total: spec.operation.total,
            run_id: spec.run.to_string(),
            run_user: spec.run.user().unwrap_or_default().to_string(),
            run_type: spec
                .run
                .run_kind()
                .map(|k| k.run_type().to_string())
                .unwrap_or_default(),
            env: spec.program.env.clone(),
        }
    }

    /// Populate environment variables from the current process environment.
    /// Variables already set by the worker program win.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.entry(key).or_insert(value);
        }
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["session"] => Some(self.session.clone()),
            ["operation"] => Some(self.operation.clone()),
            ["process"] => Some(self.process.clone()),
            ["part"] => Some(self.part.to_string()),
            ["total"] => Some(self.total.to_string()),
            ["suffix"] => Some(format!("{}of{}", self.part, self.total)),

            ["run", "id"] => Some(self.run_id.clone()),
            ["run", "user"] => Some(self.run_user.clone()),
            ["run", "type"] => Some(self.run_type.clone()),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),

            _ => None,
        }
    }

    /// Interpolate all variables in a string. Unknown variables are left
    /// as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate variables in a list of strings.
    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    /// Interpolate variables in a HashMap.
    pub fn interpolate_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmc_core::RunIdentifier;
    use fmc_core::launcher::WorkerProgram;

    fn make_vars() -> SessionVariables {
        let mut program = WorkerProgram::new("python3");
        program.env.insert("CELL".to_string(), "bu-fmc".to_string());
        let spec = SessionSpec::new(
            "processA-Body_2of7".parse().unwrap(),
            RunIdentifier::new("admin-20200427-085948-RealRun"),
            program,
        );
        SessionVariables::from_spec(&spec)
    }

    #[test]
    fn test_session_variables() {
        let vars = make_vars();
        assert_eq!(
            vars.interpolate("--session ${session}"),
            "--session processA-Body_2of7~admin-20200427-085948-RealRun"
        );
        assert_eq!(
            vars.interpolate("${process}:${part}/${total} (${suffix})"),
            "processA-Body:2/7 (2of7)"
        );
    }

    #[test]
    fn test_run_variables() {
        let vars = make_vars();
        assert_eq!(
            vars.interpolate("${run.user} ${run.type} ${run.id}"),
            "admin RealRun admin-20200427-085948-RealRun"
        );
    }

    #[test]
    fn test_env_variables() {
        let vars = make_vars();
        assert_eq!(vars.interpolate("cell=${env.CELL}"), "cell=bu-fmc");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let vars = make_vars();
        assert_eq!(vars.interpolate("${nope} ${env.MISSING}"), "${nope} ${env.MISSING}");
    }

    #[test]
    fn test_interpolate_vec() {
        let vars = make_vars();
        let args = vec!["_mesProcess.py".to_string(), "${operation}".to_string()];
        assert_eq!(
            vars.interpolate_vec(&args),
            vec!["_mesProcess.py", "processA-Body_2of7"]
        );
    }
}
