//! Queue document encoding.

use anyhow::{Context, Result};
use chrono::Local;
use fmc_core::{ProcessRequest, QueueDocument, RunIdentifier, RunKind};
use std::path::Path;

/// Parse `NAME=QUANTITY[:PRIORITY]`.
pub fn parse_request(s: &str) -> Result<ProcessRequest, String> {
    let (name, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=QUANTITY[:PRIORITY], got '{}'", s))?;
    let name = name.trim().trim_end_matches(".txt");
    if name.is_empty() {
        return Err(format!("missing process name in '{}'", s));
    }

    let (quantity, priority) = match rest.split_once(':') {
        Some((q, p)) => (q, Some(p)),
        None => (rest, None),
    };
    let quantity = quantity
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid quantity in '{}': {}", s, e))?;
    let priority = priority
        .map(|p| p.trim().parse::<u32>())
        .transpose()
        .map_err(|e| format!("invalid priority in '{}': {}", s, e))?;
    if priority == Some(0) {
        return Err(format!("startup priorities start at 1 in '{}'", s));
    }

    Ok(ProcessRequest {
        name: name.to_string(),
        quantity,
        priority,
    })
}

pub fn encode(
    user: &str,
    mode: RunKind,
    requests: &[ProcessRequest],
    output: Option<&Path>,
) -> Result<()> {
    let run_id = RunIdentifier::generate(user, mode, Local::now().naive_local());
    let doc = QueueDocument::encode(run_id, requests).context("Failed to encode queue")?;
    if doc.is_empty() {
        anyhow::bail!("Every process has quantity 0; nothing to queue");
    }
    let json = doc.to_json()?;

    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {} ({})", path.display(), doc.run_identifier);
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        assert_eq!(
            parse_request("ACordganizerLid=2").unwrap(),
            ProcessRequest {
                name: "ACordganizerLid".to_string(),
                quantity: 2,
                priority: None,
            }
        );
        assert_eq!(
            parse_request("B.txt=1:3").unwrap(),
            ProcessRequest {
                name: "B".to_string(),
                quantity: 1,
                priority: Some(3),
            }
        );
    }

    #[test]
    fn test_parse_request_errors() {
        assert!(parse_request("nope").is_err());
        assert!(parse_request("=2").is_err());
        assert!(parse_request("A=two").is_err());
        assert!(parse_request("A=2:x").is_err());
        assert!(parse_request("A=2:0").is_err());
    }
}
