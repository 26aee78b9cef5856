//! CLI command implementations.

pub mod encode;
pub mod simulate;

use anyhow::{Context, Result};
use fmc_config::load_cell_config;
use fmc_core::QueueDocument;
use std::path::Path;

/// Read and parse a queue document, failing on empty or malformed input.
pub fn read_queue(path: &Path) -> Result<QueueDocument> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read queue document: {}", path.display()))?;
    QueueDocument::from_json(&content)
        .with_context(|| format!("Invalid queue document: {}", path.display()))?
        .with_context(|| format!("Queue document is empty: {}", path.display()))
}

pub fn validate(path: &Path) -> Result<()> {
    let doc = read_queue(path)?;
    if doc.is_empty() {
        anyhow::bail!("Queue document has no processes");
    }

    println!("Run: {}", doc.run_identifier);
    for process in &doc.processes {
        let priority = process
            .first()
            .and_then(|op| op.startup)
            .map(|gate| gate.priority.to_string())
            .unwrap_or_else(|| "-".to_string());
        let finished = process
            .operations
            .iter()
            .filter(|op| op.complete.is_finished())
            .count();
        println!(
            "  {} - {} operations, startup priority {}, {} finished",
            process.name,
            process.operations.len(),
            priority,
            finished
        );
    }

    let gaps = doc.priority_gaps();
    if !gaps.is_empty() {
        println!("Warning: no process has startup priority {:?}", gaps);
    }
    println!("Queue document is valid");
    Ok(())
}

pub fn check_config(path: &Path) -> Result<()> {
    let config = load_cell_config(path)
        .with_context(|| format!("Failed to load cell config: {}", path.display()))?;

    println!("Poll interval: {:?}", config.scheduler.poll_interval);
    println!("Launcher: {:?}", config.launcher.kind);
    println!(
        "Worker: {}",
        std::iter::once(config.launcher.worker.program.clone())
            .chain(config.launcher.worker.argv())
            .collect::<Vec<_>>()
            .join(" ")
    );
    println!("Readiness roles: {}", config.readiness.join(", "));
    println!("Server: {}", config.server.bind);
    println!("Configuration is valid");
    Ok(())
}
