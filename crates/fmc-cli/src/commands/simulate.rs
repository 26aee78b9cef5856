//! Local simulated run.
//!
//! Runs the real scheduler against an in-process broker and simulated
//! workers, printing progress as the queue drains.

use anyhow::{Context, Result};
use fmc_bus::Broker;
use fmc_config::{CellConfig, load_cell_config};
use fmc_core::bus::{BusMessage, MessageBus};
use fmc_core::{RunKind, RunStatus, StatusToken};
use fmc_launcher::SimulatedLauncher;
use fmc_scheduler::{CellEvent, CellOrchestrator, RunMode};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;

use super::read_queue;

pub async fn simulate(
    queue_path: &Path,
    config_path: Option<&Path>,
    mode: RunKind,
    poll_ms: Option<u64>,
    timeout_secs: u64,
) -> Result<()> {
    let doc = read_queue(queue_path)?;
    let mut config = match config_path {
        Some(path) => load_cell_config(path)
            .with_context(|| format!("Failed to load cell config: {}", path.display()))?,
        None => CellConfig::default(),
    };
    if let Some(ms) = poll_ms {
        config.scheduler.poll_interval = Duration::from_millis(ms.max(1));
    }

    println!("Simulating run: {}", doc.run_identifier);
    println!("Processes: {}", doc.processes.len());

    let broker = Arc::new(Broker::new(config.server.bus_capacity));
    let launcher = Arc::new(SimulatedLauncher::new(
        broker.clone(),
        config.topics.clone(),
        config.launcher.simulation.clone(),
    ));
    let orchestrator = CellOrchestrator::from_config(&config, broker.clone(), launcher.clone());
    let mut events = orchestrator.subscribe_events();
    let mut statuses = broker.subscribe(config.topics.run_status.parse()?)?;
    let cell = orchestrator.spawn().context("Failed to start cell orchestrator")?;

    let start = RunStatus::new(StatusToken::Starting(mode), "fmc-cli", "simulate");
    broker.publish(BusMessage::retained(
        config.topics.run_status.clone(),
        start.to_string(),
    ))?;
    broker.publish(BusMessage::new(
        config.topics.queue_submit.clone(),
        doc.to_json()?,
    ))?;

    println!("\n--- Starting simulated run ---\n");

    let finished = timeout(Duration::from_secs(timeout_secs), async {
        let mut started = false;
        loop {
            match events.recv().await {
                Ok(CellEvent::SessionLaunched { session }) => {
                    println!("▶ {}", session);
                }
                Ok(CellEvent::LaunchFailed { session, message }) => {
                    println!("✗ {} failed to launch: {}", session, message);
                }
                Ok(CellEvent::MessagesDropped { filter, skipped }) => {
                    println!("! scheduler missed {} messages on {}", skipped, filter);
                }
                Ok(CellEvent::ModeChanged { to, .. }) => {
                    println!("* mode: {:?}", to);
                    match to {
                        RunMode::Active(_) => started = true,
                        RunMode::Idle => return started,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    println!("* {} events skipped", skipped);
                }
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await;

    let stop_status = drain_last_status(&mut statuses).await;
    let scheduler = cell.shutdown().await?;

    match finished {
        Ok(true) => {
            println!("\n--- Run finished ---");
            println!("Sessions launched: {}", launcher.launched().len());
            if let Some(status) = stop_status {
                println!("Final status: {}", status);
            }
            Ok(())
        }
        Ok(false) => {
            anyhow::bail!(
                "Run stopped before it started: {}",
                stop_status.unwrap_or_else(|| "no status".to_string())
            )
        }
        Err(_) => {
            anyhow::bail!(
                "Run did not finish within {}s (next startup priority {})",
                timeout_secs,
                scheduler.next_startup_priority()
            )
        }
    }
}

/// The last status published so far.
async fn drain_last_status(
    statuses: &mut futures::stream::BoxStream<'static, BusMessage>,
) -> Option<String> {
    let mut last = None;
    while let Ok(Some(msg)) = timeout(Duration::from_millis(50), statuses.next()).await {
        last = Some(msg.payload_str().into_owned());
    }
    last
}
