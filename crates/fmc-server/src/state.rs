//! Application state.

use chrono::{DateTime, Utc};
use fmc_bus::Broker;
use fmc_core::Topics;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub topics: Arc<Topics>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(broker: Arc<Broker>, topics: Topics) -> Self {
        Self {
            broker,
            topics: Arc::new(topics),
            started_at: Utc::now(),
        }
    }
}
