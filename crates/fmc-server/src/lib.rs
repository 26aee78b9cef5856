//! Cell server for the manufacturing cell scheduler.
//!
//! Hosts the message broker, bridges it to external collaborators over
//! WebSocket, and exposes health and queue inspection endpoints.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
