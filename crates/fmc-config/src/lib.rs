//! KDL configuration parsing for the manufacturing cell scheduler.
//!
//! This crate handles parsing of:
//! - Cell configuration (cell.kdl)
//! - Variable interpolation in worker program arguments

pub mod cell;
pub mod error;
pub mod variables;

pub use cell::{
    CellConfig, LauncherConfig, LauncherKind, SchedulerConfig, ServerConfig, SimulationConfig,
    load_cell_config, parse_cell_config,
};
pub use error::{ConfigError, ConfigResult};
pub use variables::SessionVariables;
