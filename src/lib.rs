pub mod api;
pub mod broadcast;
pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod improvement;
pub mod monitor;
pub mod providers;
pub mod scheduler;
pub mod types;

pub use config::Config;
pub use error::{PulseError, Result};
pub use monitor::Monitor;
pub use types::*;
