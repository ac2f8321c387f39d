pub mod checks;
pub mod engine;
pub mod repair;

pub use checks::{default_checks, CheckContext, HealthCheck};
pub use engine::DiagnosticsEngine;
pub use repair::{RepairAction, RepairReport, RepairStrategies};
