pub mod diagnostics;
pub mod improvement;
pub mod metrics;

pub use diagnostics::{
    Alert, AlertLevel, DiagnosticResult, DiagnosticsHistoryEntry, RiskAssessment, SystemHealth,
};
pub use improvement::{
    ImprovementAction, ImprovementCategory, ImprovementHistoryEntry, ImprovementMetrics,
    ImprovementOutcome, ImprovementStatus, Priority,
};
pub use metrics::{FeatureVector, MetricsSnapshot, SubsystemMetrics};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type CorrelationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    Success,
    Warning,
    Error,
}

impl DiagnosticStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DiagnosticStatus::Success => "success",
            DiagnosticStatus::Warning => "warning",
            DiagnosticStatus::Error => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DiagnosticStatus::Success)
    }

    /// Per-component score used in `SystemHealth::components`.
    pub fn component_score(&self) -> f64 {
        match self {
            DiagnosticStatus::Success => 100.0,
            DiagnosticStatus::Warning => 50.0,
            DiagnosticStatus::Error => 0.0,
        }
    }
}

/// A remedial or optimizing instruction for the remote entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub command_type: String,
    pub payload: Value,
}

impl Command {
    pub fn new(command_type: impl Into<String>, payload: Value) -> Self {
        Self {
            command_type: command_type.into(),
            payload,
        }
    }
}

/// Observable result of one request/response round trip on the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub id: CorrelationId,
    pub command: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
