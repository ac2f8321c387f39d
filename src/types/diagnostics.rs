use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::DiagnosticStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub check: String,
    pub status: DiagnosticStatus,
    pub message: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl DiagnosticResult {
    pub fn new(
        check: impl Into<String>,
        status: DiagnosticStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check: check.into(),
            status,
            message: message.into(),
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn success(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, DiagnosticStatus::Success, message)
    }

    pub fn warning(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, DiagnosticStatus::Warning, message)
    }

    pub fn error(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, DiagnosticStatus::Error, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall: f64,
    pub components: BTreeMap<String, f64>,
    pub last_check: Option<DateTime<Utc>>,
    pub issues: Vec<String>,
}

impl SystemHealth {
    /// `100 - penalty * issue_count`, clamped to [0, 100].
    pub fn overall_for(issue_count: usize, penalty: f64) -> f64 {
        (100.0 - penalty * issue_count as f64).clamp(0.0, 100.0)
    }

    pub fn from_results(results: &[DiagnosticResult], penalty: f64, checked_at: DateTime<Utc>) -> Self {
        let issues: Vec<String> = results
            .iter()
            .filter(|r| !r.status.is_success())
            .map(|r| r.message.clone())
            .collect();

        let components = results
            .iter()
            .map(|r| (r.check.clone(), r.status.component_score()))
            .collect();

        Self {
            overall: Self::overall_for(issues.len(), penalty),
            components,
            last_check: Some(checked_at),
            issues,
        }
    }
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self {
            overall: 100.0,
            components: BTreeMap::new(),
            last_check: None,
            issues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub results: Vec<DiagnosticResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Error,
    /// Raised by the repair path: no strategy, or the strategy failed.
    Escalated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub message: String,
    pub level: AlertLevel,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(message: impl Into<String>, level: AlertLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }

    pub fn from_result(result: &DiagnosticResult) -> Option<Self> {
        let level = match result.status {
            DiagnosticStatus::Success => return None,
            DiagnosticStatus::Warning => AlertLevel::Warning,
            DiagnosticStatus::Error => AlertLevel::Error,
        };
        Some(Self::new(result.message.clone(), level))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default = "Utc::now")]
    pub assessed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_is_clamped() {
        for k in 0..25 {
            let overall = SystemHealth::overall_for(k, 10.0);
            assert!((0.0..=100.0).contains(&overall));
        }
        assert_eq!(SystemHealth::overall_for(0, 10.0), 100.0);
        assert_eq!(SystemHealth::overall_for(3, 10.0), 70.0);
        assert_eq!(SystemHealth::overall_for(12, 10.0), 0.0);
    }

    #[test]
    fn test_health_from_results() {
        let results = vec![
            DiagnosticResult::success("connectivity", "connected"),
            DiagnosticResult::warning("performance", "high-cpu load"),
            DiagnosticResult::error("storage", "storage-pressure at 95%"),
        ];

        let health = SystemHealth::from_results(&results, 10.0, Utc::now());
        assert_eq!(health.overall, 80.0);
        assert_eq!(health.issues, vec!["high-cpu load", "storage-pressure at 95%"]);
        assert_eq!(health.components["connectivity"], 100.0);
        assert_eq!(health.components["performance"], 50.0);
        assert_eq!(health.components["storage"], 0.0);
        assert!(health.last_check.is_some());
    }

    #[test]
    fn test_alert_from_success_is_none() {
        let result = DiagnosticResult::success("security", "tls");
        assert!(Alert::from_result(&result).is_none());

        let result = DiagnosticResult::error("security", "insecure-transport");
        assert_eq!(Alert::from_result(&result).unwrap().level, AlertLevel::Error);
    }
}
