use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::channel::{MetricsRequest, TelemetryChannel};
use crate::error::{PulseError, Result};
use crate::providers::RiskScorer;
use crate::types::{ConnectionState, DiagnosticResult, MetricsSnapshot};

/// Everything a check may look at. The snapshot is taken once per run so
/// every check in a batch sees the same metrics.
pub struct CheckContext<'a> {
    pub channel: &'a TelemetryChannel,
    pub scorer: &'a dyn RiskScorer,
    pub snapshot: Option<Arc<MetricsSnapshot>>,
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<DiagnosticResult>;
}

/// The fixed battery, in reporting order.
pub fn default_checks() -> Vec<Box<dyn HealthCheck>> {
    vec![
        Box::new(ConnectivityCheck),
        Box::new(PerformanceCheck),
        Box::new(StorageCheck),
        Box::new(ModuleHealthCheck),
        Box::new(ScoringModelCheck),
        Box::new(SecurityCheck),
    ]
}

pub struct ConnectivityCheck;

#[async_trait]
impl HealthCheck for ConnectivityCheck {
    fn name(&self) -> &str {
        "connectivity"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<DiagnosticResult> {
        let state = ctx.channel.connection_state();
        let details = json!({
            "state": state.as_str(),
            "attempts": ctx.channel.attempts(),
            "gaveUp": ctx.channel.gave_up(),
            "pendingRequests": ctx.channel.pending_requests(),
        });

        let result = match state {
            ConnectionState::Connected => {
                DiagnosticResult::success(self.name(), "telemetry channel connected")
            }
            ConnectionState::Connecting => DiagnosticResult::warning(
                self.name(),
                "reconnecting: telemetry channel handshake in progress",
            ),
            ConnectionState::Disconnected | ConnectionState::Error => DiagnosticResult::error(
                self.name(),
                format!("disconnected: telemetry channel is {}", state.as_str()),
            ),
        };

        Ok(result.with_details(details))
    }
}

pub struct PerformanceCheck;

/// Scores a snapshot: >80 success, >60 warning, otherwise error.
pub fn classify_performance(snapshot: &MetricsSnapshot) -> DiagnosticResult {
    let score = snapshot.performance_score();
    let details = json!({
        "score": score,
        "cpu": snapshot.cpu,
        "memory": snapshot.memory,
        "network": snapshot.network,
        "throughput": snapshot.throughput,
        "errorRate": snapshot.error_rate,
    });

    let keyword = if snapshot.cpu > 80.0 {
        "high-cpu"
    } else if snapshot.memory > 80.0 {
        "high-memory"
    } else {
        "degraded-performance"
    };
    let message = format!(
        "{}: performance score {:.1} (cpu {:.1}%, memory {:.1}%)",
        keyword, score, snapshot.cpu, snapshot.memory
    );

    let result = if score > 80.0 {
        DiagnosticResult::success("performance", format!("performance score {:.1}", score))
    } else if score > 60.0 {
        DiagnosticResult::warning("performance", message)
    } else {
        DiagnosticResult::error("performance", message)
    };

    result.with_details(details)
}

#[async_trait]
impl HealthCheck for PerformanceCheck {
    fn name(&self) -> &str {
        "performance"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<DiagnosticResult> {
        Ok(match &ctx.snapshot {
            Some(snapshot) => classify_performance(snapshot),
            None => DiagnosticResult::warning(
                self.name(),
                "no-metrics: no telemetry snapshot received yet",
            ),
        })
    }
}

pub struct StorageCheck;

#[async_trait]
impl HealthCheck for StorageCheck {
    fn name(&self) -> &str {
        "storage"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<DiagnosticResult> {
        let reply = ctx.channel.request_metrics(MetricsRequest::Disk).await?;
        let usage = reply
            .get("usage")
            .and_then(|u| u.as_f64())
            .ok_or_else(|| PulseError::CheckFailure {
                check: self.name().to_string(),
                reason: "diskMetrics reply carries no usage".to_string(),
            })?;

        let message = format!("storage-pressure: disk usage {:.1}%", usage);
        let result = if usage > 90.0 {
            DiagnosticResult::error(self.name(), message)
        } else if usage > 75.0 {
            DiagnosticResult::warning(self.name(), message)
        } else {
            DiagnosticResult::success(self.name(), format!("disk usage {:.1}%", usage))
        };

        Ok(result.with_details(reply))
    }
}

pub struct ModuleHealthCheck;

#[async_trait]
impl HealthCheck for ModuleHealthCheck {
    fn name(&self) -> &str {
        "modules"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<DiagnosticResult> {
        let Some(snapshot) = &ctx.snapshot else {
            return Ok(DiagnosticResult::warning(
                self.name(),
                "no-metrics: module health unknown",
            ));
        };

        let worst = snapshot
            .subsystems
            .iter()
            .min_by(|a, b| a.1.health.total_cmp(&b.1.health));

        let details = json!(snapshot
            .subsystems
            .iter()
            .map(|(name, sub)| (name.clone(), json!(sub.health)))
            .collect::<serde_json::Map<_, _>>());

        let result = match worst {
            None => DiagnosticResult::success(self.name(), "no subsystems reported"),
            Some((name, sub)) if sub.health < 50.0 => DiagnosticResult::error(
                self.name(),
                format!("module-degraded {}: health {:.1} ({})", name, sub.health, sub.status),
            ),
            Some((name, sub)) if sub.health < 75.0 => DiagnosticResult::warning(
                self.name(),
                format!("module-degraded {}: health {:.1} ({})", name, sub.health, sub.status),
            ),
            Some(_) => DiagnosticResult::success(
                self.name(),
                format!("{} subsystems healthy", snapshot.subsystems.len()),
            ),
        };

        Ok(result.with_details(details))
    }
}

pub struct ScoringModelCheck;

#[async_trait]
impl HealthCheck for ScoringModelCheck {
    fn name(&self) -> &str {
        "scoring-model"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<DiagnosticResult> {
        Ok(if ctx.scorer.ready().await? {
            DiagnosticResult::success(self.name(), "risk model ready")
        } else {
            DiagnosticResult::warning(self.name(), "scorer-unavailable: risk model not ready")
        })
    }
}

pub struct SecurityCheck;

fn is_loopback(host: &str) -> bool {
    host == "localhost" || host.starts_with("127.") || host == "::1" || host == "[::1]"
}

#[async_trait]
impl HealthCheck for SecurityCheck {
    fn name(&self) -> &str {
        "security"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<DiagnosticResult> {
        let raw = &ctx.channel.config().url;
        let url = reqwest::Url::parse(raw).map_err(|e| PulseError::CheckFailure {
            check: self.name().to_string(),
            reason: format!("invalid channel url {}: {}", raw, e),
        })?;
        let host = url.host_str().unwrap_or_default();

        let result = match url.scheme() {
            "wss" => DiagnosticResult::success(self.name(), "telemetry transport encrypted"),
            "ws" if is_loopback(host) => DiagnosticResult::warning(
                self.name(),
                format!("insecure-transport: unencrypted loopback channel to {}", host),
            ),
            scheme => DiagnosticResult::error(
                self.name(),
                format!("insecure-transport: {}:// channel to {}", scheme, host),
            ),
        };

        Ok(result.with_details(json!({ "scheme": url.scheme(), "host": host })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiagnosticStatus;

    #[test]
    fn test_performance_warning_scenario() {
        let snapshot = MetricsSnapshot::new(90.0, 50.0, 10.0, 0.0, 80.0);
        let result = classify_performance(&snapshot);

        assert_eq!(result.status, DiagnosticStatus::Warning);
        assert!(result.message.starts_with("high-cpu"));
        assert!((result.details["score"].as_f64().unwrap() - 66.0).abs() < 1e-9);
    }

    #[test]
    fn test_performance_success() {
        let snapshot = MetricsSnapshot::new(90.0, 90.0, 90.0, 0.0, 90.0);
        let result = classify_performance(&snapshot);
        assert_eq!(result.status, DiagnosticStatus::Success);
    }

    #[test]
    fn test_performance_error_prefers_memory_keyword() {
        let snapshot = MetricsSnapshot::new(10.0, 85.0, 10.0, 8.0, 10.0);
        let result = classify_performance(&snapshot);
        assert_eq!(result.status, DiagnosticStatus::Error);
        assert!(result.message.starts_with("high-memory"));
    }

    #[test]
    fn test_boundary_scores() {
        // exactly 80 is not success, exactly 60 is not warning
        let at_80 = MetricsSnapshot::new(75.0, 75.0, 75.0, 0.0, 75.0);
        assert_eq!(classify_performance(&at_80).status, DiagnosticStatus::Warning);

        let at_60 = MetricsSnapshot::new(50.0, 50.0, 50.0, 0.0, 50.0);
        assert_eq!(classify_performance(&at_60).status, DiagnosticStatus::Error);
    }

    #[test]
    fn test_default_battery_order() {
        let names: Vec<String> = default_checks()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["connectivity", "performance", "storage", "modules", "scoring-model", "security"]
        );
    }

    #[test]
    fn test_loopback_hosts() {
        assert!(is_loopback("localhost"));
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("[::1]"));
        assert!(!is_loopback("probe.example.com"));
    }
}
