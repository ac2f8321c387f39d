use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub network: f64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub throughput: f64,
    #[serde(default)]
    pub latency: f64,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub node_count: u32,
    #[serde(default)]
    pub subsystems: BTreeMap<String, SubsystemMetrics>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsystemMetrics {
    #[serde(default)]
    pub throughput: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub health: f64,
    #[serde(default)]
    pub status: String,
}

/// Input of the external risk scorer, in this fixed order:
/// cpu, memory, network, latency, throughput, error rate.
pub type FeatureVector = [f64; 6];

impl MetricsSnapshot {
    pub fn new(cpu: f64, memory: f64, network: f64, error_rate: f64, throughput: f64) -> Self {
        Self {
            cpu,
            memory,
            network,
            error_rate,
            throughput,
            latency: 0.0,
            uptime: 0.0,
            node_count: 0,
            subsystems: BTreeMap::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_latency(mut self, latency: f64) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_subsystem(mut self, name: impl Into<String>, subsystem: SubsystemMetrics) -> Self {
        self.subsystems.insert(name.into(), subsystem);
        self
    }

    /// Weighted score shared by the diagnostics and improvement loops.
    pub fn performance_score(&self) -> f64 {
        0.2 * self.cpu
            + 0.2 * self.memory
            + 0.2 * self.network
            + 0.2 * self.throughput
            + 0.2 * (100.0 - 10.0 * self.error_rate)
    }

    pub fn features(&self) -> FeatureVector {
        [
            self.cpu,
            self.memory,
            self.network,
            self.latency,
            self.throughput,
            self.error_rate,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_score_weights() {
        let snapshot = MetricsSnapshot::new(90.0, 50.0, 10.0, 0.0, 80.0);
        assert!((snapshot.performance_score() - 66.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_rate_penalty() {
        let snapshot = MetricsSnapshot::new(0.0, 0.0, 0.0, 5.0, 0.0);
        assert!((snapshot.performance_score() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_feature_order() {
        let snapshot = MetricsSnapshot::new(1.0, 2.0, 3.0, 6.0, 5.0).with_latency(4.0);
        assert_eq!(snapshot.features(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_wire_format_defaults() {
        let json = serde_json::json!({
            "cpu": 42.5,
            "errorRate": 1.5,
            "nodeCount": 3,
            "subsystems": {
                "inference": { "accuracy": 0.97, "health": 88.0, "status": "ok" }
            }
        });

        let snapshot: MetricsSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(snapshot.cpu, 42.5);
        assert_eq!(snapshot.error_rate, 1.5);
        assert_eq!(snapshot.memory, 0.0);
        assert_eq!(snapshot.node_count, 3);
        assert_eq!(snapshot.subsystems["inference"].accuracy, Some(0.97));
        assert_eq!(snapshot.subsystems["inference"].throughput, None);
    }
}
