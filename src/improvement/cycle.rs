use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, RwLock};

use super::rules::{by_priority, derive_actions};
use crate::broadcast::{Broadcast, Subscription};
use crate::channel::TelemetryChannel;
use crate::config::ImprovementConfig;
use crate::diagnostics::DiagnosticsEngine;
use crate::types::{
    Command, DiagnosticStatus, ImprovementAction, ImprovementHistoryEntry, ImprovementMetrics,
    ImprovementOutcome, ImprovementStatus,
};

/// Slow optimization loop: threshold rules over the latest snapshot, each
/// resulting action sent to the remote as its own command.
#[derive(Clone)]
pub struct ImprovementLoop {
    inner: Arc<Inner>,
}

struct Inner {
    channel: Arc<TelemetryChannel>,
    diagnostics: DiagnosticsEngine,
    config: ImprovementConfig,
    cycle_lock: tokio::sync::Mutex<()>,
    status: Broadcast<ImprovementStatus>,
    metrics: Broadcast<ImprovementMetrics>,
    history: RwLock<Vec<ImprovementHistoryEntry>>,
}

impl ImprovementLoop {
    pub fn new(
        channel: Arc<TelemetryChannel>,
        diagnostics: DiagnosticsEngine,
        config: ImprovementConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                diagnostics,
                config,
                cycle_lock: tokio::sync::Mutex::new(()),
                status: Broadcast::with_initial(ImprovementStatus::Idle),
                metrics: Broadcast::new(),
                history: RwLock::new(Vec::new()),
            }),
        }
    }

    pub async fn run_cycle(&self) -> ImprovementOutcome {
        let _cycle = self.inner.cycle_lock.lock().await;
        self.inner.status.publish(ImprovementStatus::Analyzing);

        let snapshot = self.inner.channel.latest_metrics();
        let actions: Vec<ImprovementAction> = snapshot
            .as_deref()
            .map(|s| derive_actions(s, &self.inner.config))
            .unwrap_or_default();

        let mut outcome = ImprovementOutcome::default();
        match &snapshot {
            None => {
                log::info!("improvement cycle skipped: no metrics available");
                outcome.suggestions.push("no metrics available".to_string());
            }
            Some(_) => {
                self.inner.status.publish(ImprovementStatus::Applying);
                for action in by_priority(&actions) {
                    let command = Command::new(
                        action.action.clone(),
                        json!({
                            "target": action.target,
                            "category": action.category.as_str(),
                            "priority": action.priority.as_str(),
                        }),
                    );
                    match self.inner.channel.dispatch(&command).await {
                        Ok(_) => {
                            log::info!("applied {} {}", action.action, action.target);
                            outcome.applied_count += 1;
                        }
                        Err(e) => {
                            log::warn!("could not {} {}: {}", action.action, action.target, e);
                            outcome
                                .suggestions
                                .push(format!("failed to improve {}", action.target));
                        }
                    }
                }
            }
        }

        for result in self.inner.diagnostics.latest_results() {
            if result.status == DiagnosticStatus::Error {
                outcome
                    .suggestions
                    .push(format!("investigate {}: {}", result.check, result.message));
            }
        }

        let now = Utc::now();
        self.inner.metrics.publish(ImprovementMetrics {
            performance_score: snapshot.as_deref().map_or(0.0, |s| s.performance_score()),
            optimization_level: outcome.applied_count,
            last_improvement: now,
            suggestions: outcome.suggestions.clone(),
        });
        self.inner
            .history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(ImprovementHistoryEntry {
                timestamp: now,
                actions,
                outcome: outcome.clone(),
            });
        self.inner.status.publish(ImprovementStatus::Idle);

        log::info!(
            "improvement cycle finished: {} applied, {} suggestions",
            outcome.applied_count,
            outcome.suggestions.len()
        );
        outcome
    }

    pub async fn trigger_user_improvement(&self) -> ImprovementOutcome {
        log::info!("user requested an improvement cycle");
        self.run_cycle().await
    }

    pub fn status(&self) -> ImprovementStatus {
        self.inner
            .status
            .latest()
            .map(|s| *s)
            .unwrap_or(ImprovementStatus::Idle)
    }

    pub fn metrics(&self) -> Option<Arc<ImprovementMetrics>> {
        self.inner.metrics.latest()
    }

    pub fn history(&self) -> Vec<ImprovementHistoryEntry> {
        self.inner
            .history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn subscribe_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<ImprovementStatus>) + Send + Sync + 'static,
    {
        self.inner.status.subscribe(callback)
    }

    pub fn subscribe_metrics<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<ImprovementMetrics>) + Send + Sync + 'static,
    {
        self.inner.metrics.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Connector, Duplex};
    use crate::config::{ChannelConfig, DiagnosticsConfig};
    use crate::error::{PulseError, Result};
    use crate::providers::DisabledScorer;
    use async_trait::async_trait;

    struct OfflineConnector;

    #[async_trait]
    impl Connector for OfflineConnector {
        async fn connect(&self, _url: &str) -> Result<Duplex> {
            Err(PulseError::Connection("offline".to_string()))
        }
    }

    fn offline_loop() -> ImprovementLoop {
        let channel = TelemetryChannel::new(ChannelConfig::default(), Arc::new(OfflineConnector));
        let diagnostics = DiagnosticsEngine::new(
            channel.clone(),
            Arc::new(DisabledScorer),
            DiagnosticsConfig::default(),
        );
        ImprovementLoop::new(channel, diagnostics, ImprovementConfig::default())
    }

    #[tokio::test]
    async fn test_cycle_without_metrics() {
        let improvement = offline_loop();
        let outcome = improvement.run_cycle().await;

        assert_eq!(outcome.applied_count, 0);
        assert_eq!(outcome.suggestions, vec!["no metrics available".to_string()]);
        assert_eq!(improvement.status(), ImprovementStatus::Idle);

        let metrics = improvement.metrics().unwrap();
        assert_eq!(metrics.optimization_level, 0);
        assert_eq!(metrics.performance_score, 0.0);
        assert_eq!(improvement.history().len(), 1);
    }

    #[tokio::test]
    async fn test_status_sequence() {
        let improvement = offline_loop();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = improvement.subscribe_status(move |s| sink.lock().unwrap().push(*s));

        improvement.trigger_user_improvement().await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ImprovementStatus::Idle,
                ImprovementStatus::Analyzing,
                ImprovementStatus::Idle
            ]
        );
    }
}
