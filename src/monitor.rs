use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::Subscription;
use crate::channel::{Connector, OptimizeTarget, TelemetryChannel, WsConnector};
use crate::config::Config;
use crate::diagnostics::DiagnosticsEngine;
use crate::error::Result;
use crate::improvement::ImprovementLoop;
use crate::providers::{DisabledScorer, HttpRiskScorer, RiskScorer};
use crate::scheduler::{Scheduler, TickRecord};
use crate::types::{
    Alert, ConnectionState, DiagnosticsHistoryEntry, ImprovementHistoryEntry, ImprovementMetrics,
    ImprovementOutcome, MetricsSnapshot, SystemHealth,
};

fn period(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

/// Composition root: one channel, one diagnostics engine, one improvement
/// loop and the scheduler driving them.
pub struct Monitor {
    config: Config,
    channel: Arc<TelemetryChannel>,
    diagnostics: DiagnosticsEngine,
    improvement: ImprovementLoop,
    scheduler: Scheduler,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Monitor {
    pub fn new(config: Config, connector: Arc<dyn Connector>, scorer: Arc<dyn RiskScorer>) -> Self {
        let channel = TelemetryChannel::new(config.channel.clone(), connector);
        let diagnostics =
            DiagnosticsEngine::new(channel.clone(), scorer, config.diagnostics.clone());
        let improvement =
            ImprovementLoop::new(channel.clone(), diagnostics.clone(), config.improvement.clone());

        Self {
            config,
            channel,
            diagnostics,
            improvement,
            scheduler: Scheduler::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// WebSocket transport, plus the HTTP scorer when one is configured.
    pub fn from_config(config: Config) -> Result<Self> {
        let scorer: Arc<dyn RiskScorer> = match &config.scorer.url {
            Some(url) => Arc::new(HttpRiskScorer::new(
                url.clone(),
                Duration::from_millis(config.scorer.timeout_ms),
            )?),
            None => {
                log::info!("no risk scorer configured; predictive maintenance disabled");
                Arc::new(DisabledScorer)
            }
        };
        Ok(Self::new(config, Arc::new(WsConnector), scorer))
    }

    /// Connects and schedules the health, repair, predictive and improvement
    /// loops. Returns the state reached by the first connection attempt;
    /// later calls only report the current state.
    pub async fn start(&self) -> ConnectionState {
        if self.started.swap(true, Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
            return self.channel.connection_state();
        }

        let state = self.channel.connect().await;
        log::info!("monitor started, channel {}", state.as_str());

        let diagnostics = self.diagnostics.clone();
        self.scheduler.every(
            "health",
            period(self.config.diagnostics.interval_secs),
            move || {
                let diagnostics = diagnostics.clone();
                async move {
                    diagnostics.check_health().await;
                }
            },
        );

        let diagnostics = self.diagnostics.clone();
        self.scheduler.every(
            "repair",
            period(self.config.diagnostics.repair_interval_secs),
            move || {
                let diagnostics = diagnostics.clone();
                async move {
                    let report = diagnostics.auto_repair().await;
                    if !report.failed.is_empty() {
                        log::warn!("{} repairs failed", report.failed.len());
                    }
                }
            },
        );

        let diagnostics = self.diagnostics.clone();
        self.scheduler.every(
            "predictive",
            period(self.config.diagnostics.predictive_interval_secs),
            move || {
                let diagnostics = diagnostics.clone();
                async move {
                    if let Err(e) = diagnostics.predictive_maintenance().await {
                        log::warn!("predictive maintenance failed: {}", e);
                    }
                }
            },
        );

        let improvement = self.improvement.clone();
        self.scheduler.every(
            "improvement",
            period(self.config.improvement.interval_secs),
            move || {
                let improvement = improvement.clone();
                async move {
                    improvement.run_cycle().await;
                }
            },
        );

        state
    }

    /// Stops every loop and in-flight repair, then the channel. Only the
    /// first call does anything.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.shutdown().await;
        self.diagnostics.shutdown().await;
        self.channel.shutdown().await;
        log::info!("monitor stopped");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channel(&self) -> &Arc<TelemetryChannel> {
        &self.channel
    }

    pub fn diagnostics(&self) -> &DiagnosticsEngine {
        &self.diagnostics
    }

    pub fn improvement(&self) -> &ImprovementLoop {
        &self.improvement
    }

    pub fn subscribe_metrics<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<MetricsSnapshot>) + Send + Sync + 'static,
    {
        self.channel.subscribe_metrics(callback)
    }

    pub fn latest_metrics(&self) -> Option<Arc<MetricsSnapshot>> {
        self.channel.latest_metrics()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.connection_state()
    }

    pub fn health(&self) -> Arc<SystemHealth> {
        self.diagnostics.health()
    }

    pub fn alerts(&self) -> Arc<Vec<Alert>> {
        self.diagnostics.alerts()
    }

    pub fn feedback(&self) -> Arc<String> {
        self.diagnostics.feedback()
    }

    pub fn diagnostics_history(&self) -> Vec<DiagnosticsHistoryEntry> {
        self.diagnostics.history()
    }

    pub fn improvement_history(&self) -> Vec<ImprovementHistoryEntry> {
        self.improvement.history()
    }

    pub fn improvement_metrics(&self) -> Option<Arc<ImprovementMetrics>> {
        self.improvement.metrics()
    }

    pub async fn trigger_user_diagnostics(&self) -> Arc<SystemHealth> {
        self.diagnostics.trigger_user_diagnostics().await
    }

    pub async fn trigger_user_improvement(&self) -> ImprovementOutcome {
        self.improvement.trigger_user_improvement().await
    }

    pub async fn optimize(&self, target: OptimizeTarget) -> Result<Value> {
        self.channel.optimize(target).await
    }

    pub fn loop_ticks(&self) -> BTreeMap<String, TickRecord> {
        self.scheduler.ticks()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }
}
