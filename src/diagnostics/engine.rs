use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinSet;

use super::checks::{default_checks, CheckContext, HealthCheck};
use super::repair::{RepairAction, RepairReport, RepairStrategies};
use crate::broadcast::{Broadcast, Subscription};
use crate::channel::TelemetryChannel;
use crate::config::DiagnosticsConfig;
use crate::error::{PulseError, Result};
use crate::providers::RiskScorer;
use crate::types::{
    Alert, AlertLevel, ConnectionState, DiagnosticResult, DiagnosticsHistoryEntry, RiskAssessment,
    SystemHealth,
};

/// Self-diagnostics and auto-repair on top of a telemetry channel.
///
/// Cheap to clone; every clone drives the same engine. Runs are serialized:
/// a second `run_diagnostics` waits for the one in progress.
#[derive(Clone)]
pub struct DiagnosticsEngine {
    inner: Arc<Inner>,
}

struct Inner {
    channel: Arc<TelemetryChannel>,
    scorer: Arc<dyn RiskScorer>,
    checks: Vec<Box<dyn HealthCheck>>,
    strategies: RepairStrategies,
    config: DiagnosticsConfig,
    run_lock: tokio::sync::Mutex<()>,
    runs_completed: AtomicU64,
    latest_results: RwLock<Vec<DiagnosticResult>>,
    history: RwLock<Vec<DiagnosticsHistoryEntry>>,
    latest_risk: RwLock<Option<RiskAssessment>>,
    health: Broadcast<SystemHealth>,
    alerts: Broadcast<Vec<Alert>>,
    feedback: Broadcast<String>,
    repairs: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

enum Applied {
    Repaired,
    Deferred(&'static str),
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason.to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "panicked".to_string()
    }
}

async fn run_isolated(check: &dyn HealthCheck, ctx: &CheckContext<'_>) -> DiagnosticResult {
    let name = check.name().to_string();
    let failure = match AssertUnwindSafe(check.run(ctx)).catch_unwind().await {
        Ok(Ok(result)) => return result,
        Ok(Err(failure @ PulseError::CheckFailure { .. })) => failure,
        Ok(Err(e)) => PulseError::CheckFailure {
            check: name.clone(),
            reason: e.to_string(),
        },
        Err(payload) => PulseError::CheckFailure {
            check: name.clone(),
            reason: panic_reason(payload.as_ref()),
        },
    };

    log::error!("{}", failure);
    DiagnosticResult::error(name, failure.to_string())
}

impl DiagnosticsEngine {
    pub fn new(
        channel: Arc<TelemetryChannel>,
        scorer: Arc<dyn RiskScorer>,
        config: DiagnosticsConfig,
    ) -> Self {
        Self::with_parts(
            channel,
            scorer,
            config,
            default_checks(),
            RepairStrategies::standard(),
        )
    }

    pub fn with_parts(
        channel: Arc<TelemetryChannel>,
        scorer: Arc<dyn RiskScorer>,
        config: DiagnosticsConfig,
        checks: Vec<Box<dyn HealthCheck>>,
        strategies: RepairStrategies,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                scorer,
                checks,
                strategies,
                config,
                run_lock: tokio::sync::Mutex::new(()),
                runs_completed: AtomicU64::new(0),
                latest_results: RwLock::new(Vec::new()),
                history: RwLock::new(Vec::new()),
                latest_risk: RwLock::new(None),
                health: Broadcast::with_initial(SystemHealth::default()),
                alerts: Broadcast::with_initial(Vec::new()),
                feedback: Broadcast::with_initial(String::new()),
                repairs: Mutex::new(JoinSet::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Runs the whole battery once and returns its results in battery order.
    /// Remediation for any issues found is spawned as a follow-up task when
    /// `repair_after_run` is set; this call never waits on it.
    pub async fn run_diagnostics(&self) -> Vec<DiagnosticResult> {
        let results = self.run_battery().await;
        self.schedule_repair(issues_of(&results));
        results
    }

    async fn run_battery(&self) -> Vec<DiagnosticResult> {
        let _run = self.inner.run_lock.lock().await;

        let ctx = CheckContext {
            channel: self.inner.channel.as_ref(),
            scorer: self.inner.scorer.as_ref(),
            snapshot: self.inner.channel.latest_metrics(),
        };
        let results = join_all(
            self.inner
                .checks
                .iter()
                .map(|check| run_isolated(check.as_ref(), &ctx)),
        )
        .await;

        let timestamp = Utc::now();
        *self
            .inner
            .latest_results
            .write()
            .unwrap_or_else(|e| e.into_inner()) = results.clone();
        self.inner
            .history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(DiagnosticsHistoryEntry {
                timestamp,
                results: results.clone(),
            });
        let run = self.inner.runs_completed.fetch_add(1, Ordering::SeqCst) + 1;

        let failing = results.iter().filter(|r| !r.status.is_success()).count();
        log::info!(
            "diagnostics run {} finished: {}/{} checks passing",
            run,
            results.len() - failing,
            results.len()
        );
        results
    }

    fn schedule_repair(&self, issues: Vec<String>) {
        if issues.is_empty()
            || !self.inner.config.repair_after_run
            || self.inner.closed.load(Ordering::SeqCst)
        {
            return;
        }
        let engine = self.clone();
        let mut repairs = self.inner.repairs.lock().unwrap_or_else(|e| e.into_inner());
        while repairs.try_join_next().is_some() {}
        repairs.spawn(async move {
            engine.repair_issues(&issues).await;
        });
    }

    /// Post-run repairs still in flight.
    pub fn pending_repairs(&self) -> usize {
        let mut repairs = self.inner.repairs.lock().unwrap_or_else(|e| e.into_inner());
        while repairs.try_join_next().is_some() {}
        repairs.len()
    }

    /// Aborts in-flight post-run repairs and stops scheduling new ones.
    /// Only the first call has any effect.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut repairs = std::mem::take(
            &mut *self.inner.repairs.lock().unwrap_or_else(|e| e.into_inner()),
        );
        let aborted = repairs.len();
        repairs.shutdown().await;
        if aborted > 0 {
            log::info!("aborted {} post-run repairs", aborted);
        }
    }

    /// Runs diagnostics, then recomputes and publishes health and alerts.
    pub async fn check_health(&self) -> Arc<SystemHealth> {
        let results = self.run_battery().await;
        let health = SystemHealth::from_results(&results, self.inner.config.issue_penalty, Utc::now());
        let alerts: Vec<Alert> = results.iter().filter_map(Alert::from_result).collect();

        if health.issues.is_empty() {
            log::debug!("system health {:.0}", health.overall);
        } else {
            log::warn!(
                "system health {:.0} with {} open issues",
                health.overall,
                health.issues.len()
            );
        }

        let issues = health.issues.clone();
        let health = self.inner.health.publish(health);
        self.inner.alerts.publish(alerts);
        self.schedule_repair(issues);
        health
    }

    /// Repairs whatever the last health check left open.
    pub async fn auto_repair(&self) -> RepairReport {
        let issues = self.health().issues.clone();
        if issues.is_empty() {
            log::debug!("auto repair: nothing to do");
            return RepairReport::default();
        }
        self.repair_issues(&issues).await
    }

    /// Scores the latest snapshot and repairs the predicted issues when the
    /// risk crosses `risk_threshold`. `Ok(None)` means there was nothing to
    /// score yet.
    pub async fn predictive_maintenance(&self) -> Result<Option<RiskAssessment>> {
        let Some(snapshot) = self.inner.channel.latest_metrics() else {
            log::debug!("predictive maintenance skipped: no metrics yet");
            return Ok(None);
        };

        let assessment = self.inner.scorer.assess(&snapshot.features()).await?;
        *self
            .inner
            .latest_risk
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(assessment.clone());

        if assessment.risk > self.inner.config.risk_threshold {
            log::warn!(
                "predicted failure risk {:.2} above {:.2}: {:?}",
                assessment.risk,
                self.inner.config.risk_threshold,
                assessment.issues
            );
            self.repair_issues(&assessment.issues).await;
        } else {
            log::debug!("predicted failure risk {:.2}", assessment.risk);
        }

        Ok(Some(assessment))
    }

    /// One attempt per issue, in order. Failures escalate and never stop the
    /// remaining issues.
    pub async fn repair_issues(&self, issues: &[String]) -> RepairReport {
        let mut report = RepairReport::default();

        for issue in issues {
            let action = match self.inner.strategies.resolve(issue) {
                Ok(action) => action,
                Err(e) => {
                    log::warn!("{}", e);
                    self.escalate(format!("unresolved: {}", issue));
                    report.unresolved.push(issue.clone());
                    continue;
                }
            };

            match self.apply(action).await {
                Ok(Applied::Deferred(reason)) => {
                    log::debug!("deferring '{}': {}", issue, reason);
                    report.deferred.push(issue.clone());
                }
                Ok(Applied::Repaired) => {
                    log::info!("repaired '{}'", issue);
                    self.inner.feedback.publish(format!("Repaired: {}", issue));
                    report.repaired.push(issue.clone());
                }
                Err(e) => {
                    let failure = PulseError::RepairFailure {
                        issue: issue.clone(),
                        reason: e.to_string(),
                    };
                    log::error!("{}", failure);
                    self.escalate(format!("repair failed: {}", issue));
                    self.inner
                        .feedback
                        .publish(format!("Failed to repair: {}", issue));
                    report.failed.push(issue.clone());
                }
            }
        }

        report
    }

    async fn apply(&self, action: RepairAction) -> Result<Applied> {
        let channel = &self.inner.channel;
        match action {
            RepairAction::Dispatch(command) => {
                channel.dispatch(&command).await?;
                Ok(Applied::Repaired)
            }
            RepairAction::Defer => Ok(Applied::Deferred("informational")),
            RepairAction::Reconnect if channel.gave_up() => Err(PulseError::Connection(
                "reconnect limit reached; waiting for a manual connect".to_string(),
            )),
            RepairAction::Reconnect if channel.is_supervising() => {
                Ok(Applied::Deferred("reconnect already in progress"))
            }
            RepairAction::Reconnect => match channel.connect().await {
                ConnectionState::Connected => Ok(Applied::Repaired),
                state => Err(PulseError::Connection(format!(
                    "reconnect ended in state {}",
                    state.as_str()
                ))),
            },
        }
    }

    /// Appends an escalated alert unless the current list already carries it.
    fn escalate(&self, message: String) {
        self.inner.alerts.update(|alerts| {
            let open = alerts
                .iter()
                .any(|a| a.level == AlertLevel::Escalated && a.message == message);
            if !open {
                alerts.push(Alert::new(message, AlertLevel::Escalated));
            }
        });
    }

    pub async fn trigger_user_diagnostics(&self) -> Arc<SystemHealth> {
        self.inner
            .feedback
            .publish("Running diagnostics...".to_string());
        let health = self.check_health().await;
        self.inner
            .feedback
            .publish("Diagnostics complete".to_string());
        health
    }

    pub fn health(&self) -> Arc<SystemHealth> {
        self.inner.health.latest().unwrap_or_default()
    }

    pub fn alerts(&self) -> Arc<Vec<Alert>> {
        self.inner.alerts.latest().unwrap_or_default()
    }

    pub fn feedback(&self) -> Arc<String> {
        self.inner.feedback.latest().unwrap_or_default()
    }

    pub fn history(&self) -> Vec<DiagnosticsHistoryEntry> {
        self.inner
            .history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn latest_results(&self) -> Vec<DiagnosticResult> {
        self.inner
            .latest_results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn latest_risk(&self) -> Option<RiskAssessment> {
        self.inner
            .latest_risk
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn runs_completed(&self) -> u64 {
        self.inner.runs_completed.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> &Arc<TelemetryChannel> {
        &self.inner.channel
    }

    pub fn subscribe_health<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<SystemHealth>) + Send + Sync + 'static,
    {
        self.inner.health.subscribe(callback)
    }

    pub fn subscribe_alerts<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<Vec<Alert>>) + Send + Sync + 'static,
    {
        self.inner.alerts.subscribe(callback)
    }

    pub fn subscribe_feedback<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<String>) + Send + Sync + 'static,
    {
        self.inner.feedback.subscribe(callback)
    }
}

fn issues_of(results: &[DiagnosticResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| !r.status.is_success())
        .map(|r| r.message.clone())
        .collect()
}
