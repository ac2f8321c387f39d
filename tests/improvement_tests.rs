mod common;

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{eventually, fast_channel_config, spawn_responder, LoopbackConnector, ResponderScript};
use pulsewatch::channel::TelemetryChannel;
use pulsewatch::config::{DiagnosticsConfig, ImprovementConfig};
use pulsewatch::diagnostics::DiagnosticsEngine;
use pulsewatch::improvement::ImprovementLoop;
use pulsewatch::providers::DisabledScorer;
use pulsewatch::types::{ImprovementStatus, Priority};

struct Harness {
    channel: Arc<TelemetryChannel>,
    diagnostics: DiagnosticsEngine,
    improvement: ImprovementLoop,
    commands: Arc<Mutex<Vec<Value>>>,
}

async fn harness(script: ResponderScript, metrics: Value) -> Harness {
    let (connector, mut remotes) = LoopbackConnector::new();
    let channel = TelemetryChannel::new(fast_channel_config(3), connector);
    channel.connect().await;
    let (commands, _responder) = spawn_responder(remotes.next().await, script, Some(metrics));
    assert!(eventually(Duration::from_secs(2), || channel.latest_metrics().is_some()).await);

    let diagnostics = DiagnosticsEngine::new(
        channel.clone(),
        Arc::new(DisabledScorer),
        DiagnosticsConfig {
            repair_after_run: false,
            ..DiagnosticsConfig::default()
        },
    );
    let improvement = ImprovementLoop::new(
        channel.clone(),
        diagnostics.clone(),
        ImprovementConfig::default(),
    );

    Harness {
        channel,
        diagnostics,
        improvement,
        commands,
    }
}

fn stressed_metrics() -> Value {
    json!({"cpu": 80.0, "memory": 50.0, "network": 60.0, "throughput": 70.0, "errorRate": 3.0, "latency": 160.0})
}

#[tokio::test]
async fn test_all_threshold_rules_fire() {
    let h = harness(ResponderScript::default(), stressed_metrics()).await;

    let outcome = h.improvement.run_cycle().await;
    assert_eq!(outcome.applied_count, 3);

    let history = h.improvement.history();
    assert_eq!(history.len(), 1);
    let priorities: Vec<Priority> = history[0].actions.iter().map(|a| a.priority).collect();
    assert_eq!(priorities, vec![Priority::High, Priority::Critical, Priority::Medium]);

    let sent: Vec<(String, String)> = h
        .commands
        .lock()
        .unwrap()
        .iter()
        .map(|c| {
            (
                c["type"].as_str().unwrap().to_string(),
                c["payload"]["target"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        sent,
        vec![
            ("enhance".to_string(), "error-handling".to_string()),
            ("optimize".to_string(), "cpu".to_string()),
            ("optimize".to_string(), "network".to_string()),
        ]
    );
    assert_eq!(h.commands.lock().unwrap()[0]["payload"]["priority"], "critical");

    let metrics = h.improvement.metrics().unwrap();
    assert_eq!(metrics.optimization_level, 3);
    assert!((metrics.performance_score - 66.0).abs() < 1e-9);
    assert_eq!(h.improvement.status(), ImprovementStatus::Idle);

    h.channel.shutdown().await;
}

#[tokio::test]
async fn test_failed_action_does_not_stop_the_cycle() {
    let mut script = ResponderScript::default();
    script.reject.insert("enhance".to_string());
    let h = harness(script, stressed_metrics()).await;

    let outcome = h.improvement.trigger_user_improvement().await;

    assert_eq!(outcome.applied_count, 2);
    assert_eq!(outcome.suggestions, vec!["failed to improve error-handling".to_string()]);
    assert_eq!(h.commands.lock().unwrap().len(), 3);
    assert_eq!(h.improvement.metrics().unwrap().optimization_level, 2);

    h.channel.shutdown().await;
}

#[tokio::test]
async fn test_quiet_metrics_produce_no_actions() {
    let h = harness(
        ResponderScript::default(),
        json!({"cpu": 40.0, "memory": 50.0, "network": 60.0, "throughput": 70.0, "errorRate": 0.5, "latency": 90.0}),
    )
    .await;

    let outcome = h.improvement.run_cycle().await;
    assert_eq!(outcome.applied_count, 0);
    assert!(outcome.suggestions.is_empty());
    assert!(h.commands.lock().unwrap().is_empty());
    assert!(h.improvement.history()[0].actions.is_empty());

    h.channel.shutdown().await;
}

#[tokio::test]
async fn test_diagnostic_errors_become_suggestions() {
    let script = ResponderScript {
        disk_usage: 95.0,
        ..ResponderScript::default()
    };
    let h = harness(
        script,
        json!({"cpu": 40.0, "memory": 50.0, "network": 90.0, "throughput": 90.0, "errorRate": 0.0}),
    )
    .await;

    h.diagnostics.check_health().await;
    let outcome = h.improvement.run_cycle().await;

    assert_eq!(
        outcome.suggestions,
        vec!["investigate storage: storage-pressure: disk usage 95.0%".to_string()]
    );

    h.channel.shutdown().await;
}

#[tokio::test]
async fn test_cycles_are_serialized() {
    let h = harness(ResponderScript::default(), stressed_metrics()).await;
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = statuses.clone();
    let _sub = h
        .improvement
        .subscribe_status(move |s| sink.lock().unwrap().push(*s));

    let (first, second) = tokio::join!(h.improvement.run_cycle(), h.improvement.run_cycle());
    assert_eq!(first.applied_count + second.applied_count, 6);
    assert_eq!(h.improvement.history().len(), 2);

    let statuses = statuses.lock().unwrap();
    assert_eq!(
        *statuses,
        vec![
            ImprovementStatus::Idle,
            ImprovementStatus::Analyzing,
            ImprovementStatus::Applying,
            ImprovementStatus::Idle,
            ImprovementStatus::Analyzing,
            ImprovementStatus::Applying,
            ImprovementStatus::Idle,
        ]
    );
}
