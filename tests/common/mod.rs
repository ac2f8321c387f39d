//! In-memory remote entity for integration tests.
//!
//! `LoopbackConnector` hands the channel one end of a pair of unbounded
//! queues per connect call and queues the other end as a `Remote` that the
//! test drives by hand or through `spawn_responder`.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use pulsewatch::channel::{Connector, Duplex};
use pulsewatch::config::ChannelConfig;
use pulsewatch::providers::RiskScorer;
use pulsewatch::types::{FeatureVector, RiskAssessment};
use pulsewatch::{PulseError, Result};

pub struct LoopbackConnector {
    refuse: AtomicBool,
    calls: AtomicUsize,
    remotes: tokio::sync::mpsc::UnboundedSender<Remote>,
}

pub struct Remotes {
    rx: tokio::sync::mpsc::UnboundedReceiver<Remote>,
}

impl Remotes {
    pub async fn next(&mut self) -> Remote {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("no connection within 5s")
            .expect("connector dropped")
    }
}

impl LoopbackConnector {
    pub fn new() -> (Arc<Self>, Remotes) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Arc::new(Self {
                refuse: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                remotes: tx,
            }),
            Remotes { rx },
        )
    }

    pub fn refusing() -> Arc<Self> {
        let (connector, _remotes) = Self::new();
        connector.refuse.store(true, Ordering::SeqCst);
        connector
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, url: &str) -> Result<Duplex> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PulseError::Connection(format!("{} refused", url)));
        }

        let (client_tx, from_client) = mpsc::unbounded::<String>();
        let (to_client, client_rx) = mpsc::unbounded::<String>();

        let _ = self.remotes.send(Remote {
            from_client,
            to_client,
        });

        Ok(Duplex {
            sink: Box::pin(client_tx.sink_map_err(|e| PulseError::Connection(e.to_string()))),
            stream: Box::pin(client_rx.map(Ok::<String, PulseError>)),
        })
    }
}

/// The monitored entity's side of one session.
pub struct Remote {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl Remote {
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.from_client.next())
            .await
            .expect("no frame within 5s")
            .expect("client closed the session");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Next frame that is not one of the listed events.
    pub async fn next_frame_except(&mut self, skip: &[&str]) -> Value {
        loop {
            let frame = self.next_frame().await;
            if !skip.contains(&frame["event"].as_str().unwrap_or_default()) {
                return frame;
            }
        }
    }

    pub fn send(&self, frame: Value) {
        let _ = self.to_client.unbounded_send(frame.to_string());
    }

    pub fn push_metrics(&self, data: Value) {
        self.send(json!({ "event": "metrics", "data": data }));
    }

    pub fn ack(&self, id: &Value, data: Value) {
        self.send(json!({ "event": "ack", "id": id, "data": { "success": true, "data": data } }));
    }

    pub fn reject(&self, id: &Value, reason: &str) {
        self.send(json!({ "event": "ack", "id": id, "data": { "success": false, "error": reason } }));
    }

    pub fn respond(&self, event: &str, id: &Value, data: Value) {
        self.send(json!({ "event": event, "id": id, "data": data }));
    }

    /// Ends the session from the remote side.
    pub fn hang_up(self) {}
}

/// Behaviour of an automatic remote.
#[derive(Clone)]
pub struct ResponderScript {
    pub disk_usage: f64,
    pub system_metrics: Option<Value>,
    pub reject: HashSet<String>,
}

impl Default for ResponderScript {
    fn default() -> Self {
        Self {
            disk_usage: 40.0,
            system_metrics: None,
            reject: HashSet::new(),
        }
    }
}

/// Answers every request on `remote` per `script` and records every
/// `command` frame's `data`. The remote is pushed `initial` metrics first.
pub fn spawn_responder(
    mut remote: Remote,
    script: ResponderScript,
    initial: Option<Value>,
) -> (Arc<Mutex<Vec<Value>>>, JoinHandle<()>) {
    let commands = Arc::new(Mutex::new(Vec::new()));
    let recorded = commands.clone();

    let handle = tokio::spawn(async move {
        if let Some(metrics) = initial {
            remote.push_metrics(metrics);
        }
        while let Some(text) = remote.from_client.next().await {
            let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            let id = frame["id"].clone();
            match frame["event"].as_str().unwrap_or_default() {
                "command" => {
                    let command_type = frame["data"]["type"].as_str().unwrap_or_default().to_string();
                    recorded.lock().unwrap().push(frame["data"].clone());
                    if script.reject.contains(&command_type) {
                        remote.reject(&id, "refused by remote");
                    } else {
                        remote.ack(&id, json!({ "applied": command_type }));
                    }
                }
                "requestDiskMetrics" => {
                    remote.respond("diskMetrics", &id, json!({ "usage": script.disk_usage }));
                }
                "requestSystemMetrics" => {
                    if let Some(metrics) = &script.system_metrics {
                        remote.respond("systemMetrics", &id, metrics.clone());
                    }
                }
                _ => remote.ack(&id, Value::Null),
            }
        }
    });

    (commands, handle)
}

pub fn fast_channel_config(max_attempts: u32) -> ChannelConfig {
    ChannelConfig {
        url: "ws://127.0.0.1:9/telemetry".to_string(),
        max_attempts,
        retry_delay_ms: 1000,
        ack_timeout_ms: 500,
    }
}

pub struct MockScorer {
    pub risk: f64,
    pub issues: Vec<String>,
    pub ready: bool,
    pub seen: Mutex<Vec<FeatureVector>>,
}

impl MockScorer {
    pub fn new(risk: f64, issues: &[&str]) -> Self {
        Self {
            risk,
            issues: issues.iter().map(|s| s.to_string()).collect(),
            ready: true,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RiskScorer for MockScorer {
    async fn assess(&self, features: &FeatureVector) -> Result<RiskAssessment> {
        self.seen.lock().unwrap().push(*features);
        Ok(RiskAssessment {
            risk: self.risk,
            issues: self.issues.clone(),
            assessed_at: chrono::Utc::now(),
        })
    }

    async fn ready(&self) -> Result<bool> {
        Ok(self.ready)
    }
}

/// Polls `condition` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
