use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::api::error::ApiError;
use crate::channel::OptimizeTarget;
use crate::monitor::Monitor;
use crate::scheduler::TickRecord;
use crate::types::{
    Alert, DiagnosticsHistoryEntry, ImprovementHistoryEntry, ImprovementMetrics,
    ImprovementOutcome, MetricsSnapshot, SystemHealth,
};

#[derive(Serialize)]
pub struct ConnectionResponse {
    pub state: String,
    pub url: String,
    pub attempts: u32,
    pub pending_requests: usize,
}

#[derive(Serialize)]
pub struct FeedbackResponse {
    pub feedback: String,
}

pub async fn health_check(State(monitor): State<Arc<Monitor>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "running": monitor.is_running(),
    }))
}

pub async fn get_metrics(
    State(monitor): State<Arc<Monitor>>,
) -> Result<Json<MetricsSnapshot>, ApiError> {
    monitor
        .latest_metrics()
        .map(|snapshot| Json((*snapshot).clone()))
        .ok_or_else(|| ApiError::NotFound("no metrics received yet".to_string()))
}

/// Server-sent events: the cached snapshot first, then every new one.
pub async fn stream_metrics(
    State(monitor): State<Arc<Monitor>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<MetricsSnapshot>>();
    let subscription = monitor.subscribe_metrics(move |snapshot| {
        let _ = tx.send(snapshot);
    });

    let stream = async_stream::stream! {
        let _subscription = subscription;
        while let Some(snapshot) = rx.recv().await {
            yield Event::default().event("metrics").json_data(snapshot.as_ref());
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn get_connection(State(monitor): State<Arc<Monitor>>) -> Json<ConnectionResponse> {
    let channel = monitor.channel();
    Json(ConnectionResponse {
        state: monitor.connection_state().as_str().to_string(),
        url: channel.config().url.clone(),
        attempts: channel.attempts(),
        pending_requests: channel.pending_requests(),
    })
}

pub async fn get_system_health(State(monitor): State<Arc<Monitor>>) -> Json<SystemHealth> {
    Json((*monitor.health()).clone())
}

pub async fn get_alerts(State(monitor): State<Arc<Monitor>>) -> Json<Vec<Alert>> {
    Json((*monitor.alerts()).clone())
}

pub async fn get_feedback(State(monitor): State<Arc<Monitor>>) -> Json<FeedbackResponse> {
    Json(FeedbackResponse {
        feedback: (*monitor.feedback()).clone(),
    })
}

pub async fn list_diagnostics(
    State(monitor): State<Arc<Monitor>>,
) -> Json<Vec<DiagnosticsHistoryEntry>> {
    Json(monitor.diagnostics_history())
}

pub async fn run_diagnostics(State(monitor): State<Arc<Monitor>>) -> Json<SystemHealth> {
    let health = monitor.trigger_user_diagnostics().await;
    Json((*health).clone())
}

pub async fn list_improvements(
    State(monitor): State<Arc<Monitor>>,
) -> Json<Vec<ImprovementHistoryEntry>> {
    Json(monitor.improvement_history())
}

pub async fn run_improvement(State(monitor): State<Arc<Monitor>>) -> Json<ImprovementOutcome> {
    Json(monitor.trigger_user_improvement().await)
}

pub async fn latest_improvement(
    State(monitor): State<Arc<Monitor>>,
) -> Result<Json<ImprovementMetrics>, ApiError> {
    monitor
        .improvement_metrics()
        .map(|metrics| Json((*metrics).clone()))
        .ok_or_else(|| ApiError::NotFound("no improvement cycle has run yet".to_string()))
}

pub async fn optimize(
    State(monitor): State<Arc<Monitor>>,
    Path(target): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let target = OptimizeTarget::parse(&target)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown optimization target '{}'", target)))?;
    let reply = monitor.optimize(target).await?;
    Ok(Json(json!({ "event": target.event(), "reply": reply })))
}

pub async fn list_loops(State(monitor): State<Arc<Monitor>>) -> Json<BTreeMap<String, TickRecord>> {
    Json(monitor.loop_ticks())
}
