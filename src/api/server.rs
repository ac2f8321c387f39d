use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::monitor::Monitor;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::get_metrics))
        .route("/metrics/stream", get(handlers::stream_metrics))
        .route("/connection", get(handlers::get_connection))
        .route("/system-health", get(handlers::get_system_health))
        .route("/alerts", get(handlers::get_alerts))
        .route("/feedback", get(handlers::get_feedback))
        .route(
            "/diagnostics",
            get(handlers::list_diagnostics).post(handlers::run_diagnostics),
        )
        .route(
            "/improvements",
            get(handlers::list_improvements).post(handlers::run_improvement),
        )
        .route("/improvements/latest", get(handlers::latest_improvement))
        .route("/optimize/:target", post(handlers::optimize))
        .route("/loops", get(handlers::list_loops))
        .layer(CorsLayer::permissive())
        .with_state(state.monitor)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    serve_until(state, port, std::future::pending()).await
}

/// Serves until `shutdown` resolves, then drains open connections.
pub async fn serve_until<F>(state: AppState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    log::info!("pulsewatch API listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
