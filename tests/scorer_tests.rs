use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pulsewatch::providers::{HttpRiskScorer, RiskScorer};

/// Serves `router` on an ephemeral loopback port and returns its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_assess_posts_feature_vector() {
    let received: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let sink = received.clone();
    let router = Router::new()
        .route(
            "/predict",
            post(move |Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    *sink.lock().unwrap() = Some(body);
                    Json(json!({"risk": 0.85, "issues": ["CPU overload"]}))
                }
            }),
        )
        .route("/health", get(|| async { "ok" }));
    let url = serve(router).await;

    let scorer = HttpRiskScorer::new(format!("{}/", url), Duration::from_secs(2)).unwrap();
    assert!(scorer.ready().await.unwrap());

    let assessment = scorer
        .assess(&[91.0, 40.0, 20.0, 120.0, 55.0, 1.5])
        .await
        .unwrap();
    assert_eq!(assessment.risk, 0.85);
    assert_eq!(assessment.issues, vec!["CPU overload".to_string()]);
    assert_eq!(
        received.lock().unwrap().clone().unwrap(),
        json!({"features": [91.0, 40.0, 20.0, 120.0, 55.0, 1.5]})
    );
}

#[tokio::test]
async fn test_out_of_range_risk_is_clamped() {
    let router = Router::new().route(
        "/predict",
        post(|| async { Json(json!({"risk": 3.2})) }),
    );
    let url = serve(router).await;

    let scorer = HttpRiskScorer::new(url, Duration::from_secs(2)).unwrap();
    let assessment = scorer.assess(&[0.0; 6]).await.unwrap();
    assert_eq!(assessment.risk, 1.0);
    assert!(assessment.issues.is_empty());
}

#[tokio::test]
async fn test_server_error_is_a_scorer_error() {
    let router = Router::new()
        .route(
            "/predict",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
        )
        .route(
            "/health",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
    let url = serve(router).await;

    let scorer = HttpRiskScorer::new(url, Duration::from_secs(2)).unwrap();
    assert!(!scorer.ready().await.unwrap());

    let err = scorer.assess(&[0.0; 6]).await.unwrap_err();
    assert!(err.to_string().contains("model not loaded"));
}
