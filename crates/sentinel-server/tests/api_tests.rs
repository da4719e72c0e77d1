use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use chrono::Utc;
use sentinel_core::{CycleSummary, StatusRegistry};
use sentinel_server::{create_router, ApiState};
use serde_json::Value;
use tower::ServiceExt;

async fn get_json(state: ApiState, uri: &str) -> (StatusCode, Value) {
    let app = create_router(state);
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn registry() -> StatusRegistry {
    let status = StatusRegistry::new();
    status.register("pg-main").await;
    status.register("pg-report").await;
    status
        .record_success(
            "pg-main",
            Utc::now(),
            CycleSummary {
                findings: 3,
                emitted: 2,
                suppressed: 1,
                degraded: vec!["pg_stat_kcache".to_string()],
                ..Default::default()
            },
        )
        .await;
    status
        .record_failure("pg-report", Utc::now(), "Data unavailable: timed out".to_string())
        .await;
    status
}

#[tokio::test]
async fn test_health_check() {
    let (status, body) = get_json(ApiState::new(registry().await), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["instances"], 2);
    assert_eq!(body["unhealthy"], serde_json::json!(["pg-report"]));
}

#[tokio::test]
async fn test_status_lists_instances() {
    let (status, body) = get_json(ApiState::new(registry().await), "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instances"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_instance_status() {
    let (status, body) = get_json(ApiState::new(registry().await), "/status/pg-main").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instance_id"], "pg-main");
    assert_eq!(body["alerts_emitted"], 2);
    assert_eq!(body["degraded"], serde_json::json!(["pg_stat_kcache"]));
    assert_eq!(body["consecutive_failures"], 0);
}

#[tokio::test]
async fn test_unknown_instance_returns_404() {
    let (status, body) = get_json(ApiState::new(registry().await), "/status/pg-missing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
    assert_eq!(body["error"], "Instance not found: pg-missing");
}
