use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use sentinel_core::{InstanceStatus, StatusRegistry};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use tower_http::trace::TraceLayer;

/// 状态接口共享状态
#[derive(Clone)]
pub struct ApiState {
    pub status: StatusRegistry,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(status: StatusRegistry) -> Self {
        Self {
            status,
            started_at: Utc::now(),
        }
    }
}

/// API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 实例未找到
    InstanceNotFound(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InstanceNotFound(id) => write!(f, "Instance not found: {}", id),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub instances: usize,
    pub unhealthy: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub instances: Vec<InstanceStatus>,
}

/// 创建 API 路由
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(list_status))
        .route("/status/:instance_id", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 健康检查
///
/// 进程存活即返回 200，连续失败的实例列在 `unhealthy` 中。
async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let all = state.status.all().await;
    let unhealthy = all
        .iter()
        .filter(|s| !s.healthy())
        .map(|s| s.instance_id.clone())
        .collect();

    Json(HealthResponse {
        status: "ok",
        started_at: state.started_at,
        instances: all.len(),
        unhealthy,
    })
}

async fn list_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        instances: state.status.all().await,
    })
}

async fn get_status(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
) -> Result<Json<InstanceStatus>, ApiError> {
    state
        .status
        .get(&instance_id)
        .await
        .map(Json)
        .ok_or(ApiError::InstanceNotFound(instance_id))
}
