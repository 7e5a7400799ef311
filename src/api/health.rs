//! 健康检查 API

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_seconds: i64,
    repository: String,
    target_dir: String,
    branch: String,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// GET /health，无需认证
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    Json(HealthResponse {
        status: "ok",
        service: "deploy-runner",
        version: VERSION,
        timestamp: now.to_rfc3339(),
        uptime_seconds: (now - state.started_at).num_seconds(),
        repository: state.deployment.repository().to_string(),
        target_dir: state.deployment.target_dir().to_string(),
        branch: state.deployment.branch().to_string(),
    })
}
