//! 部署管理 API
//!
//! 包含 /deploy, /deployments, /deployments/:id 端点

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::RunOutcome;
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::{verify_trigger, TriggerRequest};
use crate::services;
use crate::state::{AppState, RunRecord};

/// 触发部署响应
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    /// 运行记录 ID
    pub id: u64,
    pub run_id: String,
    /// 错误列表为空即成功
    pub status: bool,
    pub state: &'static str,
    pub outcome: Option<RunOutcome>,
    pub duration: f64,
    pub errors: Vec<String>,
}

/// 运行记录摘要（列表用，不含上下文）
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub id: u64,
    pub date: DateTime<Utc>,
    pub duration: f64,
    pub status: bool,
}

impl From<&RunRecord> for RunSummary {
    fn from(record: &RunRecord) -> Self {
        Self {
            id: record.id,
            date: record.date,
            duration: record.duration,
            status: record.status,
        }
    }
}

/// 运行历史响应
#[derive(Debug, Serialize)]
pub struct RunHistoryResponse {
    pub runs: Vec<RunSummary>,
    pub total: usize,
}

/// 运行详情响应
#[derive(Debug, Serialize)]
pub struct RunDetailResponse {
    pub id: u64,
    pub date: DateTime<Utc>,
    pub duration: f64,
    pub status: bool,
    /// 运行报告
    pub context: serde_json::Value,
}

/// 创建部署管理路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deploy", post(trigger_deploy))
        .route("/deployments", get(list_runs))
        .route("/deployments/:id", get(get_run))
}

/// 触发部署
///
/// POST /deploy
/// 需要令牌（请求头或 `access_token` 查询参数）或请求体签名
///
/// 部署在请求内同步执行，完成后返回结果
async fn trigger_deploy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request = TriggerRequest {
        headers: &headers,
        query: &query,
        body: &body,
    };
    verify_trigger(state.checker.as_ref(), &request)?;

    let (record, ctx) = services::deploy::execute(state.clone()).await?;

    Ok(Json(TriggerResponse {
        id: record.id,
        run_id: ctx.run_id().to_string(),
        status: record.status,
        state: ctx.state().as_str(),
        outcome: ctx.outcome(),
        duration: record.duration,
        errors: ctx
            .errors()
            .iter()
            .map(|e| e.description().to_string())
            .collect(),
    }))
}

/// 列出运行记录，最新的在前
///
/// GET /deployments
async fn list_runs(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let runs: Vec<RunSummary> = state.runs.list().await?.iter().map(RunSummary::from).collect();
    let total = runs.len();
    Ok(Json(RunHistoryResponse { runs, total }))
}

/// 获取运行详情
///
/// GET /deployments/:id
async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id: u64 = id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid run id: {}", id)))?;

    let record = state
        .runs
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Run {}", id)))?;

    let context = serde_json::from_str(&record.context)
        .unwrap_or_else(|_| serde_json::Value::String(record.context.clone()));

    Ok(Json(RunDetailResponse {
        id: record.id,
        date: record.date,
        duration: record.duration,
        status: record.status,
        context,
    }))
}
