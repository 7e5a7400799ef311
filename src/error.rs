//! 统一错误处理
//!
//! `ApiError` 实现 `IntoResponse`，所有 handler 错误都以 JSON `ErrorResponse` 返回

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::state::StoreError;

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// 统一 API 错误类型
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401 - 令牌或签名无效
    #[error("Unauthorized")]
    Unauthorized,
    /// 404 - 资源未找到
    #[error("Not found: {0}")]
    NotFound(String),
    /// 400 - 请求无效
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// 500 - 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self::Unauthorized
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Run store failure");
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("access_denied", "Access denied: invalid token or signature"),
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("not_found", format!("{} not found", resource)),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("bad_request", msg),
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("internal_error", "Internal server error").with_details(msg),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;
