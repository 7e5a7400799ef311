//! 触发请求认证
//!
//! 两种检查器：
//! - `PermissionChecker`：请求头或 `access_token` 查询参数中的令牌等于共享密钥
//! - `SignedPermissionChecker`：在此基础上，签名请求头等于请求体的 HMAC-SHA1 也放行
//!
//! 认证需要完整请求体，所以不做成 extractor，由 handler 读取请求后调用 `verify_trigger`

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

use crate::config::env::{constants::ACCESS_TOKEN_PARAM, EnvConfig};
use crate::error::ApiError;

type HmacSha1 = Hmac<Sha1>;

/// 签名前缀（GitHub 风格 `sha1=<hex>`）
const SIGNATURE_PREFIX: &str = "sha1=";

/// 待认证的触发请求
#[derive(Debug, Clone, Copy)]
pub struct TriggerRequest<'a> {
    pub headers: &'a HeaderMap,
    pub query: &'a HashMap<String, String>,
    pub body: &'a [u8],
}

/// 权限检查
pub trait PermissionCheck {
    fn is_granted(&self, request: &TriggerRequest<'_>) -> bool;
}

/// 共享密钥检查器
#[derive(Debug, Clone)]
pub struct PermissionChecker {
    secret: String,
    header: String,
}

impl PermissionChecker {
    pub fn new(secret: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            header: header.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn matches(&self, candidate: Option<&str>) -> bool {
        candidate.map_or(false, |token| {
            token.as_bytes().ct_eq(self.secret.as_bytes()).into()
        })
    }
}

impl PermissionCheck for PermissionChecker {
    /// 请求头和查询参数任一匹配即放行
    fn is_granted(&self, request: &TriggerRequest<'_>) -> bool {
        if self.secret.is_empty() {
            return false;
        }
        let header = request
            .headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok());
        let query = request.query.get(ACCESS_TOKEN_PARAM).map(String::as_str);

        // 两个都比较，不短路
        self.matches(header) | self.matches(query)
    }
}

/// 共享密钥或 HMAC 签名检查器
#[derive(Debug, Clone)]
pub struct SignedPermissionChecker {
    base: PermissionChecker,
    signature_header: String,
}

impl SignedPermissionChecker {
    pub fn new(base: PermissionChecker, signature_header: impl Into<String>) -> Self {
        Self {
            base,
            signature_header: signature_header.into(),
        }
    }

    fn signature_matches(&self, request: &TriggerRequest<'_>) -> bool {
        let Some(signature) = request
            .headers
            .get(self.signature_header.as_str())
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };

        let signature = signature.trim();
        let signature = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };

        let Ok(mut mac) = HmacSha1::new_from_slice(self.base.secret().as_bytes()) else {
            return false;
        };
        mac.update(request.body);
        mac.verify_slice(&expected).is_ok()
    }
}

impl PermissionCheck for SignedPermissionChecker {
    fn is_granted(&self, request: &TriggerRequest<'_>) -> bool {
        if self.base.is_granted(request) {
            return true;
        }
        !self.base.secret().is_empty() && self.signature_matches(request)
    }
}

/// 按环境配置创建检查器
pub fn build_checker(config: &EnvConfig) -> Box<dyn PermissionCheck + Send + Sync> {
    let base = PermissionChecker::new(config.access_token.clone(), config.token_header.clone());
    if config.signed {
        Box::new(SignedPermissionChecker::new(
            base,
            config.signature_header.clone(),
        ))
    } else {
        Box::new(base)
    }
}

/// 验证触发请求
pub fn verify_trigger(
    checker: &(dyn PermissionCheck + Send + Sync),
    request: &TriggerRequest<'_>,
) -> Result<(), ApiError> {
    if checker.is_granted(request) {
        Ok(())
    } else {
        tracing::warn!("Deploy trigger denied: invalid token or signature");
        Err(ApiError::unauthorized())
    }
}
