//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use tracing::warn;

use constants::{
    DEFAULT_CONFIG_PATH, DEFAULT_DATA_DIR, DEFAULT_PORT, DEFAULT_SIGNATURE_HEADER,
    DEFAULT_TOKEN_HEADER,
};

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 服务监听端口
    pub port: u16,
    /// 共享密钥，为空时拒绝所有触发
    pub access_token: String,
    /// 携带令牌的请求头
    pub token_header: String,
    /// 携带 HMAC 签名的请求头
    pub signature_header: String,
    /// 是否启用签名校验
    pub signed: bool,
    /// 部署选项文件路径
    pub config_path: PathBuf,
    /// 运行记录和锁文件目录
    pub data_dir: PathBuf,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // Access token - 支持旧名称兼容
        let access_token =
            load_with_fallback("DEPLOY_RUNNER_ACCESS_TOKEN", "ACCESS_TOKEN").unwrap_or_default();
        if env::var("DEPLOY_RUNNER_ACCESS_TOKEN").is_err() && env::var("ACCESS_TOKEN").is_ok() {
            warn!("Deprecated environment variable ACCESS_TOKEN detected. Please use DEPLOY_RUNNER_ACCESS_TOKEN");
        }
        if access_token.is_empty() {
            warn!("No access token configured, every deploy trigger will be denied");
        }

        // Port
        let port = load_with_fallback("DEPLOY_RUNNER_PORT", "PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let token_header = env::var("DEPLOY_RUNNER_TOKEN_HEADER")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_HEADER.to_string());

        let signature_header = env::var("DEPLOY_RUNNER_SIGNATURE_HEADER")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string());

        let signed = env::var("DEPLOY_RUNNER_SIGNED")
            .ok()
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        let config_path = env::var("DEPLOY_RUNNER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let data_dir = env::var("DEPLOY_RUNNER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

        Self {
            port,
            access_token,
            token_header,
            signature_header,
            signed,
            config_path,
            data_dir,
        }
    }

    /// 部署锁文件目录
    pub fn lock_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            access_token: String::new(),
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            signed: true,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 9876;

    /// 默认令牌请求头
    pub const DEFAULT_TOKEN_HEADER: &str = "X-Deploy-Token";

    /// 默认签名请求头
    pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Hub-Signature";

    /// 令牌查询参数名
    pub const ACCESS_TOKEN_PARAM: &str = "access_token";

    /// 默认部署选项文件
    pub const DEFAULT_CONFIG_PATH: &str = "deploy.json";

    /// 默认数据目录
    pub const DEFAULT_DATA_DIR: &str = "./data";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        // 设置测试环境变量
        env::set_var("TEST_RUNNER_PRIMARY", "primary_value");
        env::set_var("TEST_RUNNER_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("TEST_RUNNER_PRIMARY", "TEST_RUNNER_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("TEST_RUNNER_PRIMARY");
        assert_eq!(
            load_with_fallback("TEST_RUNNER_PRIMARY", "TEST_RUNNER_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("TEST_RUNNER_FALLBACK");
        assert_eq!(
            load_with_fallback("TEST_RUNNER_PRIMARY", "TEST_RUNNER_FALLBACK"),
            None
        );
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_defaults() {
        let config = EnvConfig::default();
        assert_eq!(config.port, 9876);
        assert!(config.signed);
        assert!(config.access_token.is_empty());
        assert_eq!(config.token_header, "X-Deploy-Token");
        assert_eq!(config.signature_header, "X-Hub-Signature");
        assert_eq!(config.lock_dir(), PathBuf::from("./data").join("locks"));
    }
}
