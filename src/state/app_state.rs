//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 全局 shutdown token，用于优雅关闭 HTTP 服务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

use crate::config::{deployment::Configuration, env::EnvConfig};
use crate::infra::{ProcessRunner, ShellRunner};
use crate::middleware::auth::{build_checker, PermissionCheck};

use super::run_store::RunStore;

/// 应用状态
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 已校验的部署选项
    pub deployment: Configuration,
    /// 触发请求权限检查
    pub checker: Box<dyn PermissionCheck + Send + Sync>,
    /// 运行记录
    pub runs: RunStore,
    /// 子进程执行器
    pub runner: Arc<dyn ProcessRunner>,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: EnvConfig,
        deployment: Configuration,
        checker: Box<dyn PermissionCheck + Send + Sync>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            runs: RunStore::new(&config.data_dir),
            config,
            deployment,
            checker,
            runner,
            started_at: Utc::now(),
        }
    }

    /// 使用真实 shell 和按配置选择的检查器创建状态
    pub fn from_config(config: EnvConfig, deployment: Configuration) -> Self {
        let checker = build_checker(&config);

        tracing::info!(
            port = config.port,
            signed = config.signed,
            token_configured = !config.access_token.is_empty(),
            data_dir = %config.data_dir.display(),
            repository = %deployment.repository(),
            target_dir = %deployment.target_dir(),
            "Loaded configuration"
        );

        Self::new(config, deployment, checker, Arc::new(ShellRunner))
    }
}
