//! Deploy Runner - Webhook 触发的部署执行器
//!
//! 收到经过认证的触发请求后，把 git 仓库同步到临时目录，
//! 可选备份和安装依赖，再用 rsync 发布到目标目录

pub mod error;
pub mod middleware;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod services;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{deployment::Configuration, env::EnvConfig, ValidationError};
use services::{deploy::Pipeline, system};
use state::app_state::{get_shutdown_token, trigger_shutdown};
use state::AppState;

/// 命令行覆盖的运行参数
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// 覆盖监听端口
    pub port_override: Option<u16>,
    /// 覆盖部署选项文件路径
    pub config_override: Option<PathBuf>,
    /// 只校验配置并打印流水线
    pub check_only: bool,
}

/// 启动错误
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid deployment configuration: {0}")]
    Config(#[from] ValidationError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// 初始化日志，`RUST_LOG` 未设置时默认 `info`，输出到 stderr
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

/// 合并环境配置和命令行覆盖
pub fn resolve_config(runtime: &RuntimeConfig) -> EnvConfig {
    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    if let Some(path) = &runtime.config_override {
        config.config_path = path.clone();
    }
    config
}

/// 校验部署选项并打印将执行的流水线
pub fn check_configuration(config: &EnvConfig) -> Result<(), StartupError> {
    let deployment = Configuration::load(&config.config_path)?;
    let pipeline = Pipeline::build(&deployment);

    println!("Configuration OK: {}", config.config_path.display());
    println!("  repository: {}", deployment.repository());
    println!("  branch:     {}", deployment.branch());
    println!("  target_dir: {}", deployment.target_dir());
    println!("  tmp_dir:    {}", deployment.tmp_dir());
    println!(
        "  binaries:   {}",
        system::required_binaries(&deployment).join(", ")
    );
    println!();
    println!("Pipeline:");
    for (index, input) in pipeline.inputs().iter().enumerate() {
        println!("  {}. {}", index + 1, input);
    }
    if let Some(cleanup) = pipeline.cleanup() {
        println!("  on failure: {}", cleanup.input());
    }
    Ok(())
}

/// 加载配置并运行 HTTP 服务，直到收到 Ctrl-C
pub async fn init_and_run_with_config(runtime: RuntimeConfig) -> Result<(), StartupError> {
    let config = resolve_config(&runtime);

    if runtime.check_only {
        return check_configuration(&config);
    }

    let deployment = Configuration::load(&config.config_path)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = Arc::new(AppState::from_config(config, deployment));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    let shutdown = get_shutdown_token();
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            trigger_shutdown();
        }
    });

    info!(%addr, version = config::env::constants::VERSION, "Deploy runner listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(StartupError::Serve)?;

    info!("Deploy runner stopped");
    Ok(())
}
