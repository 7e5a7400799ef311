//! 部署服务模块
//!
//! 部署编排（上下文、流水线、命令）以及触发后的执行入口

pub mod command;
pub mod context;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::state::run_store::{NewRun, RunRecord, StoreError};
use crate::state::AppState;

pub use command::{Command, ExecContext};
pub use context::{DeployContext, RunReport};
pub use pipeline::Pipeline;

/// 执行部署任务并保存运行记录
///
/// 这是触发后的主入口点；部署本身的失败体现在记录的 status 中，
/// 只有保存记录失败才返回错误
pub async fn execute(state: Arc<AppState>) -> Result<(RunRecord, DeployContext), StoreError> {
    let mut ctx = DeployContext::new(state.deployment.clone(), state.runner.clone())
        .with_lock_dir(state.config.lock_dir());

    tracing::info!(
        run_id = %ctx.run_id(),
        repository = %state.deployment.repository(),
        target_dir = %state.deployment.target_dir(),
        "Starting deployment"
    );

    ctx.deploy().await;

    let run = NewRun::from_context(&ctx)?;
    let record = state.runs.append(run).await?;

    tracing::info!(
        run_id = %ctx.run_id(),
        record_id = record.id,
        status = record.status,
        duration = record.duration,
        "Deployment recorded"
    );

    Ok((record, ctx))
}
