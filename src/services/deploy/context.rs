//! 部署上下文
//!
//! 一次部署运行的编排器：预检、构建流水线、顺序执行、失败清理。
//!
//! 状态流转：Idle -> Preparing -> (Aborted | Executing) -> Completed

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::deployment::Configuration;
use crate::domain::{DeployState, ErrorKind, ErrorList, RunOutcome, TerminalStep, Timer};
use crate::infra::{DeployLock, LockError, ProcessRunner};
use crate::services::system::System;

use super::command::{Command, ExecContext};
use super::pipeline::Pipeline;

/// 部署执行上下文
pub struct DeployContext {
    /// 运行 ID
    run_id: String,
    configuration: Configuration,
    system: System,
    runner: Arc<dyn ProcessRunner>,
    /// 部署锁目录，未设置时不加锁
    lock_dir: Option<PathBuf>,
    /// 预检步骤记录
    prepare: Option<TerminalStep>,
    pipeline: Pipeline,
    errors: ErrorList,
    state: DeployState,
    outcome: Option<RunOutcome>,
    /// 是否执行了清理命令
    cleaned_up: bool,
    current_user: Option<String>,
    timer: Timer,
    created_at: DateTime<Utc>,
}

impl DeployContext {
    pub fn new(configuration: Configuration, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            configuration,
            system: System::new(),
            runner,
            lock_dir: None,
            prepare: None,
            pipeline: Pipeline::default(),
            errors: ErrorList::default(),
            state: DeployState::Idle,
            outcome: None,
            cleaned_up: false,
            current_user: None,
            timer: Timer::default(),
            created_at: Utc::now(),
        }
    }

    /// 运行期间持有 `lock_dir` 下的部署锁
    pub fn with_lock_dir(mut self, lock_dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(lock_dir.into());
        self
    }

    /// 执行部署
    ///
    /// 运行期错误只记录到错误列表，调用方通过 `is_success` 判断结果
    pub async fn deploy(&mut self) {
        self.reset();
        self.timer.start();
        self.transition(DeployState::Preparing);

        let _locks = match self.lock_dir.clone() {
            Some(dir) => match self.acquire_locks(&dir).await {
                Ok(locks) => Some(locks),
                Err(e) => {
                    error!(run_id = %self.run_id, error = %e, "Failed to acquire deploy lock");
                    self.errors.push(ErrorKind::Lock, e.to_string());
                    self.abort();
                    return;
                }
            },
            None => None,
        };

        self.prepare().await;

        if !self.errors.is_empty()
            || !self
                .system
                .check_backup_dir(&self.configuration, &mut self.errors)
        {
            self.abort();
            return;
        }

        self.transition(DeployState::Executing);
        self.execute().await;
        self.complete();
    }

    /// 先取部署身份锁，再取 tmp_dir 锁，顺序固定
    async fn acquire_locks(&self, dir: &Path) -> Result<(DeployLock, DeployLock), LockError> {
        let identity = DeployLock::acquire(
            dir,
            self.configuration.repository(),
            self.configuration.target_dir(),
        )
        .await?;
        let workspace = DeployLock::acquire_workspace(dir, self.configuration.tmp_dir()).await?;
        Ok((identity, workspace))
    }

    /// 预检：探测程序、导出环境变量、构建流水线
    async fn prepare(&mut self) {
        let mut prepare = TerminalStep::with_output(
            "Prepare deployment",
            [
                "Check required binaries",
                "Set environment values",
                "Initiate deployment commands",
            ],
        );
        prepare.timer_mut().start();

        let runner = self.runner.as_ref();
        self.system
            .get_required_binaries(&self.configuration, runner, &mut self.errors)
            .await;
        self.system.set_env_values(&self.configuration);
        self.current_user = Some(
            self.system
                .get_current_user(runner, self.step_timeout())
                .await,
        );
        self.pipeline = Pipeline::build(&self.configuration);

        prepare.timer_mut().stop();
        self.prepare = Some(prepare);

        info!(
            run_id = %self.run_id,
            steps = self.pipeline.len(),
            cleanup = self.pipeline.cleanup().is_some(),
            errors = self.errors.len(),
            "Deployment prepared"
        );
    }

    /// 顺序执行，遇到第一个失败步骤即停止
    async fn execute(&mut self) {
        let timeout = self.step_timeout();
        let tmp_dir = PathBuf::from(self.configuration.tmp_dir());
        let runner = self.runner.as_ref();
        let env = self.system.env();

        for index in 0..self.pipeline.len() {
            // 每一步重新判断，克隆步骤之后 tmp_dir 才存在
            let work_dir = tmp_dir.is_dir().then_some(tmp_dir.as_path());
            let ctx = ExecContext {
                runner,
                env,
                work_dir,
                timeout,
            };

            let step = &mut self.pipeline.steps_mut()[index];
            info!(run_id = %self.run_id, index, command = %step.input(), "Executing step");
            if !step.exec(ctx, &mut self.errors).await.is_error() {
                continue;
            }

            warn!(run_id = %self.run_id, index, "Step failed, stopping pipeline");
            self.outcome = Some(RunOutcome::Failed { step: index });

            if self.configuration.clean_up() {
                let work_dir = tmp_dir.is_dir().then_some(tmp_dir.as_path());
                let ctx = ExecContext { work_dir, ..ctx };
                if let Some(cleanup) = self.pipeline.cleanup_mut() {
                    info!(run_id = %self.run_id, command = %cleanup.input(), "Running cleanup");
                    cleanup.exec(ctx, &mut self.errors).await;
                    self.cleaned_up = true;
                }
            }
            return;
        }

        self.outcome = Some(RunOutcome::Succeeded);
    }

    /// 预检失败：停止计时，状态停在 Aborted
    fn abort(&mut self) {
        warn!(run_id = %self.run_id, errors = self.errors.len(), "Deployment aborted during preflight");
        self.transition(DeployState::Aborted);
        self.outcome = Some(RunOutcome::Aborted);
        self.finish();
    }

    fn complete(&mut self) {
        self.transition(DeployState::Completed);
        self.finish();
    }

    fn finish(&mut self) {
        self.timer.stop();
        info!(
            run_id = %self.run_id,
            success = self.is_success(),
            outcome = self.outcome.map(|o| o.as_str()).unwrap_or("unknown"),
            duration = self.timer.duration(),
            "Deployment finished"
        );
    }

    fn transition(&mut self, state: DeployState) {
        info!(run_id = %self.run_id, from = self.state.as_str(), to = state.as_str(), "Deploy state changed");
        self.state = state;
    }

    /// 每次运行从空白状态开始
    fn reset(&mut self) {
        self.system = System::new();
        self.prepare = None;
        self.pipeline = Pipeline::default();
        self.errors = ErrorList::default();
        self.outcome = None;
        self.cleaned_up = false;
        self.current_user = None;
        self.state = DeployState::Idle;
    }

    fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.configuration.time_limit_seconds())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn prepare_step(&self) -> Option<&TerminalStep> {
        self.prepare.as_ref()
    }

    pub fn errors(&self) -> &ErrorList {
        &self.errors
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    pub fn cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }

    /// 运行成功 = 错误列表为空
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// 运行时长（秒），未完成时为 -1
    pub fn duration(&self) -> f64 {
        self.timer.duration()
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 可序列化的运行报告
    pub fn report(&self) -> RunReport<'_> {
        RunReport {
            run_id: &self.run_id,
            date: self.created_at,
            status: self.is_success(),
            state: self.state,
            outcome: self.outcome,
            timing: &self.timer,
            current_user: self.current_user.as_deref(),
            binaries: self.system.binaries(),
            errors: &self.errors,
            prepare: self.prepare.as_ref(),
            steps: self.pipeline.steps().iter().map(Command::step).collect(),
            cleanup: self.pipeline.cleanup().map(Command::step),
            cleaned_up: self.cleaned_up,
            configuration: &self.configuration,
        }
    }
}

/// 运行报告（持久化时的上下文快照）
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub run_id: &'a str,
    pub date: DateTime<Utc>,
    pub status: bool,
    pub state: DeployState,
    pub outcome: Option<RunOutcome>,
    #[serde(flatten)]
    pub timing: &'a Timer,
    pub current_user: Option<&'a str>,
    pub binaries: Option<&'a BTreeMap<String, String>>,
    pub errors: &'a ErrorList,
    pub prepare: Option<&'a TerminalStep>,
    pub steps: Vec<&'a TerminalStep>,
    pub cleanup: Option<&'a TerminalStep>,
    pub cleaned_up: bool,
    pub configuration: &'a Configuration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::deploy::testing::ScriptedRunner;
    use serde_json::json;

    const REPOSITORY: &str = "git@example:org/app.git";

    fn config(extra: serde_json::Value) -> Configuration {
        let mut raw = json!({
            "repository": REPOSITORY,
            "target_dir": "/srv/app",
            "tmp_dir": "/nonexistent/deploy-runner-test/",
        });
        if let (Some(raw), Some(extra)) = (raw.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                raw.insert(k.clone(), v.clone());
            }
        }
        Configuration::validate(raw).unwrap()
    }

    fn context(config: Configuration, runner: &Arc<ScriptedRunner>) -> DeployContext {
        DeployContext::new(config, runner.clone())
    }

    #[tokio::test]
    async fn test_default_run_succeeds() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut ctx = context(config(json!({})), &runner);
        assert_eq!(ctx.state(), DeployState::Idle);

        ctx.deploy().await;

        assert!(ctx.is_success());
        assert!(ctx.errors().is_empty());
        assert!(ctx.duration() >= 0.0);
        assert_eq!(ctx.state(), DeployState::Completed);
        assert_eq!(ctx.outcome(), Some(RunOutcome::Succeeded));
        assert_eq!(ctx.current_user(), Some("deployer"));

        let executed = runner.executed();
        assert_eq!(executed.len(), 5);
        assert!(executed[0].starts_with("git clone --depth=1 --branch master"));
        assert_eq!(executed[1], "git submodule update --init --recursive");
        assert!(executed[2].contains("describe --always >"));
        assert_eq!(executed[2], executed[3]);
        assert!(executed[4].starts_with("rsync "));

        // 清理命令已登记但未执行
        let cleanup = ctx.pipeline().cleanup().unwrap();
        assert!(cleanup.step().output().is_empty());
        assert!(!ctx.cleaned_up());
        assert!(executed.iter().all(|c| !c.starts_with("rm -rf")));
    }

    #[tokio::test]
    async fn test_missing_binary_aborts_before_any_step() {
        let runner = Arc::new(ScriptedRunner::new().missing_binary("rsync"));
        let mut ctx = context(config(json!({})), &runner);

        ctx.deploy().await;

        assert!(!ctx.is_success());
        assert_eq!(ctx.errors().as_slice()[0].kind(), ErrorKind::BinaryMissing);
        assert_eq!(ctx.outcome(), Some(RunOutcome::Aborted));
        assert_eq!(ctx.state(), DeployState::Aborted);
        assert!(runner.executed().is_empty());
        assert!(ctx.duration() >= 0.0);
        assert!(ctx.pipeline().steps().iter().all(|s| s.step().timer().started_at().is_none()));
    }

    #[tokio::test]
    async fn test_unusable_backup_dir_aborts() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut ctx = context(config(json!({ "backup_dir": "/nonexistent/backups" })), &runner);

        ctx.deploy().await;

        assert_eq!(ctx.outcome(), Some(RunOutcome::Aborted));
        assert_eq!(ctx.errors().len(), 1);
        assert_eq!(ctx.errors().as_slice()[0].kind(), ErrorKind::BackupDir);
        assert!(runner.executed().is_empty());
    }

    #[tokio::test]
    async fn test_failure_runs_cleanup_once_and_stops() {
        let runner = Arc::new(ScriptedRunner::new().fail_on("submodule"));
        let mut ctx = context(config(json!({})), &runner);

        ctx.deploy().await;

        let executed = runner.executed();
        assert_eq!(executed.len(), 3);
        assert!(executed[0].starts_with("git clone"));
        assert!(executed[1].contains("submodule"));
        assert_eq!(executed[2], "rm -rf /nonexistent/deploy-runner-test/");

        assert!(!ctx.is_success());
        assert_eq!(ctx.outcome(), Some(RunOutcome::Failed { step: 1 }));
        assert!(ctx.cleaned_up());
        assert_eq!(ctx.errors().len(), 1);
        assert_eq!(
            ctx.errors().as_slice()[0].description(),
            "Error during command: git submodule update --init --recursive"
        );
        // 后续步骤未执行
        assert!(ctx.pipeline().steps()[2..]
            .iter()
            .all(|s| s.step().timer().started_at().is_none()));
    }

    #[tokio::test]
    async fn test_failing_cleanup_is_not_retried() {
        let runner = Arc::new(ScriptedRunner::new().fail_on("rsync").fail_on("rm -rf"));
        let mut ctx = context(config(json!({})), &runner);

        ctx.deploy().await;

        let cleanups = runner
            .executed()
            .into_iter()
            .filter(|c| c.starts_with("rm -rf"))
            .count();
        assert_eq!(cleanups, 1);
        assert_eq!(ctx.outcome(), Some(RunOutcome::Failed { step: 4 }));
    }

    #[tokio::test]
    async fn test_failure_without_cleanup() {
        let runner = Arc::new(ScriptedRunner::new().fail_on("git clone"));
        let mut ctx = context(config(json!({ "clean_up": false })), &runner);

        ctx.deploy().await;

        assert_eq!(runner.executed().len(), 1);
        assert_eq!(ctx.outcome(), Some(RunOutcome::Failed { step: 0 }));
        assert!(!ctx.cleaned_up());
        assert!(ctx.pipeline().cleanup().is_none());
    }

    #[tokio::test]
    async fn test_env_is_passed_to_steps_and_probes_extra_binaries() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut ctx = context(
            config(json!({ "env": { "APP_ENV": "prod" }, "dependency_install": true })),
            &runner,
        );

        ctx.deploy().await;

        assert!(ctx.is_success());
        assert_eq!(
            ctx.system().env().get("APP_ENV").map(String::as_str),
            Some("prod")
        );
        assert!(runner.history().contains(&"command -v composer".to_string()));
        assert!(runner
            .executed()
            .iter()
            .any(|c| c.starts_with("composer --no-ansi")));
    }

    #[tokio::test]
    async fn test_redeploy_starts_fresh() {
        let runner = Arc::new(ScriptedRunner::new().fail_on("rsync"));
        let mut ctx = context(config(json!({ "clean_up": false })), &runner);

        ctx.deploy().await;
        ctx.deploy().await;

        assert_eq!(ctx.errors().len(), 1);
        assert_eq!(ctx.pipeline().len(), 5);
    }

    #[tokio::test]
    async fn test_prepare_step_recorded() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut ctx = context(config(json!({})), &runner);

        ctx.deploy().await;

        let prepare = ctx.prepare_step().unwrap();
        assert_eq!(prepare.input(), "Prepare deployment");
        assert_eq!(prepare.output().len(), 3);
        assert!(prepare.duration() >= 0.0);
    }

    #[tokio::test]
    async fn test_lock_dir_is_used() {
        let locks = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mut ctx = context(config(json!({})), &runner).with_lock_dir(locks.path());

        ctx.deploy().await;

        assert!(ctx.is_success());
        assert!(DeployLock::path_for(locks.path(), REPOSITORY, "/srv/app").exists());
        assert!(DeployLock::workspace_path_for(locks.path(), ctx.configuration().tmp_dir()).exists());
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut ctx = context(config(json!({})), &runner);
        ctx.deploy().await;

        let report = serde_json::to_value(ctx.report()).unwrap();

        assert_eq!(report["status"], true);
        assert_eq!(report["state"], "completed");
        assert_eq!(report["outcome"]["status"], "succeeded");
        assert_eq!(report["steps"].as_array().unwrap().len(), 5);
        assert!(report["cleanup"]["input"].as_str().unwrap().starts_with("rm -rf"));
        assert_eq!(report["configuration"]["repository"], REPOSITORY);
        assert!(report["duration"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_steps_run_inside_existing_tmp_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let tmp_dir = format!("{}/", tmp.path().display());
        let runner = Arc::new(ScriptedRunner::new());
        let mut ctx = context(
            config(json!({
                "tmp_dir": tmp_dir,
                "time_limit_seconds": 45,
                "env": { "APP_ENV": "production" },
            })),
            &runner,
        );

        ctx.deploy().await;

        assert!(ctx.is_success());
        let calls = runner.executed_calls();
        assert_eq!(calls.len(), 6);
        assert!(calls[0].command.contains("fetch --tags origin master"));
        for call in &calls {
            assert_eq!(call.work_dir.as_deref(), Some(tmp.path()));
            assert_eq!(call.timeout, Duration::from_secs(45));
            assert_eq!(call.env.get("APP_ENV").map(String::as_str), Some("production"));
        }
    }

    #[tokio::test]
    async fn test_tmp_dir_is_rechecked_before_each_step() {
        let root = tempfile::tempdir().unwrap();
        let tmp = root.path().join("checkout");
        let runner = Arc::new(ScriptedRunner::new().creates_dir_on("git clone", &tmp));
        let mut ctx = context(
            config(json!({ "tmp_dir": format!("{}/", tmp.display()) })),
            &runner,
        );

        ctx.deploy().await;

        let calls = runner.executed_calls();
        assert!(calls[0].command.starts_with("git clone"));
        assert_eq!(calls[0].work_dir, None);
        assert!(calls[1..]
            .iter()
            .all(|c| c.work_dir.as_deref() == Some(tmp.as_path())));
    }

    #[tokio::test]
    async fn test_shared_tmp_dir_waits_for_other_target() {
        let locks = tempfile::tempdir().unwrap();
        let other = config(json!({ "target_dir": "/srv/other" }));
        // 同一仓库部署到另一目标，共用默认 tmp_dir
        let held = DeployLock::acquire_workspace(locks.path(), other.tmp_dir())
            .await
            .unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let mut ctx = context(other, &runner).with_lock_dir(locks.path());
        let mut run = tokio::spawn(async move {
            ctx.deploy().await;
            ctx
        });

        let waited = tokio::time::timeout(Duration::from_millis(200), &mut run).await;
        assert!(waited.is_err());
        assert!(runner.history().is_empty());

        drop(held);
        let ctx = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.is_success());
    }
}
