//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - stdout/stderr 合并捕获（按行）
//! - 超时控制（超时后终止子进程）
//! - 每次调用显式传入环境变量和工作目录，不修改当前进程的全局状态

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// 超时后等待输出读取任务结束的时间
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// 命令执行错误
#[derive(Debug, Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(#[source] std::io::Error),
    /// 等待命令完成失败
    #[error("Failed to wait for command: {0}")]
    WaitFailed(#[source] std::io::Error),
}

/// 一次命令调用
#[derive(Clone, Copy, Debug)]
pub struct ProcessSpec<'a> {
    /// shell 命令字符串
    pub command: &'a str,
    /// 工作目录，`None` 时继承当前目录
    pub work_dir: Option<&'a Path>,
    /// 附加到子进程的环境变量
    pub env: &'a BTreeMap<String, String>,
    /// 超时时间，`Duration::ZERO` 表示不限时
    pub timeout: Duration,
}

impl<'a> ProcessSpec<'a> {
    pub fn new(command: &'a str, env: &'a BTreeMap<String, String>, timeout: Duration) -> Self {
        Self {
            command,
            work_dir: None,
            env,
            timeout,
        }
    }

    pub fn in_dir(mut self, work_dir: Option<&'a Path>) -> Self {
        self.work_dir = work_dir;
        self
    }
}

/// 命令执行结果
#[derive(Clone, Debug, Default)]
pub struct ProcessOutput {
    /// 退出码（被信号终止时为 None）
    pub exit_code: Option<i32>,
    /// 合并后的输出行
    pub lines: Vec<String>,
    /// 是否因超时而终止
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// 输出的第一行（去除首尾空白）
    pub fn first_line(&self) -> Option<&str> {
        self.lines
            .first()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
    }
}

/// 进程执行接口
///
/// 部署步骤和预检都通过此接口执行，测试中可替换为脚本化实现
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: ProcessSpec<'_>) -> Result<ProcessOutput, CommandError>;
}

/// 基于 `sh -c` 的执行器
#[derive(Clone, Copy, Debug, Default)]
pub struct ShellRunner;

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, spec: ProcessSpec<'_>) -> Result<ProcessOutput, CommandError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(format!("exec 2>&1\n{}", spec.command))
            .envs(spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = spec.work_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(CommandError::SpawnFailed)?;

        let lines = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| spawn_line_reader(stdout, lines.clone()));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_line_reader(stderr, lines.clone()));

        // 等待命令完成，超时则终止子进程；超时为零表示不限时
        let (exit_code, timed_out) = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(CommandError::WaitFailed)?;
                (status.code(), false)
            }
            _ = tokio::time::sleep(spec.timeout), if !spec.timeout.is_zero() => {
                error!(command = %spec.command, "Command timed out after {:?}", spec.timeout);
                let _ = child.kill().await;
                let status = child.wait().await.map_err(CommandError::WaitFailed)?;
                (status.code(), true)
            }
        };

        // 孙进程可能仍持有管道，超过宽限时间后放弃读取
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            drain(task).await;
        }

        let lines = match Arc::try_unwrap(lines) {
            Ok(lines) => lines.into_inner().unwrap_or_else(|e| e.into_inner()),
            Err(shared) => shared.lock().map(|l| l.clone()).unwrap_or_default(),
        };

        debug!(command = %spec.command, exit_code = ?exit_code, timed_out, "Command finished");

        Ok(ProcessOutput {
            exit_code,
            lines,
            timed_out,
        })
    }
}

fn spawn_line_reader<R>(reader: R, sink: Arc<Mutex<Vec<String>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Ok(mut sink) = sink.lock() {
                sink.push(line);
            }
        }
    })
}

async fn drain(mut task: JoinHandle<()>) {
    if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut task).await.is_err() {
        task.abort();
    }
}
