//! 测试用的脚本化执行器

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::infra::{CommandError, ProcessOutput, ProcessRunner, ProcessSpec};

/// 一次调用时收到的完整参数
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub command: String,
    pub work_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// 按规则应答的执行器，记录所有收到的命令
///
/// - `command -v <bin>` 返回 `/usr/bin/<bin>`，除非声明为缺失
/// - `<bin> --version` 返回 `<bin> version 1.0`
/// - 包含失败模式的命令退出码为 1，其余为 0
#[derive(Default)]
pub struct ScriptedRunner {
    history: Mutex<Vec<RecordedCall>>,
    creates: Vec<(String, PathBuf)>,
    missing: Vec<String>,
    silent: Vec<String>,
    failing: Vec<String>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing_binary(mut self, binary: &str) -> Self {
        self.missing.push(binary.to_string());
        self
    }

    pub fn silent_version(mut self, binary: &str) -> Self {
        self.silent.push(binary.to_string());
        self
    }

    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.failing.push(pattern.to_string());
        self
    }

    /// 命令包含 `pattern` 时创建目录，模拟克隆出 tmp_dir
    pub fn creates_dir_on(mut self, pattern: &str, dir: impl Into<PathBuf>) -> Self {
        self.creates.push((pattern.to_string(), dir.into()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn history(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    /// 除预检探测以外的调用
    pub fn executed_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| !is_probe(&c.command))
            .collect()
    }

    /// 除预检探测以外执行过的命令
    pub fn executed(&self) -> Vec<String> {
        self.history()
            .into_iter()
            .filter(|c| !is_probe(c))
            .collect()
    }
}

fn is_probe(command: &str) -> bool {
    command.starts_with("command -v ") || command.ends_with(" --version") || command == "whoami"
}

fn reply(code: i32, lines: &[&str]) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(code),
        lines: lines.iter().map(|l| l.to_string()).collect(),
        timed_out: false,
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, spec: ProcessSpec<'_>) -> Result<ProcessOutput, CommandError> {
        let command = spec.command.to_string();
        if let Ok(mut history) = self.history.lock() {
            history.push(RecordedCall {
                command: command.clone(),
                work_dir: spec.work_dir.map(|d| d.to_path_buf()),
                env: spec.env.clone(),
                timeout: spec.timeout,
            });
        }

        for (pattern, dir) in &self.creates {
            if command.contains(pattern.as_str()) {
                let _ = std::fs::create_dir_all(dir);
            }
        }

        if let Some(binary) = command.strip_prefix("command -v ") {
            if self.missing.iter().any(|m| m == binary) {
                return Ok(reply(1, &[]));
            }
            return Ok(reply(0, &[&format!("/usr/bin/{}", binary)]));
        }

        if let Some(binary) = command.strip_suffix(" --version") {
            if self.silent.iter().any(|s| s == binary) {
                return Ok(reply(0, &[]));
            }
            return Ok(reply(0, &[&format!("{} version 1.0", binary), "extra line"]));
        }

        if command == "whoami" {
            return Ok(reply(0, &["deployer"]));
        }

        if self.failing.iter().any(|p| command.contains(p.as_str())) {
            return Ok(reply(1, &["fatal: scripted failure"]));
        }

        Ok(reply(0, &["ok"]))
    }
}
