//! 流水线命令
//!
//! `Command` 是一个终端步骤：通过 `ProcessRunner` 执行输入，
//! 失败时写入本次运行的错误列表

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{ErrorKind, ErrorList, TerminalStep};
use crate::infra::{ProcessRunner, ProcessSpec};

/// 执行命令时从所属运行借用的上下文
#[derive(Clone, Copy)]
pub struct ExecContext<'a> {
    pub runner: &'a dyn ProcessRunner,
    /// 预检导出的环境变量（`env` 选项）
    pub env: &'a BTreeMap<String, String>,
    pub work_dir: Option<&'a Path>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Command {
    step: TerminalStep,
    /// 仅本命令可见的变量，覆盖在 `ExecContext::env` 之上
    extra_env: BTreeMap<String, String>,
}

impl Command {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            step: TerminalStep::new(input),
            extra_env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }

    pub fn input(&self) -> &str {
        self.step.input()
    }

    pub fn step(&self) -> &TerminalStep {
        &self.step
    }

    pub fn extra_env(&self) -> &BTreeMap<String, String> {
        &self.extra_env
    }

    pub fn is_error(&self) -> bool {
        self.step.is_error()
    }

    /// 执行命令，可重复调用，输出行持续累加
    pub async fn exec(&mut self, ctx: ExecContext<'_>, errors: &mut ErrorList) -> &mut Self {
        self.step.timer_mut().start();

        let env;
        let env_ref = if self.extra_env.is_empty() {
            ctx.env
        } else {
            let mut merged = ctx.env.clone();
            merged.extend(self.extra_env.clone());
            env = merged;
            &env
        };

        let spec = ProcessSpec::new(self.step.input(), env_ref, ctx.timeout).in_dir(ctx.work_dir);
        let result = ctx.runner.run(spec).await;
        let failed = match result {
            Ok(output) => {
                for line in output.lines.iter() {
                    self.step.push_output(line.as_str());
                }
                if output.timed_out {
                    self.step
                        .push_output(format!("Command timed out after {}s", ctx.timeout.as_secs()));
                }
                !output.success()
            }
            Err(e) => {
                self.step.push_output(e.to_string());
                true
            }
        };

        self.step.set_error(failed);
        if failed {
            warn!(step = %self.step.id(), command = %self.step.input(), "Command failed");
            errors.push(
                ErrorKind::CommandExecution,
                format!("Error during command: {}", self.step.input()),
            );
        } else {
            info!(step = %self.step.id(), command = %self.step.input(), "Command succeeded");
        }

        self.step.timer_mut().stop();
        self
    }
}
