//! 部署相关领域模型

use serde::Serialize;
use std::fmt;

/// 运行期错误类别
///
/// 运行期错误只作为数据收集，不会中断调用方
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 必需的程序不存在
    BinaryMissing,
    /// 备份目录不存在或不可写
    BackupDir,
    /// 步骤退出码非 0
    CommandExecution,
    /// 无法获取部署锁
    Lock,
}

/// 部署错误（加入错误列表后不可变）
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DeployError {
    kind: ErrorKind,
    description: String,
}

impl DeployError {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// 只追加的错误列表
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct ErrorList(Vec<DeployError>);

impl ErrorList {
    pub fn push(&mut self, kind: ErrorKind, description: impl Into<String>) {
        self.0.push(DeployError::new(kind, description));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeployError> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[DeployError] {
        &self.0
    }
}

/// 运行状态机
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    Idle,
    Preparing,
    Aborted,
    Executing,
    Completed,
}

impl DeployState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployState::Idle => "idle",
            DeployState::Preparing => "preparing",
            DeployState::Aborted => "aborted",
            DeployState::Executing => "executing",
            DeployState::Completed => "completed",
        }
    }
}

/// 运行结果
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    /// 所有步骤成功
    Succeeded,
    /// 某一步失败，后续步骤未执行
    Failed { step: usize },
    /// 预检失败，未执行任何步骤
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed { .. } => "failed",
            RunOutcome::Aborted => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_list_appends_in_order() {
        let mut errors = ErrorList::default();
        assert!(errors.is_empty());

        errors.push(ErrorKind::BinaryMissing, "git not available");
        errors.push(ErrorKind::CommandExecution, "Error during command: ls");

        assert_eq!(errors.len(), 2);
        let kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![ErrorKind::BinaryMissing, ErrorKind::CommandExecution]);
        assert_eq!(errors.as_slice()[1].to_string(), "Error during command: ls");
    }

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(RunOutcome::Failed { step: 2 }).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["step"], 2);
        assert_eq!(RunOutcome::Aborted.as_str(), "aborted");
    }

    #[test]
    fn test_state_as_str() {
        assert_eq!(DeployState::Idle.as_str(), "idle");
        assert_eq!(DeployState::Completed.as_str(), "completed");
    }
}
