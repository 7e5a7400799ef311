//! 系统预检
//!
//! 检查必需程序及其版本、校验备份目录、整理子进程环境变量。
//! 发现的问题写入调用方传入的错误列表，不返回错误。

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::deployment::{Configuration, DEPENDENCY_BINARY};
use crate::domain::{ErrorKind, ErrorList};
use crate::infra::{ProcessRunner, ProcessSpec};

/// 无法解析版本时的占位值
pub const VERSION_NOT_FOUND: &str = "Version Not Found";

/// 备份需要的程序
const BACKUP_BINARY: &str = "tar";

/// 系统预检
///
/// 每个运行上下文独占一个实例
#[derive(Debug, Default)]
pub struct System {
    /// 程序路径 -> 版本（首次探测后缓存）
    binaries: Option<BTreeMap<String, String>>,
    /// 导出给子进程的环境变量
    env: BTreeMap<String, String>,
}

impl System {
    pub fn new() -> Self {
        Self::default()
    }

    /// 探测所需程序
    ///
    /// 缺失的程序记录错误并从结果中省略；结果会被缓存，再次调用不会重新探测
    pub async fn get_required_binaries(
        &mut self,
        config: &Configuration,
        runner: &dyn ProcessRunner,
        errors: &mut ErrorList,
    ) -> &BTreeMap<String, String> {
        if self.binaries.is_none() {
            let probed = probe_binaries(config, runner, errors).await;
            self.binaries = Some(probed);
        }
        self.binaries.get_or_insert_with(BTreeMap::new)
    }

    /// 已探测到的程序（未探测时为 None）
    pub fn binaries(&self) -> Option<&BTreeMap<String, String>> {
        self.binaries.as_ref()
    }

    /// 检查备份目录
    ///
    /// 未配置时返回 true；配置了则必须存在且可写
    pub fn check_backup_dir(&self, config: &Configuration, errors: &mut ErrorList) -> bool {
        let Some(backup_dir) = config.backup_dir() else {
            return true;
        };

        let path = Path::new(backup_dir);
        if path.is_dir() && is_writable(path) {
            return true;
        }

        warn!(backup_dir = %backup_dir, "Backup directory unusable");
        errors.push(
            ErrorKind::BackupDir,
            format!(
                "BACKUP_DIR `{}` does not exist or is not writable.",
                backup_dir
            ),
        );
        false
    }

    /// 导出 `env` 配置（null 值导出为空字符串），重复调用结果相同
    pub fn set_env_values(&mut self, config: &Configuration) -> &BTreeMap<String, String> {
        self.env = config
            .env()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone().unwrap_or_default()))
            .collect();
        &self.env
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// 当前运行用户
    pub async fn get_current_user(&self, runner: &dyn ProcessRunner, timeout: Duration) -> String {
        let env = BTreeMap::new();
        match runner.run(ProcessSpec::new("whoami", &env, timeout)).await {
            Ok(output) if output.success() => output
                .first_line()
                .map(str::to_string)
                .unwrap_or_else(|| "unknown".to_string()),
            _ => std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// 需要探测的程序列表
pub fn required_binaries(config: &Configuration) -> Vec<String> {
    let mut required = config.required_binaries().to_vec();
    if config.backup_dir().is_some() {
        required.push(BACKUP_BINARY.to_string());
    }
    if config.dependency_install() {
        required.push(DEPENDENCY_BINARY.to_string());
    }
    required
}

async fn probe_binaries(
    config: &Configuration,
    runner: &dyn ProcessRunner,
    errors: &mut ErrorList,
) -> BTreeMap<String, String> {
    let env = BTreeMap::new();
    let timeout = Duration::from_secs(config.time_limit_seconds());
    let mut binaries = BTreeMap::new();

    for binary in required_binaries(config) {
        let lookup = format!("command -v {}", binary);
        let path = match runner.run(ProcessSpec::new(&lookup, &env, timeout)).await {
            Ok(output) if output.success() => output.first_line().map(str::to_string),
            _ => None,
        };

        let Some(path) = path else {
            warn!(binary = %binary, "Required binary not found");
            errors.push(
                ErrorKind::BinaryMissing,
                format!(
                    "{} not available. It needs to be installed on the server for this script to work.",
                    binary
                ),
            );
            continue;
        };

        let version_cmd = format!("{} --version", binary);
        let version = match runner.run(ProcessSpec::new(&version_cmd, &env, timeout)).await {
            Ok(output) => output
                .first_line()
                .map(str::to_string)
                .unwrap_or_else(|| VERSION_NOT_FOUND.to_string()),
            Err(_) => VERSION_NOT_FOUND.to_string(),
        };

        info!(binary = %binary, path = %path, version = %version, "Found required binary");
        binaries.insert(path, version);
    }

    binaries
}

/// 通过创建临时文件判断目录是否可写
fn is_writable(dir: &Path) -> bool {
    tempfile::tempfile_in(dir).is_ok()
}
