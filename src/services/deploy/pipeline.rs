//! 部署流水线构建
//!
//! 根据配置按固定顺序生成命令：
//! 1. 克隆（tmp_dir 不存在）或 fetch + reset
//! 2. 子模块更新
//! 3. 写版本文件（写两次，version_file 总有值，第二次写入保留）
//! 4. 备份（可选）
//! 5. 依赖安装（可选）
//! 6. rsync 同步到目标目录
//! 7. 清理命令（仅登记，失败时执行）

use chrono::{DateTime, Local};
use std::path::Path;

use crate::config::deployment::{short_hash, Configuration, DEPENDENCY_BINARY};

use super::command::Command;

/// 依赖安装程序读取的 home 变量
pub const DEPENDENCY_HOME_VAR: &str = "COMPOSER_HOME";

/// 一次运行的命令序列
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    steps: Vec<Command>,
    cleanup: Option<Command>,
}

impl Pipeline {
    /// 按当前文件系统状态构建流水线
    pub fn build(config: &Configuration) -> Self {
        Self::build_at(config, Local::now())
    }

    /// `now` 用于备份文件名中的时间戳
    pub fn build_at(config: &Configuration, now: DateTime<Local>) -> Self {
        let tmp_dir = config.tmp_dir();
        let git_dir = Path::new(tmp_dir).join(".git");
        let git = format!(
            "git --git-dir=\"{}\" --work-tree=\"{}\"",
            git_dir.display(),
            tmp_dir
        );

        let mut steps = Vec::new();

        if Path::new(tmp_dir).is_dir() {
            steps.push(Command::new(format!(
                "{} fetch --tags origin {}",
                git,
                config.branch()
            )));
            steps.push(Command::new(format!("{} reset --hard FETCH_HEAD", git)));
        } else {
            steps.push(Command::new(format!(
                "git clone --depth=1 --branch {} {} {}",
                config.branch(),
                config.repository(),
                tmp_dir
            )));
        }

        steps.push(Command::new("git submodule update --init --recursive"));

        let version = format!(
            "{} describe --always > {}",
            git,
            config.version_file()
        );
        steps.push(Command::new(version.clone()));
        // NOTE: version_file is never empty, so VERSION is written a second time
        if !config.version_file().is_empty() {
            steps.push(Command::new(version));
        }

        if let Some(backup_dir) = config.backup_dir() {
            steps.push(Command::new(backup_command(config, backup_dir, now)));
        }

        if config.dependency_install() {
            let mut install = Command::new(
                format!(
                    "{} --no-ansi --no-interaction --no-progress --working-dir={} install {}",
                    DEPENDENCY_BINARY,
                    tmp_dir,
                    config.dependency_install_options()
                )
                .trim_end()
                .to_string(),
            );
            if let Some(home) = config.dependency_home().filter(|h| Path::new(h).is_dir()) {
                install = install.with_env(DEPENDENCY_HOME_VAR, home);
            }
            steps.push(install);
        }

        steps.push(Command::new(sync_command(config)));

        let cleanup = config
            .clean_up()
            .then(|| Command::new(format!("rm -rf {}", tmp_dir)));

        Self { steps, cleanup }
    }

    pub fn steps(&self) -> &[Command] {
        &self.steps
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [Command] {
        &mut self.steps
    }

    pub fn cleanup(&self) -> Option<&Command> {
        self.cleanup.as_ref()
    }

    pub(crate) fn cleanup_mut(&mut self) -> Option<&mut Command> {
        self.cleanup.as_mut()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 各步骤的命令字符串
    pub fn inputs(&self) -> Vec<&str> {
        self.steps.iter().map(Command::input).collect()
    }
}

fn backup_command(config: &Configuration, backup_dir: &str, now: DateTime<Local>) -> String {
    let target = config.target_dir();
    let basename = Path::new(target)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "target".to_string());

    format!(
        "tar --exclude='{backup}*' -czf {backup}/{name}-{hash}-{stamp}.tar.gz {target}*",
        backup = backup_dir.trim_end_matches('/'),
        name = basename,
        hash = short_hash(target),
        stamp = now.format("%Y%m%d%H%M%S"),
        target = target,
    )
}

fn sync_command(config: &Configuration) -> String {
    let mut parts = vec![
        "rsync -rltgoDzvO".to_string(),
        config.tmp_dir().to_string(),
        config.target_dir().to_string(),
    ];
    if config.delete_files() {
        parts.push("--delete-after".to_string());
    }
    parts.extend(
        config
            .excludes()
            .iter()
            .map(|exclude| format!("--exclude={}", exclude)),
    );
    parts.join(" ")
}
