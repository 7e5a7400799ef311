//! 部署配置
//!
//! 将原始选项（JSON 对象）校验并补全默认值，得到不可变的 `Configuration`。
//! 派生默认值严格按 repository -> tmp_dir -> version_file 的顺序计算。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// 依赖安装使用的程序
pub const DEPENDENCY_BINARY: &str = "composer";

const DEFAULT_BRANCH: &str = "master";
const DEFAULT_DEPENDENCY_OPTIONS: &str = "--no-dev";
const DEFAULT_TIME_LIMIT_SECS: u64 = 30;

/// 配置校验错误
#[derive(Debug, Error)]
pub enum ValidationError {
    /// 缺少必填项
    #[error("missing required option `{0}`")]
    Missing(&'static str),
    /// 必填项为空字符串
    #[error("option `{0}` must not be empty")]
    Empty(&'static str),
    /// 类型不匹配或存在未知选项
    #[error("invalid deployment options: {0}")]
    Invalid(#[from] serde_json::Error),
    /// 配置文件读取失败
    #[error("failed to read deployment options from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 原始选项
///
/// `deny_unknown_fields` 拒绝未识别的键；除可空字段外，`null` 视为类型错误
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    #[serde(default, deserialize_with = "present")]
    repository: Option<String>,
    #[serde(default, deserialize_with = "present")]
    target_dir: Option<String>,
    #[serde(default = "default_branch")]
    branch: String,
    #[serde(default = "default_true")]
    clean_up: bool,
    #[serde(default)]
    delete_files: bool,
    #[serde(default, alias = "use_composer")]
    dependency_install: bool,
    #[serde(default = "default_dependency_options", alias = "composer_options")]
    dependency_install_options: String,
    #[serde(default, alias = "composer_home")]
    dependency_home: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, Option<String>>,
    #[serde(default = "default_excludes")]
    excludes: Vec<String>,
    #[serde(default = "default_required_binaries")]
    required_binaries: Vec<String>,
    #[serde(default)]
    backup_dir: Option<String>,
    #[serde(default = "default_time_limit", alias = "time_limit")]
    time_limit_seconds: u64,
    #[serde(default, deserialize_with = "present")]
    tmp_dir: Option<String>,
    #[serde(default, deserialize_with = "present")]
    version_file: Option<String>,
}

/// 键存在时值不能为 null
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_true() -> bool {
    true
}

fn default_dependency_options() -> String {
    DEFAULT_DEPENDENCY_OPTIONS.to_string()
}

fn default_excludes() -> Vec<String> {
    vec![".git".to_string()]
}

fn default_required_binaries() -> Vec<String> {
    vec!["git".to_string(), "rsync".to_string()]
}

fn default_time_limit() -> u64 {
    DEFAULT_TIME_LIMIT_SECS
}

/// 部署配置（构造后不可变）
#[derive(Clone, Debug, Serialize)]
pub struct Configuration {
    repository: String,
    target_dir: String,
    branch: String,
    clean_up: bool,
    delete_files: bool,
    dependency_install: bool,
    dependency_install_options: String,
    dependency_home: Option<String>,
    env: BTreeMap<String, Option<String>>,
    excludes: Vec<String>,
    required_binaries: Vec<String>,
    backup_dir: Option<String>,
    time_limit_seconds: u64,
    tmp_dir: String,
    version_file: String,
}

impl Configuration {
    /// 校验原始选项并补全默认值
    pub fn validate(raw: Value) -> Result<Self, ValidationError> {
        let raw: RawOptions = serde_json::from_value(raw)?;

        let repository = required("repository", raw.repository)?;
        let target_dir = required("target_dir", raw.target_dir)?;

        // 派生默认值依赖已解析的值，顺序不可调换
        let tmp_dir = raw
            .tmp_dir
            .unwrap_or_else(|| default_tmp_dir(&repository));
        let version_file = raw
            .version_file
            .unwrap_or_else(|| format!("{}VERSION", tmp_dir));

        Ok(Self {
            repository,
            target_dir,
            branch: raw.branch,
            clean_up: raw.clean_up,
            delete_files: raw.delete_files,
            dependency_install: raw.dependency_install,
            dependency_install_options: raw.dependency_install_options,
            dependency_home: raw.dependency_home,
            env: raw.env,
            excludes: raw.excludes,
            required_binaries: raw.required_binaries,
            backup_dir: raw.backup_dir,
            time_limit_seconds: raw.time_limit_seconds,
            tmp_dir,
            version_file,
        })
    }

    /// 从 JSON 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ValidationError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: Value = serde_json::from_str(&content)?;
        Self::validate(raw)
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn target_dir(&self) -> &str {
        &self.target_dir
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// 失败时是否清理临时目录
    pub fn clean_up(&self) -> bool {
        self.clean_up
    }

    /// rsync 是否删除目标目录中多余的文件
    pub fn delete_files(&self) -> bool {
        self.delete_files
    }

    /// 是否执行依赖安装
    pub fn dependency_install(&self) -> bool {
        self.dependency_install
    }

    pub fn dependency_install_options(&self) -> &str {
        &self.dependency_install_options
    }

    pub fn dependency_home(&self) -> Option<&str> {
        self.dependency_home.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, Option<String>> {
        &self.env
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    pub fn required_binaries(&self) -> &[String] {
        &self.required_binaries
    }

    pub fn backup_dir(&self) -> Option<&str> {
        self.backup_dir.as_deref()
    }

    pub fn time_limit_seconds(&self) -> u64 {
        self.time_limit_seconds
    }

    pub fn tmp_dir(&self) -> &str {
        &self.tmp_dir
    }

    pub fn version_file(&self) -> &str {
        &self.version_file
    }
}

fn required(name: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    match value {
        None => Err(ValidationError::Missing(name)),
        Some(v) if v.trim().is_empty() => Err(ValidationError::Empty(name)),
        Some(v) => Ok(v),
    }
}

/// 默认临时目录，仅由仓库地址决定
fn default_tmp_dir(repository: &str) -> String {
    format!("/tmp/deploy-{}/", short_hash(repository))
}

/// SHA-256 十六进制摘要的前 32 位
pub(crate) fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(32);
    hex
}
