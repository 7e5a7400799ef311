//! 运行记录存储
//!
//! 将每次部署的运行记录追加到数据目录下的 JSON Lines 文件，
//! 支持按 ID 查询和按时间倒序列出

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::services::deploy::DeployContext;

/// 运行记录文件名
const RUNS_FILE_NAME: &str = "runs.jsonl";

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run store I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode run record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 持久化的运行记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: u64,
    /// 运行日期
    pub date: DateTime<Utc>,
    /// 运行时长（秒）
    pub duration: f64,
    /// 是否成功（错误列表为空）
    pub status: bool,
    /// 序列化的运行上下文
    pub context: String,
}

/// 待保存的运行记录
#[derive(Clone, Debug)]
pub struct NewRun {
    pub date: DateTime<Utc>,
    pub duration: f64,
    pub status: bool,
    pub context: String,
}

impl NewRun {
    /// 从完成的运行上下文生成记录
    pub fn from_context(ctx: &DeployContext) -> Result<Self, StoreError> {
        Ok(Self {
            date: ctx.date(),
            duration: ctx.duration(),
            status: ctx.is_success(),
            context: serde_json::to_string(&ctx.report())?,
        })
    }
}

/// 运行记录存储
pub struct RunStore {
    path: PathBuf,
    /// 串行化写入并缓存最后分配的 ID，首次追加时从文件加载
    last_id: Mutex<Option<u64>>,
}

impl RunStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(RUNS_FILE_NAME),
            last_id: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录，返回分配了 ID 的记录
    pub async fn append(&self, run: NewRun) -> Result<RunRecord, StoreError> {
        let mut last_id = self.last_id.lock().await;

        let previous = match *last_id {
            Some(id) => id,
            None => self.load().await?.iter().map(|r| r.id).max().unwrap_or(0),
        };
        let next_id = previous + 1;

        let record = RunRecord {
            id: next_id,
            date: run.date,
            duration: run.duration,
            status: run.status,
            context: run.context,
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;
        *last_id = Some(next_id);

        debug!(id = record.id, path = %self.path.display(), "Run record saved");
        Ok(record)
    }

    /// 所有记录，最新的在前
    pub async fn list(&self) -> Result<Vec<RunRecord>, StoreError> {
        let mut records = self.load().await?;
        records.reverse();
        Ok(records)
    }

    /// 按 ID 查询
    pub async fn get(&self, id: u64) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.load().await?.into_iter().find(|r| r.id == id))
    }

    async fn load(&self) -> Result<Vec<RunRecord>, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Skipping malformed run record");
                }
            }
        }
        Ok(records)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}
