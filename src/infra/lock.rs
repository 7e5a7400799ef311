//! 部署锁
//!
//! 以 repository + target_dir 为键的部署身份锁，外加以 tmp_dir 为键的工作目录锁；
//! 默认 tmp_dir 只由 repository 决定，不同 target_dir 的部署会共用它

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::deployment::short_hash;

/// 锁错误
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to open lock file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 持有期间独占部署身份，drop 时释放
#[derive(Debug)]
pub struct DeployLock {
    file: File,
    path: PathBuf,
}

impl DeployLock {
    /// 锁文件路径
    pub fn path_for(lock_dir: &Path, repository: &str, target_dir: &str) -> PathBuf {
        let identity = format!("{}\n{}", repository, target_dir);
        lock_dir.join(format!("deploy-{}.lock", short_hash(&identity)))
    }

    /// 工作目录锁文件路径，共用同一 tmp_dir 的不同部署身份互斥
    pub fn workspace_path_for(lock_dir: &Path, tmp_dir: &str) -> PathBuf {
        let key = tmp_dir.trim_end_matches('/');
        lock_dir.join(format!("workspace-{}.lock", short_hash(key)))
    }

    /// 获取部署身份锁，已被占用时等待释放
    pub async fn acquire(
        lock_dir: &Path,
        repository: &str,
        target_dir: &str,
    ) -> Result<Self, LockError> {
        Self::acquire_path(lock_dir, Self::path_for(lock_dir, repository, target_dir)).await
    }

    /// 获取 tmp_dir 锁，必须在部署身份锁之后获取
    pub async fn acquire_workspace(lock_dir: &Path, tmp_dir: &str) -> Result<Self, LockError> {
        Self::acquire_path(lock_dir, Self::workspace_path_for(lock_dir, tmp_dir)).await
    }

    async fn acquire_path(lock_dir: &Path, path: PathBuf) -> Result<Self, LockError> {
        let lock_name = path.display().to_string();

        std::fs::create_dir_all(lock_dir).map_err(|source| LockError::Open {
            path: lock_name.clone(),
            source,
        })?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: lock_name.clone(),
                source,
            })?;

        debug!(lock = %lock_name, "Waiting for deploy lock");

        // flock 会阻塞，放到阻塞线程池
        let file = tokio::task::spawn_blocking(move || {
            FileExt::lock_exclusive(&file).map(|_| file)
        })
        .await
        .map_err(|e| LockError::Lock {
            path: lock_name.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?
        .map_err(|source| LockError::Lock {
            path: lock_name.clone(),
            source,
        })?;

        info!(lock = %lock_name, "Deploy lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "Deploy lock released");
    }
}
