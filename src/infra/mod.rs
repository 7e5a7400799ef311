//! 基础设施模块
//!
//! 封装外部依赖（进程执行、文件锁）

pub mod command;
pub mod lock;

pub use command::{CommandError, ProcessOutput, ProcessRunner, ProcessSpec, ShellRunner};
pub use lock::{DeployLock, LockError};
