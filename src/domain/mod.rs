//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod deploy;
pub mod step;

// Re-exports for convenience
pub use deploy::{DeployError, DeployState, ErrorKind, ErrorList, RunOutcome};
pub use step::{TerminalStep, Timer, DURATION_UNSET};
