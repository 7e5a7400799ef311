//! 运行时状态模块
//!
//! 管理应用状态和运行记录存储

pub mod app_state;
pub mod run_store;

pub use app_state::AppState;
pub use run_store::{NewRun, RunRecord, RunStore, StoreError};
