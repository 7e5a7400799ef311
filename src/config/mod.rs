//! 配置模块
//!
//! 环境变量解析与部署选项校验

pub mod deployment;
pub mod env;

pub use deployment::{Configuration, ValidationError};
pub use env::EnvConfig;
