//! 请求认证

pub mod auth;

pub use auth::{
    build_checker, verify_trigger, PermissionCheck, PermissionChecker, SignedPermissionChecker,
    TriggerRequest,
};
