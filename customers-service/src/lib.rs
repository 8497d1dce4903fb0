//! Petclinic 客户服务
//!
//! 启动 HTTP 监听并将实例注册到注册中心，停机时注销。

pub mod config;
pub mod interface;
pub mod service;

pub use config::CustomersConfig;
pub use service::{ApplicationBootstrap, LifecycleState, RunningService, startup};
