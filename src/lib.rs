//! Petclinic Core 公共库
//!
//! 提供统一的配置加载、日志初始化和服务注册功能

pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod registry;
pub mod service_names;

pub use config::{
    Config, ConfigManager, CustomersServiceConfig, LoggingConfig, PetclinicAppConfig,
    RegistryConfig, ServerConfig, ServiceConfig, ServiceRuntimeConfig, load_config,
    load_config_with, load_config_with_args,
};
pub use error::*;
pub use registry::{ServiceRegistry, register_service};
pub use service_names::*;
