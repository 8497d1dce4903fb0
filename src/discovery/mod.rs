//! 服务发现模块
//!
//! 定义服务注册客户端接口 [`DiscoveryClient`] 及其后端实现：
//! etcd、Consul、Eureka 以及进程内的 memory 注册表。
//!
//! ## 使用方式
//!
//! ```rust,ignore
//! use petclinic_core::discovery::{create_client, build_instance};
//!
//! let client = create_client(&registry_config).await?;
//! let instance = build_instance("customers-service", "10.0.0.5", 8081, &registry_config);
//! let registration = client.register(&instance).await?;
//! // ...
//! client.deregister(&registration).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod consul;
pub mod etcd;
pub mod eureka;
pub mod init;
pub mod memory;

pub use consul::ConsulDiscovery;
pub use etcd::EtcdDiscovery;
pub use eureka::EurekaDiscovery;
pub use init::{build_instance, create_client, generate_instance_id, resolve_advertise_host};
pub use memory::InMemoryDiscovery;

/// 注册中心后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    Etcd,
    Consul,
    Eureka,
    Memory,
}

impl FromStr for BackendType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "etcd" => Ok(BackendType::Etcd),
            "consul" => Ok(BackendType::Consul),
            "eureka" => Ok(BackendType::Eureka),
            "memory" => Ok(BackendType::Memory),
            other => Err(DiscoveryError::UnsupportedBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendType::Etcd => "etcd",
            BackendType::Consul => "consul",
            BackendType::Eureka => "eureka",
            BackendType::Memory => "memory",
        };
        f.write_str(s)
    }
}

/// 服务注册错误
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("unsupported registry type: {0}")]
    UnsupportedBackend(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("registry rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// 注册中心中已不存在该实例（租约过期或被剔除），需要重新注册
    #[error("instance not found in registry: {0}")]
    NotFound(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 服务实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            host: host.into(),
            port,
            namespace: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 实例根 URL
    pub fn base_url(&self) -> String {
        format!("http://{}", self.authority())
    }

    /// 健康检查 URL
    pub fn health_url(&self) -> String {
        format!("{}/actuator/health", self.base_url())
    }
}

/// 注册凭据
///
/// 由 [`DiscoveryClient::register`] 返回，续约与注销时使用。
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub service_name: String,
    pub instance_id: String,
    /// etcd 租约 ID
    pub lease_id: Option<i64>,
    pub registered_at: DateTime<Utc>,
}

impl Registration {
    pub fn new(instance: &ServiceInstance) -> Self {
        Self {
            service_name: instance.service_name.clone(),
            instance_id: instance.instance_id.clone(),
            lease_id: None,
            registered_at: Utc::now(),
        }
    }

    pub fn with_lease(mut self, lease_id: i64) -> Self {
        self.lease_id = Some(lease_id);
        self
    }
}

/// 服务注册客户端
///
/// 启动器通过该接口注册/注销实例，测试中可替换为 [`InMemoryDiscovery`]。
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// 后端名称
    fn backend_name(&self) -> &'static str;

    /// 注册实例
    async fn register(&self, instance: &ServiceInstance) -> Result<Registration, DiscoveryError>;

    /// 续约
    async fn heartbeat(&self, registration: &Registration) -> Result<(), DiscoveryError>;

    /// 注销实例
    async fn deregister(&self, registration: &Registration) -> Result<(), DiscoveryError>;
}

/// 规范化注册中心地址：补全协议并去掉末尾斜杠
pub(crate) fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
