//! 服务注册初始化模块
//!
//! 从注册中心配置构建注册客户端与服务实例

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use uuid::Uuid;

use super::{
    BackendType, ConsulDiscovery, DiscoveryClient, DiscoveryError, EtcdDiscovery, EurekaDiscovery,
    InMemoryDiscovery, ServiceInstance,
};
use crate::config::RegistryConfig;
use crate::error::{ErrorCode, Result, map_infra_error};
use crate::registry::heartbeat_interval;

/// 生成实例 ID（如果未提供）
///
/// 生成格式: `{service_name}-{uuid_short}`
/// 例如: `customers-service-a1b2c3d4`
pub fn generate_instance_id(service_name: &str, instance_id: Option<String>) -> String {
    instance_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("{}-{}", service_name, &Uuid::new_v4().simple().to_string()[..8]))
}

/// 根据注册中心配置创建注册客户端
///
/// 类型不受支持时返回配置错误；连接失败时返回注册中心错误。
pub async fn create_client(registry_config: &RegistryConfig) -> Result<Arc<dyn DiscoveryClient>> {
    let backend_type = registry_config.registry_type.parse::<BackendType>().map_err(|err| {
        map_infra_error(
            err,
            ErrorCode::InvalidConfiguration,
            "unsupported registry type",
        )
    })?;

    let registry_error = |err: DiscoveryError| {
        map_infra_error(err, ErrorCode::ServiceUnavailable, "failed to create registry client")
    };

    let client: Arc<dyn DiscoveryClient> = match backend_type {
        BackendType::Etcd => Arc::new(
            EtcdDiscovery::connect(
                &registry_config.endpoints,
                registry_config.namespace.clone(),
                registry_config.ttl,
            )
            .await
            .map_err(registry_error)?,
        ),
        BackendType::Consul => Arc::new(
            ConsulDiscovery::new(&registry_config.endpoints, registry_config.ttl)
                .map_err(registry_error)?,
        ),
        BackendType::Eureka => Arc::new(
            EurekaDiscovery::new(
                &registry_config.endpoints,
                registry_config.ttl,
                heartbeat_interval(registry_config).as_secs(),
            )
            .map_err(registry_error)?,
        ),
        BackendType::Memory => Arc::new(InMemoryDiscovery::new()),
    };

    tracing::info!(
        registry_type = %backend_type,
        endpoints = ?registry_config.endpoints,
        "registry client created"
    );

    Ok(client)
}

/// 计算注册到注册中心的主机地址
///
/// 优先使用显式配置；监听在通配地址时使用 `HOSTNAME` 环境变量，否则回退到回环地址。
pub fn resolve_advertise_host(advertise_address: Option<&str>, local_addr: SocketAddr) -> String {
    if let Some(address) = advertise_address.filter(|a| !a.trim().is_empty()) {
        return address.to_string();
    }

    if !local_addr.ip().is_unspecified() {
        return local_addr.ip().to_string();
    }

    std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| match local_addr.ip() {
            IpAddr::V4(_) => "127.0.0.1".to_string(),
            IpAddr::V6(_) => "::1".to_string(),
        })
}

/// 构建服务实例
pub fn build_instance(
    service_name: &str,
    host: &str,
    port: u16,
    registry_config: &RegistryConfig,
) -> ServiceInstance {
    let instance_id = generate_instance_id(service_name, registry_config.instance_id.clone());
    let mut instance = ServiceInstance::new(service_name, instance_id, host, port);

    if !registry_config.namespace.is_empty() {
        instance = instance.with_namespace(&registry_config.namespace);
    }

    for (key, value) in &registry_config.metadata {
        instance = instance.with_metadata(key, value);
    }

    instance
}
