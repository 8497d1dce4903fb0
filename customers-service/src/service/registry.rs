//! 服务注册器 - 负责在监听端口就绪后将实例注册到注册中心
use std::net::SocketAddr;
use std::sync::Arc;

use petclinic_core::config::Config;
use petclinic_core::discovery::{DiscoveryClient, resolve_advertise_host};
use petclinic_core::error::Result;
use petclinic_core::registry::{ServiceRegistry, register_service};
use tracing::info;

/// 服务注册器
pub struct ServiceRegistrar;

impl ServiceRegistrar {
    /// 注册服务
    ///
    /// 使用实际绑定的端口（配置为 0 时由系统分配）与对外地址注册。
    pub async fn register_service(
        runtime_config: &Config,
        discovery: Option<Arc<dyn DiscoveryClient>>,
        local_addr: SocketAddr,
    ) -> Result<Option<Arc<ServiceRegistry>>> {
        let Some(discovery) = discovery else {
            info!("Discovery client not available, skipping registration");
            return Ok(None);
        };

        let host = resolve_advertise_host(
            runtime_config.server.advertise_address.as_deref(),
            local_addr,
        );

        let registry =
            register_service(runtime_config, discovery, &host, local_addr.port()).await?;
        Ok(registry.map(Arc::new))
    }
}
