//! 进程内注册表
//!
//! 未部署注册中心时的本地运行后端，同时作为测试中的替身：
//! 记录注册/续约/注销次数，并可模拟注册中心不可达。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{DiscoveryClient, DiscoveryError, Registration, ServiceInstance};

#[derive(Debug, Default)]
pub struct InMemoryDiscovery {
    instances: Mutex<HashMap<String, ServiceInstance>>,
    unavailable: AtomicBool,
    register_calls: AtomicUsize,
    heartbeat_calls: AtomicUsize,
    deregister_calls: AtomicUsize,
}

impl InMemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// 构造一个不可达的注册表
    pub fn unavailable() -> Self {
        let registry = Self::default();
        registry.set_unavailable(true);
        registry
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 移除实例（模拟注册中心剔除）
    pub fn evict(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.lock().remove(instance_id)
    }

    /// 按服务名查询实例
    pub fn instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        let mut found: Vec<_> = self
            .lock()
            .values()
            .filter(|instance| instance.service_name == service_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        found
    }

    pub fn register_count(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeat_calls.load(Ordering::SeqCst)
    }

    pub fn deregister_count(&self) -> usize {
        self.deregister_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ServiceInstance>> {
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), DiscoveryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Unavailable(
                "in-memory registry marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DiscoveryClient for InMemoryDiscovery {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn register(&self, instance: &ServiceInstance) -> Result<Registration, DiscoveryError> {
        self.check_available()?;
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .insert(instance.instance_id.clone(), instance.clone());
        debug!(instance_id = %instance.instance_id, "instance registered in memory");
        Ok(Registration::new(instance))
    }

    async fn heartbeat(&self, registration: &Registration) -> Result<(), DiscoveryError> {
        self.check_available()?;
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        if self.lock().contains_key(&registration.instance_id) {
            Ok(())
        } else {
            Err(DiscoveryError::NotFound(registration.instance_id.clone()))
        }
    }

    async fn deregister(&self, registration: &Registration) -> Result<(), DiscoveryError> {
        self.check_available()?;
        self.deregister_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().remove(&registration.instance_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_deregister() {
        let registry = InMemoryDiscovery::new();
        let instance = ServiceInstance::new("customers-service", "c-1", "127.0.0.1", 8081);

        let registration = registry.register(&instance).await.unwrap();
        assert_eq!(registry.instances("customers-service"), vec![instance]);

        registry.heartbeat(&registration).await.unwrap();
        registry.deregister(&registration).await.unwrap();

        assert!(registry.instances("customers-service").is_empty());
        assert_eq!(registry.register_count(), 1);
        assert_eq!(registry.heartbeat_count(), 1);
        assert_eq!(registry.deregister_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_registry() {
        let registry = InMemoryDiscovery::unavailable();
        let instance = ServiceInstance::new("customers-service", "c-1", "127.0.0.1", 8081);
        let err = registry.register(&instance).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unavailable(_)));
        assert_eq!(registry.register_count(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_after_eviction() {
        let registry = InMemoryDiscovery::new();
        let instance = ServiceInstance::new("customers-service", "c-1", "127.0.0.1", 8081);
        let registration = registry.register(&instance).await.unwrap();
        registry.evict("c-1");
        assert!(matches!(
            registry.heartbeat(&registration).await,
            Err(DiscoveryError::NotFound(_))
        ));
    }
}
