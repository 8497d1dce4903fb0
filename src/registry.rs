//! 服务注册模块
//!
//! [`ServiceRegistry`] 持有注册凭据并在后台定时续约；
//! 注销只会真正执行一次，重复调用没有额外效果。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_HEARTBEAT_INTERVAL_SECS, RegistryConfig};
use crate::discovery::{
    DiscoveryClient, DiscoveryError, Registration, ServiceInstance, build_instance,
};
use crate::error::{ErrorCode, Result, map_infra_error};

/// 心跳间隔环境变量
pub const HEARTBEAT_INTERVAL_ENV: &str = "SERVICE_HEARTBEAT_INTERVAL";

/// 已注册的服务实例
pub struct ServiceRegistry {
    client: Arc<dyn DiscoveryClient>,
    instance: ServiceInstance,
    registration: Arc<RwLock<Registration>>,
    stop_tx: watch::Sender<bool>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    deregistered: AtomicBool,
}

impl ServiceRegistry {
    /// 注册实例并启动心跳任务
    pub async fn register(
        client: Arc<dyn DiscoveryClient>,
        instance: ServiceInstance,
        heartbeat_interval: Duration,
    ) -> std::result::Result<Self, DiscoveryError> {
        let registration = client.register(&instance).await?;
        let registration = Arc::new(RwLock::new(registration));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(heartbeat_loop(
            client.clone(),
            instance.clone(),
            registration.clone(),
            heartbeat_interval,
            stop_rx,
        ));

        Ok(Self {
            client,
            instance,
            registration,
            stop_tx,
            heartbeat_task: Mutex::new(Some(task)),
            deregistered: AtomicBool::new(false),
        })
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn backend_name(&self) -> &'static str {
        self.client.backend_name()
    }

    /// 当前注册凭据（心跳中重新注册后会更新）
    pub async fn registration(&self) -> Registration {
        self.registration.read().await.clone()
    }

    pub fn is_deregistered(&self) -> bool {
        self.deregistered.load(Ordering::SeqCst)
    }

    /// 停止心跳并注销实例
    ///
    /// 返回 `true` 表示本次调用执行了注销，`false` 表示之前已注销。
    pub async fn deregister(&self) -> std::result::Result<bool, DiscoveryError> {
        if self.deregistered.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let _ = self.stop_tx.send(true);
        if let Some(task) = self.heartbeat_task.lock().await.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "heartbeat task ended abnormally");
            }
        }

        let registration = self.registration().await;
        self.client.deregister(&registration).await?;

        info!(
            service = %self.instance.service_name,
            instance_id = %registration.instance_id,
            registry = self.client.backend_name(),
            "service deregistered"
        );
        Ok(true)
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        if self.deregistered.load(Ordering::SeqCst) {
            return;
        }

        // 未显式注销时尽力在运行时中补发注销请求
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            let registration = self.registration.clone();
            handle.spawn(async move {
                let registration = registration.read().await.clone();
                if let Err(err) = client.deregister(&registration).await {
                    warn!(error = %err, "deregistration on drop failed");
                }
            });
        }
    }
}

async fn heartbeat_loop(
    client: Arc<dyn DiscoveryClient>,
    instance: ServiceInstance,
    registration: Arc<RwLock<Registration>>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // 第一个 tick 立即完成，跳过
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = registration.read().await.clone();
                match client.heartbeat(&current).await {
                    Ok(()) => debug!(instance_id = %current.instance_id, "heartbeat sent"),
                    Err(DiscoveryError::NotFound(_)) => {
                        warn!(
                            instance_id = %current.instance_id,
                            "instance missing from registry, registering again"
                        );
                        match client.register(&instance).await {
                            Ok(renewed) => *registration.write().await = renewed,
                            Err(err) => warn!(error = %err, "re-registration failed"),
                        }
                    }
                    Err(err) => warn!(instance_id = %current.instance_id, error = %err, "heartbeat failed"),
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    debug!(instance_id = %instance.instance_id, "heartbeat stopped");
                    break;
                }
            }
        }
    }
}

/// 计算心跳间隔
///
/// 优先级：环境变量 `SERVICE_HEARTBEAT_INTERVAL` > 配置 > 默认 20 秒；
/// 始终不超过 TTL 的一半，保证租约不会在两次心跳之间过期。
pub fn heartbeat_interval(registry_config: &RegistryConfig) -> Duration {
    let configured = std::env::var(HEARTBEAT_INTERVAL_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .or(registry_config.heartbeat_interval_secs)
        .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS);

    let ceiling = (registry_config.ttl / 2).max(1);
    Duration::from_secs(configured.clamp(1, ceiling))
}

/// 注册服务到注册中心
///
/// * 未配置注册中心时返回 `None`
/// * 注册失败时：`fail_fast = true` 返回错误，否则记录警告并返回 `None`
pub async fn register_service(
    config: &Config,
    client: Arc<dyn DiscoveryClient>,
    host: &str,
    port: u16,
) -> Result<Option<ServiceRegistry>> {
    let Some(reg_config) = &config.registry else {
        info!("Service registry not configured, skipping registration");
        return Ok(None);
    };

    let instance = build_instance(&config.service.name, host, port, reg_config);
    let interval = heartbeat_interval(reg_config);

    match ServiceRegistry::register(client, instance.clone(), interval).await {
        Ok(registry) => {
            info!(
                service = %instance.service_name,
                instance_id = %instance.instance_id,
                address = %instance.authority(),
                registry = registry.backend_name(),
                heartbeat_secs = interval.as_secs(),
                "Service registered"
            );
            Ok(Some(registry))
        }
        Err(err) if reg_config.fail_fast => Err(map_infra_error(
            err,
            ErrorCode::ServiceUnavailable,
            "failed to register service instance",
        )),
        Err(err) => {
            warn!(
                service = %instance.service_name,
                error = %err,
                "failed to register service, continuing without registration"
            );
            Ok(None)
        }
    }
}
