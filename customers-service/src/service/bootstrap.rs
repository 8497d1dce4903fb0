//! 应用启动器 - 负责依赖注入、服务启动与优雅停机
//!
//! 启动拆分为独立步骤：校验配置 -> 绑定监听端口 -> 注册到注册中心 -> 开始服务。
//! 任一步骤失败都以 [`StartupError`] 返回，已绑定的端口随之释放。
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use petclinic_core::PetclinicAppConfig;
use petclinic_core::config::Config;
use petclinic_core::discovery::{DiscoveryClient, Registration, create_client};
use petclinic_core::error::StartupError;
use petclinic_core::registry::ServiceRegistry;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::CustomersConfig;
use crate::interface::http::{HttpState, router};
use crate::service::lifecycle::{Lifecycle, LifecycleState};
use crate::service::registry::ServiceRegistrar;

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    ///
    /// 启动服务并阻塞，直到收到停止信号或服务器异常退出。
    pub async fn run(app_config: PetclinicAppConfig) -> Result<()> {
        let config = CustomersConfig::from_app_config(&app_config);
        let discovery = Self::create_discovery(&config.runtime).await?;

        let service = startup(config, discovery).await?;
        service.run_until_signal().await?;

        info!("customers service exited");
        Ok(())
    }

    /// 根据配置创建注册客户端
    ///
    /// 未配置注册中心时返回 `None`；客户端创建失败时遵循 `fail_fast` 策略。
    pub async fn create_discovery(
        runtime_config: &Config,
    ) -> petclinic_core::Result<Option<Arc<dyn DiscoveryClient>>> {
        let Some(registry_config) = &runtime_config.registry else {
            return Ok(None);
        };

        match create_client(registry_config).await {
            Ok(client) => Ok(Some(client)),
            Err(err @ StartupError::Config { .. }) => Err(err),
            Err(err) if registry_config.fail_fast => Err(err),
            Err(err) => {
                warn!(error = %err, "registry client unavailable, continuing without registration");
                Ok(None)
            }
        }
    }
}

/// 启动服务
///
/// 返回时监听端口已就绪、实例已注册（若配置了注册中心），状态为 Running。
pub async fn startup(
    config: CustomersConfig,
    discovery: Option<Arc<dyn DiscoveryClient>>,
) -> petclinic_core::Result<RunningService> {
    let lifecycle = Lifecycle::new();

    let prepared = async {
        config.runtime.validate()?;
        let listener = bind_listener(&config.runtime).await?;
        let local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
            address: format!("{}:{}", config.runtime.server.address, config.runtime.server.port),
            source,
        })?;
        let registry =
            ServiceRegistrar::register_service(&config.runtime, discovery, local_addr).await?;
        Ok::<_, StartupError>((listener, local_addr, registry))
    }
    .await;

    let (listener, local_addr, registry) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            lifecycle.mark_stopped();
            error!(error = %err, code = %err.code(), "customers service failed to start");
            return Err(err);
        }
    };

    let http_state = HttpState {
        service_name: config.runtime.service.name.clone(),
        version: config.runtime.service.version.clone(),
        instance_id: registry.as_ref().map(|r| r.instance().instance_id.clone()),
        registry: registry.as_ref().map(|r| r.backend_name()),
        started_at: Utc::now(),
        lifecycle: lifecycle.subscribe(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (exited_tx, exited_rx) = watch::channel(false);
    let server_task = spawn_server(listener, router(http_state), shutdown_rx, exited_tx);

    lifecycle.mark_running();
    info!(
        service = %config.runtime.service.name,
        %local_addr,
        registered = registry.is_some(),
        "customers service running"
    );

    Ok(RunningService {
        local_addr,
        lifecycle,
        registry,
        shutdown_tx,
        server_exited: exited_rx,
        server_task: Mutex::new(Some(server_task)),
        shutdown_timeout: config.shutdown_timeout,
        stopping: AtomicBool::new(false),
    })
}

/// 绑定监听端口
pub async fn bind_listener(runtime_config: &Config) -> petclinic_core::Result<TcpListener> {
    let addr = runtime_config.bind_addr()?;
    TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind {
            address: addr.to_string(),
            source,
        })
}

fn spawn_server(
    listener: TcpListener,
    app: axum::Router,
    mut shutdown_rx: watch::Receiver<bool>,
    exited_tx: watch::Sender<bool>,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down gracefully");
            })
            .await;
        let _ = exited_tx.send(true);
        result
    })
}

/// 运行中的服务句柄
pub struct RunningService {
    local_addr: SocketAddr,
    lifecycle: Lifecycle,
    registry: Option<Arc<ServiceRegistry>>,
    shutdown_tx: watch::Sender<bool>,
    server_exited: watch::Receiver<bool>,
    server_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    shutdown_timeout: Duration,
    stopping: AtomicBool,
}

impl RunningService {
    /// 实际监听地址
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// 注册信息（未注册时为 `None`）
    pub fn registry(&self) -> Option<&Arc<ServiceRegistry>> {
        self.registry.as_ref()
    }

    /// 当前注册凭据（重新注册后会更新）
    pub async fn registration(&self) -> Option<Registration> {
        match &self.registry {
            Some(registry) => Some(registry.registration().await),
            None => None,
        }
    }

    /// 阻塞直到收到停止信号或服务器退出，然后执行优雅停机
    pub async fn run_until_signal(&self) -> petclinic_core::Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// 阻塞直到 `signal` 完成或服务器退出，然后执行优雅停机
    pub async fn run_until<F>(&self, signal: F) -> petclinic_core::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut exited = self.server_exited.clone();
        tokio::select! {
            _ = signal => {
                info!("shutdown signal received");
            }
            _ = exited.wait_for(|done| *done) => {
                warn!("HTTP server exited unexpectedly");
            }
        }
        self.shutdown().await
    }

    /// 优雅停机
    ///
    /// 先从注册中心注销，再停止接收新请求并等待在途请求完成。
    /// 重复调用没有额外效果。
    pub async fn shutdown(&self) -> petclinic_core::Result<()> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(registry) = &self.registry {
            info!("unregistering service...");
            if let Err(err) = registry.deregister().await {
                warn!(error = %err, "failed to unregister service");
            }
        }

        let _ = self.shutdown_tx.send(true);
        let result = match self.server_task.lock().await.take() {
            Some(mut task) => match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(err))) => Err(StartupError::Server(err.to_string())),
                Ok(Err(join_err)) => Err(StartupError::Server(join_err.to_string())),
                Err(_) => {
                    warn!(
                        timeout_ms = self.shutdown_timeout.as_millis() as u64,
                        "graceful shutdown timed out, aborting server task"
                    );
                    task.abort();
                    Ok(())
                }
            },
            None => Ok(()),
        };

        self.lifecycle.mark_stopped();
        info!(local_addr = %self.local_addr, "customers service stopped");
        result
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
