//! 启动流程集成测试：绑定、注册、服务、停机

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use customers_service::{CustomersConfig, LifecycleState, startup};
use petclinic_core::config::{PetclinicAppConfig, RegistryConfig};
use petclinic_core::discovery::{DiscoveryClient, InMemoryDiscovery};
use petclinic_core::{ErrorCode, StartupError};

fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_config(port: u16, registry: Option<RegistryConfig>) -> CustomersConfig {
    let mut app = PetclinicAppConfig::default();
    app.core.server.address = "127.0.0.1".to_string();
    app.core.server.port = port;
    app.core.registry = registry;

    let mut config = CustomersConfig::from_app_config(&app);
    config.shutdown_timeout = Duration::from_secs(2);
    config
}

fn memory_registry(fail_fast: bool) -> RegistryConfig {
    let mut registry = RegistryConfig::new("memory", vec![]);
    registry.fail_fast = fail_fast;
    registry.instance_id = Some("customers-test-1".to_string());
    registry
}

#[tokio::test]
async fn test_startup_registers_and_serves() {
    let discovery = Arc::new(InMemoryDiscovery::new());
    let config = test_config(0, Some(memory_registry(true)));

    let service = startup(config, Some(discovery.clone() as Arc<dyn DiscoveryClient>))
        .await
        .unwrap();

    assert_eq!(service.state(), LifecycleState::Running);
    assert_ne!(service.local_addr().port(), 0);
    assert_eq!(discovery.register_count(), 1);

    let registered = discovery.instances("customers-service");
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].port, service.local_addr().port());
    assert_eq!(registered[0].host, "127.0.0.1");

    let registration = service.registration().await.unwrap();
    assert_eq!(registration.instance_id, "customers-test-1");

    let url = format!("http://{}/actuator/health", service.local_addr());
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "UP");
    assert_eq!(
        body["components"]["discovery"]["details"],
        "memory:customers-test-1"
    );

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_deregisters_once_and_closes_listener() {
    let discovery = Arc::new(InMemoryDiscovery::new());
    let config = test_config(0, Some(memory_registry(true)));

    let service = startup(config, Some(discovery.clone() as Arc<dyn DiscoveryClient>))
        .await
        .unwrap();
    let addr = service.local_addr();
    let mut state = service.subscribe_state();

    service.shutdown().await.unwrap();
    service.shutdown().await.unwrap();

    assert_eq!(service.state(), LifecycleState::Stopped);
    assert_eq!(*state.borrow_and_update(), LifecycleState::Stopped);
    assert_eq!(discovery.deregister_count(), 1);
    assert!(discovery.instances("customers-service").is_empty());
    assert!(service.registry().unwrap().is_deregistered());

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_fail_fast_when_registry_unreachable() {
    let discovery = Arc::new(InMemoryDiscovery::unavailable());
    let port = free_port();
    let config = test_config(port, Some(memory_registry(true)));

    let err = startup(config, Some(discovery.clone() as Arc<dyn DiscoveryClient>))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, StartupError::Registry { .. }));
    assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
    assert_eq!(discovery.register_count(), 0);

    // 启动失败后端口已释放
    StdTcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[tokio::test]
async fn test_degrades_when_fail_fast_disabled() {
    let discovery = Arc::new(InMemoryDiscovery::unavailable());
    let config = test_config(0, Some(memory_registry(false)));

    let service = startup(config, Some(discovery.clone() as Arc<dyn DiscoveryClient>))
        .await
        .unwrap();

    assert_eq!(service.state(), LifecycleState::Running);
    assert!(service.registry().is_none());

    let url = format!("http://{}/actuator/info", service.local_addr());
    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["app"]["name"], "customers-service");
    assert!(body["instance"]["id"].is_null());

    service.shutdown().await.unwrap();
    assert_eq!(discovery.deregister_count(), 0);
}

#[tokio::test]
async fn test_bind_conflict_fails_before_registration() {
    let occupied = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let discovery = Arc::new(InMemoryDiscovery::new());
    let config = test_config(port, Some(memory_registry(true)));

    let err = startup(config, Some(discovery.clone() as Arc<dyn DiscoveryClient>))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, StartupError::Bind { .. }));
    assert_eq!(err.code(), ErrorCode::AddressUnavailable);
    assert_eq!(discovery.register_count(), 0);
}

#[tokio::test]
async fn test_runs_without_registry() {
    let service = startup(test_config(0, None), None).await.unwrap();

    assert_eq!(service.state(), LifecycleState::Running);
    assert!(service.registry().is_none());

    let url = format!("http://{}/actuator/health", service.local_addr());
    assert!(reqwest::get(&url).await.unwrap().status().is_success());

    service.shutdown().await.unwrap();
    assert_eq!(service.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = test_config(0, None);
    config.runtime.service.name = String::new();

    let err = startup(config, None).await.err().unwrap();
    assert!(matches!(err, StartupError::Config { .. }));
    assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
}
