//! Eureka 注册后端集成测试

use httpmock::prelude::*;
use petclinic_core::config::RegistryConfig;
use petclinic_core::discovery::{
    DiscoveryClient, DiscoveryError, EurekaDiscovery, Registration, ServiceInstance, create_client,
};

fn instance() -> ServiceInstance {
    ServiceInstance::new("customers-service", "customers-1", "10.0.0.5", 8081)
}

fn eureka(server: &MockServer) -> EurekaDiscovery {
    EurekaDiscovery::new(&[server.base_url()], 90, 30).unwrap()
}

#[tokio::test]
async fn test_register_posts_instance_envelope() {
    let server = MockServer::start_async().await;
    let register_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/eureka/apps/CUSTOMERS-SERVICE")
                .json_body_partial(
                    r#"{
                        "instance": {
                            "instanceId": "customers-1",
                            "app": "CUSTOMERS-SERVICE",
                            "ipAddr": "10.0.0.5",
                            "vipAddress": "customers-service",
                            "status": "UP",
                            "port": { "$": 8081, "@enabled": "true" },
                            "healthCheckUrl": "http://10.0.0.5:8081/actuator/health",
                            "leaseInfo": { "renewalIntervalInSecs": 30, "durationInSecs": 90 }
                        }
                    }"#,
                );
            then.status(204);
        })
        .await;

    let registration = eureka(&server).register(&instance()).await.unwrap();

    assert_eq!(registration.service_name, "customers-service");
    register_mock.assert_async().await;
}

#[tokio::test]
async fn test_heartbeat_evicted_instance_is_not_found() {
    let server = MockServer::start_async().await;
    let renew_mock = server
        .mock_async(|when, then| {
            when.method(PUT).path("/eureka/apps/CUSTOMERS-SERVICE/customers-1");
            then.status(404);
        })
        .await;

    let err = eureka(&server)
        .heartbeat(&Registration::new(&instance()))
        .await
        .unwrap_err();

    assert!(matches!(err, DiscoveryError::NotFound(_)));
    renew_mock.assert_async().await;
}

#[tokio::test]
async fn test_deregister_tolerates_missing_instance() {
    let server = MockServer::start_async().await;
    let cancel_mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/eureka/apps/CUSTOMERS-SERVICE/customers-1");
            then.status(404);
        })
        .await;

    eureka(&server)
        .deregister(&Registration::new(&instance()))
        .await
        .unwrap();

    cancel_mock.assert_async().await;
}

#[tokio::test]
async fn test_register_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/eureka/apps/CUSTOMERS-SERVICE");
            then.status(400).body("bad instance");
        })
        .await;

    let err = eureka(&server).register(&instance()).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Rejected { status: 400, ref body } if body == "bad instance"));
}

#[tokio::test]
async fn test_lease_info_uses_effective_heartbeat_interval() {
    let server = MockServer::start_async().await;
    let register_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/eureka/apps/CUSTOMERS-SERVICE")
                .json_body_partial(
                    r#"{ "instance": { "leaseInfo": { "renewalIntervalInSecs": 5, "durationInSecs": 10 } } }"#,
                );
            then.status(204);
        })
        .await;

    // 心跳间隔不超过 TTL 的一半
    let mut config = RegistryConfig::new("eureka", vec![server.base_url()]);
    config.ttl = 10;
    config.heartbeat_interval_secs = Some(60);

    let client = create_client(&config).await.unwrap();
    client.register(&instance()).await.unwrap();

    register_mock.assert_async().await;
}
