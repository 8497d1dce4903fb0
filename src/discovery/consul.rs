//! Consul 注册后端
//!
//! 通过本地 agent 的 HTTP API 注册实例，并使用 TTL 检查保活：
//! - 注册：`PUT /v1/agent/service/register`
//! - 续约：`PUT /v1/agent/check/pass/service:{id}`
//! - 注销：`PUT /v1/agent/service/deregister/{id}`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    DiscoveryClient, DiscoveryError, Registration, ServiceInstance, normalize_endpoint,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    meta: &'a HashMap<String, String>,
    check: AgentServiceCheck,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceCheck {
    #[serde(rename = "CheckID")]
    check_id: String,
    name: String,
    #[serde(rename = "TTL")]
    ttl: String,
    deregister_critical_service_after: String,
}

pub struct ConsulDiscovery {
    http: Client,
    endpoints: Vec<String>,
    ttl_secs: u64,
}

impl ConsulDiscovery {
    pub fn new(endpoints: &[String], ttl_secs: u64) -> Result<Self, DiscoveryError> {
        if endpoints.is_empty() {
            return Err(DiscoveryError::Unavailable(
                "no consul endpoints configured".to_string(),
            ));
        }

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoints: endpoints.iter().map(|e| normalize_endpoint(e)).collect(),
            ttl_secs,
        })
    }

    fn check_id(instance_id: &str) -> String {
        format!("service:{instance_id}")
    }

    /// 依次尝试各个 agent 地址，传输层失败时切换到下一个
    async fn send<F>(&self, build: F) -> Result<Response, DiscoveryError>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            match build(&self.http, endpoint).send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "consul agent unreachable");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .map(DiscoveryError::Http)
            .unwrap_or_else(|| DiscoveryError::Unavailable("no consul endpoints".to_string())))
    }
}

fn ttl_check(instance: &ServiceInstance, ttl_secs: u64) -> AgentServiceCheck {
    AgentServiceCheck {
        check_id: ConsulDiscovery::check_id(&instance.instance_id),
        name: format!("{} ttl", instance.service_name),
        ttl: format!("{ttl_secs}s"),
        deregister_critical_service_after: format!("{}s", ttl_secs.saturating_mul(3)),
    }
}

async fn ensure_success(response: Response) -> Result<Response, DiscoveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DiscoveryError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DiscoveryClient for ConsulDiscovery {
    fn backend_name(&self) -> &'static str {
        "consul"
    }

    async fn register(&self, instance: &ServiceInstance) -> Result<Registration, DiscoveryError> {
        let body = AgentServiceRegistration {
            id: &instance.instance_id,
            name: &instance.service_name,
            address: &instance.host,
            port: instance.port,
            meta: &instance.metadata,
            check: ttl_check(instance, self.ttl_secs),
        };

        let response = self
            .send(|http, endpoint| {
                http.put(format!("{endpoint}/v1/agent/service/register"))
                    .json(&body)
            })
            .await?;
        ensure_success(response).await?;

        // 注册后立即置为 passing，避免首个 TTL 周期内处于 critical
        let registration = Registration::new(instance);
        if let Err(err) = self.heartbeat(&registration).await {
            // 置为 passing 失败时撤回注册
            if let Err(cleanup) = self.deregister(&registration).await {
                warn!(
                    instance_id = %instance.instance_id,
                    error = %cleanup,
                    "failed to withdraw consul registration"
                );
            }
            return Err(err);
        }

        debug!(instance_id = %instance.instance_id, "instance registered in consul");
        Ok(registration)
    }

    async fn heartbeat(&self, registration: &Registration) -> Result<(), DiscoveryError> {
        let check_id = Self::check_id(&registration.instance_id);
        let response = self
            .send(|http, endpoint| http.put(format!("{endpoint}/v1/agent/check/pass/{check_id}")))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DiscoveryError::NotFound(registration.instance_id.clone()));
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn deregister(&self, registration: &Registration) -> Result<(), DiscoveryError> {
        let instance_id = &registration.instance_id;
        let response = self
            .send(|http, endpoint| {
                http.put(format!(
                    "{endpoint}/v1/agent/service/deregister/{instance_id}"
                ))
            })
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}
