//! Eureka 注册后端
//!
//! 使用 Eureka REST API：
//! - 注册：`POST {base}/apps/{APP}`
//! - 续约：`PUT {base}/apps/{APP}/{instanceId}`（404 表示需要重新注册）
//! - 注销：`DELETE {base}/apps/{APP}/{instanceId}`
//!
//! `{base}` 为配置的地址，未以 `/eureka` 结尾时自动补全。

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
const DATA_CENTER_CLASS: &str = "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo";

#[derive(Debug, Serialize)]
struct InstanceEnvelope<'a> {
    instance: InstanceInfo<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceInfo<'a> {
    instance_id: &'a str,
    host_name: &'a str,
    app: String,
    ip_addr: &'a str,
    vip_address: &'a str,
    secure_vip_address: &'a str,
    status: &'static str,
    port: PortInfo,
    secure_port: PortInfo,
    home_page_url: String,
    status_page_url: String,
    health_check_url: String,
    data_center_info: DataCenterInfo,
    lease_info: LeaseInfo,
    metadata: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct PortInfo {
    #[serde(rename = "$")]
    port: u16,
    #[serde(rename = "@enabled")]
    enabled: &'static str,
}

#[derive(Debug, Serialize)]
struct DataCenterInfo {
    #[serde(rename = "@class")]
    class: &'static str,
    name: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaseInfo {
    renewal_interval_in_secs: u64,
    duration_in_secs: u64,
}

pub struct EurekaDiscovery {
    http: Client,
    endpoints: Vec<String>,
    ttl_secs: u64,
    renewal_interval_secs: u64,
}

impl EurekaDiscovery {
    pub fn new(
        endpoints: &[String],
        ttl_secs: u64,
        renewal_interval_secs: u64,
    ) -> Result<Self, DiscoveryError> {
        if endpoints.is_empty() {
            return Err(DiscoveryError::Unavailable(
                "no eureka endpoints configured".to_string(),
            ));
        }

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoints: endpoints.iter().map(|e| eureka_base(e)).collect(),
            ttl_secs,
            renewal_interval_secs,
        })
    }

    async fn send<F>(&self, build: F) -> Result<Response, DiscoveryError>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            match build(&self.http, endpoint).send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "eureka server unreachable");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .map(DiscoveryError::Http)
            .unwrap_or_else(|| DiscoveryError::Unavailable("no eureka endpoints".to_string())))
    }
}

/// Eureka 的应用名为大写服务名
fn app_name(service_name: &str) -> String {
    service_name.to_uppercase()
}

fn eureka_base(endpoint: &str) -> String {
    let base = normalize_endpoint(endpoint);
    if base.ends_with("/eureka") {
        base
    } else {
        format!("{base}/eureka")
    }
}

async fn rejected(response: Response) -> DiscoveryError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    DiscoveryError::Rejected { status, body }
}

#[async_trait]
impl DiscoveryClient for EurekaDiscovery {
    fn backend_name(&self) -> &'static str {
        "eureka"
    }

    async fn register(&self, instance: &ServiceInstance) -> Result<Registration, DiscoveryError> {
        let app = app_name(&instance.service_name);
        let base_url = instance.base_url();
        let envelope = InstanceEnvelope {
            instance: InstanceInfo {
                instance_id: &instance.instance_id,
                host_name: &instance.host,
                app: app.clone(),
                ip_addr: &instance.host,
                vip_address: &instance.service_name,
                secure_vip_address: &instance.service_name,
                status: "UP",
                port: PortInfo {
                    port: instance.port,
                    enabled: "true",
                },
                secure_port: PortInfo {
                    port: 443,
                    enabled: "false",
                },
                home_page_url: format!("{base_url}/"),
                status_page_url: format!("{base_url}/actuator/info"),
                health_check_url: instance.health_url(),
                data_center_info: DataCenterInfo {
                    class: DATA_CENTER_CLASS,
                    name: "MyOwn",
                },
                lease_info: LeaseInfo {
                    renewal_interval_in_secs: self.renewal_interval_secs,
                    duration_in_secs: self.ttl_secs,
                },
                metadata: &instance.metadata,
            },
        };

        let response = self
            .send(|http, endpoint| http.post(format!("{endpoint}/apps/{app}")).json(&envelope))
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        debug!(app = %app, instance_id = %instance.instance_id, "instance registered in eureka");
        Ok(Registration::new(instance))
    }

    async fn heartbeat(&self, registration: &Registration) -> Result<(), DiscoveryError> {
        let app = app_name(&registration.service_name);
        let instance_id = &registration.instance_id;
        let response = self
            .send(|http, endpoint| http.put(format!("{endpoint}/apps/{app}/{instance_id}")))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(DiscoveryError::NotFound(instance_id.clone())),
            _ => Err(rejected(response).await),
        }
    }

    async fn deregister(&self, registration: &Registration) -> Result<(), DiscoveryError> {
        let app = app_name(&registration.service_name);
        let instance_id = &registration.instance_id;
        let response = self
            .send(|http, endpoint| http.delete(format!("{endpoint}/apps/{app}/{instance_id}")))
            .await?;

        // 实例已被剔除时视为注销成功
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(rejected(response).await)
        }
    }
}
