//! etcd 注册后端
//!
//! 实例以 JSON 形式写入 `/{namespace}/{service_name}/{instance_id}`，
//! 键绑定到租约上：续约即租约 keep-alive，注销即撤销租约。

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, PutOptions};
use tracing::{debug, warn};

use super::{DiscoveryClient, DiscoveryError, Registration, ServiceInstance};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EtcdDiscovery {
    client: Client,
    namespace: String,
    ttl: i64,
}

impl EtcdDiscovery {
    /// 连接 etcd 集群
    pub async fn connect(
        endpoints: &[String],
        namespace: impl Into<String>,
        ttl_secs: u64,
    ) -> Result<Self, DiscoveryError> {
        if endpoints.is_empty() {
            return Err(DiscoveryError::Unavailable(
                "no etcd endpoints configured".to_string(),
            ));
        }

        let options = ConnectOptions::new()
            .with_connect_timeout(CONNECT_TIMEOUT)
            .with_timeout(REQUEST_TIMEOUT);
        let client = Client::connect(endpoints, Some(options)).await?;

        Ok(Self {
            client,
            namespace: namespace.into(),
            ttl: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        })
    }

    /// 实例在 etcd 中的 key
    pub fn instance_key(&self, service_name: &str, instance_id: &str) -> String {
        instance_key(&self.namespace, service_name, instance_id)
    }
}

pub(crate) fn instance_key(namespace: &str, service_name: &str, instance_id: &str) -> String {
    let namespace = namespace.trim_matches('/');
    if namespace.is_empty() {
        format!("/{service_name}/{instance_id}")
    } else {
        format!("/{namespace}/{service_name}/{instance_id}")
    }
}

#[async_trait]
impl DiscoveryClient for EtcdDiscovery {
    fn backend_name(&self) -> &'static str {
        "etcd"
    }

    async fn register(&self, instance: &ServiceInstance) -> Result<Registration, DiscoveryError> {
        let mut client = self.client.clone();
        let lease = client.lease_grant(self.ttl, None).await?;
        let lease_id = lease.id();

        let key = self.instance_key(&instance.service_name, &instance.instance_id);
        let value = serde_json::to_vec(instance)?;
        client
            .put(key.clone(), value, Some(PutOptions::new().with_lease(lease_id)))
            .await?;

        debug!(key = %key, lease_id, ttl = self.ttl, "instance written to etcd");
        Ok(Registration::new(instance).with_lease(lease_id))
    }

    async fn heartbeat(&self, registration: &Registration) -> Result<(), DiscoveryError> {
        let lease_id = registration
            .lease_id
            .ok_or_else(|| DiscoveryError::NotFound(registration.instance_id.clone()))?;

        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(lease_id).await?;
        keeper.keep_alive().await?;

        match stream.message().await? {
            Some(response) if response.ttl() > 0 => Ok(()),
            // ttl 为 0 表示租约已过期，键已被删除
            _ => Err(DiscoveryError::NotFound(registration.instance_id.clone())),
        }
    }

    async fn deregister(&self, registration: &Registration) -> Result<(), DiscoveryError> {
        let mut client = self.client.clone();

        if let Some(lease_id) = registration.lease_id {
            match client.lease_revoke(lease_id).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!(lease_id, error = %err, "lease revoke failed, deleting key directly");
                }
            }
        }

        let key = self.instance_key(&registration.service_name, &registration.instance_id);
        client.delete(key, None).await?;
        Ok(())
    }
}
