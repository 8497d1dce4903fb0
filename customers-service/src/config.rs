use std::time::Duration;

use petclinic_core::config::{Config, PetclinicAppConfig};
use petclinic_core::service_names::{CUSTOMERS_SERVICE, service_name_from_env};

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct CustomersConfig {
    /// 组合后的运行时配置（服务名、监听地址、注册中心）
    pub runtime: Config,
    /// 优雅停机时等待在途请求完成的最长时间
    pub shutdown_timeout: Duration,
}

impl CustomersConfig {
    pub fn from_app_config(app: &PetclinicAppConfig) -> Self {
        Self::from_app_config_with(app, |key| std::env::var(key).ok())
    }

    /// 使用指定的环境变量读取函数组合配置
    ///
    /// `CUSTOMERS_SERVICE` 环境变量可覆盖配置文件中的服务名。
    pub fn from_app_config_with<F>(app: &PetclinicAppConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let service = app.customers_service();
        let deployed_name = service_name_from_env(CUSTOMERS_SERVICE, &env);
        let runtime = app.compose_service_config(&service.runtime, deployed_name.as_deref());

        let shutdown_timeout = Duration::from_secs(
            service
                .shutdown_timeout_secs
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        );

        Self {
            runtime,
            shutdown_timeout,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.runtime.service.name
    }
}

impl Default for CustomersConfig {
    fn default() -> Self {
        Self::from_app_config(&PetclinicAppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petclinic_core::config::{
        CustomersServiceConfig, RegistryConfig, ServiceEndpointConfig, ServiceRuntimeConfig,
    };

    #[test]
    fn test_service_section_overrides_core() {
        let mut app = PetclinicAppConfig::default();
        app.services.customers = Some(CustomersServiceConfig {
            runtime: ServiceRuntimeConfig {
                service_name: None,
                server: Some(ServiceEndpointConfig {
                    address: Some("127.0.0.1".to_string()),
                    port: Some(0),
                }),
                registry: Some(RegistryConfig::new("memory", vec![])),
            },
            shutdown_timeout_secs: Some(3),
        });

        let config = CustomersConfig::from_app_config(&app);
        assert_eq!(config.service_name(), "customers-service");
        assert_eq!(config.runtime.server.address, "127.0.0.1");
        assert_eq!(config.runtime.server.port, 0);
        assert!(config.runtime.registry.is_some());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_service_name_env_var() {
        let env = |key: &str| (key == "CUSTOMERS_SERVICE").then(|| "customers-service-dev".to_string());
        let config = CustomersConfig::from_app_config_with(&PetclinicAppConfig::default(), env);
        assert_eq!(config.service_name(), "customers-service-dev");
    }

    #[test]
    fn test_defaults() {
        let config = CustomersConfig::default();
        assert_eq!(config.runtime.server.port, 8081);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }
}
