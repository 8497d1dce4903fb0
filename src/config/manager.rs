//! 配置管理器 - 负责处理不同环境下的配置选择和覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 根据环境变量选择环境配置（profile）
//! - 加载环境特定配置并合并
//! - 环境变量与启动参数覆盖

use std::path::Path;

use toml::Value;
use tracing::{debug, info};

use super::{Config, PetclinicAppConfig, RegistryConfig, load_toml_value, merge_value};
use crate::error::{Result, StartupError};

/// 环境名称所在的环境变量
pub const ENV_PROFILE_VAR: &str = "PETCLINIC_ENV";

const ENV_SERVICE_NAME: &str = "PETCLINIC_SERVICE_NAME";
const ENV_SERVER_ADDRESS: &str = "PETCLINIC_SERVER_ADDRESS";
const ENV_SERVER_PORT: &str = "PETCLINIC_SERVER_PORT";
const ENV_REGISTRY_TYPE: &str = "PETCLINIC_REGISTRY_TYPE";
const ENV_REGISTRY_ENDPOINTS: &str = "PETCLINIC_REGISTRY_ENDPOINTS";
const ENV_LOG_LEVEL: &str = "PETCLINIC_LOG_LEVEL";

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从 PETCLINIC_ENV 读取，未设置时默认为 "development"
    pub fn get_environment_from<F>(env: &F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        env(ENV_PROFILE_VAR)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 `{environments_dir}/{environment}.toml` 文件中的配置，
    /// 并将其合并到基础配置中；文件不存在时忽略
    pub fn load_environment_config(
        base_config: &mut Value,
        environments_dir: &Path,
        environment: &str,
    ) -> Result<()> {
        let env_config_path = environments_dir.join(format!("{environment}.toml"));

        if env_config_path.exists() {
            let env_config = load_toml_value(&env_config_path)?;
            merge_value(base_config, env_config);
            info!(
                environment = %environment,
                path = %env_config_path.display(),
                "environment configuration applied"
            );
        } else {
            debug!(
                environment = %environment,
                "no environment specific configuration found"
            );
        }

        Ok(())
    }

    /// 应用环境变量覆盖
    ///
    /// 环境变量取值非法时返回配置错误。
    pub fn apply_env_overrides<F>(config: &mut PetclinicAppConfig, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pairs = [
            (ENV_SERVICE_NAME, "service.name"),
            (ENV_SERVER_ADDRESS, "server.address"),
            (ENV_SERVER_PORT, "server.port"),
            (ENV_REGISTRY_TYPE, "registry.type"),
            (ENV_REGISTRY_ENDPOINTS, "registry.endpoints"),
            (ENV_LOG_LEVEL, "logging.level"),
        ];

        for (var, key) in pairs {
            if let Some(value) = env(var) {
                Self::apply_override(config, key, &value)
                    .map_err(|err| StartupError::config(format!("{var}: {err}")))?;
            }
        }

        Ok(())
    }

    /// 应用启动参数覆盖
    ///
    /// 支持 `--server.port=8081` 形式的参数；无法识别的参数记录后忽略
    pub fn apply_arg_overrides<I, S>(config: &mut PetclinicAppConfig, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref();
            let Some((key, value)) = arg
                .strip_prefix("--")
                .and_then(|rest| rest.split_once('='))
            else {
                debug!(argument = %arg, "ignoring non-override argument");
                continue;
            };

            if key == "config" {
                continue;
            }

            if !Self::apply_override(config, key, value)? {
                debug!(key = %key, "ignoring unknown override argument");
            }
        }

        Ok(())
    }

    /// 按 key 覆盖单个配置项，返回 key 是否被识别
    ///
    /// 运行时相关的覆盖同时写入核心配置并记录下来，
    /// 组合服务配置时会在服务配置段之后再次应用。
    fn apply_override(config: &mut PetclinicAppConfig, key: &str, value: &str) -> Result<bool> {
        let runtime_override = match key {
            "service.name" => RuntimeOverride::ServiceName(value.to_string()),
            "server.address" => RuntimeOverride::ServerAddress(value.to_string()),
            "server.advertise_address" => RuntimeOverride::AdvertiseAddress(value.to_string()),
            "server.port" => RuntimeOverride::ServerPort(value.parse().map_err(|_| {
                StartupError::config(format!("invalid server port: {value}"))
            })?),
            "registry.type" => RuntimeOverride::RegistryType(value.to_string()),
            "registry.endpoints" => RuntimeOverride::RegistryEndpoints(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            "logging.level" => {
                config.logging.level = value.to_string();
                return Ok(true);
            }
            _ => return Ok(false),
        };

        runtime_override.apply(&mut config.core);
        config.overrides.push(runtime_override);
        Ok(true)
    }
}

/// 作用于服务运行时配置的单项覆盖
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeOverride {
    ServiceName(String),
    ServerAddress(String),
    AdvertiseAddress(String),
    ServerPort(u16),
    RegistryType(String),
    /// 未配置注册中心时会创建一个类型为空的配置，由校验报告缺少类型
    RegistryEndpoints(Vec<String>),
}

impl RuntimeOverride {
    pub fn apply(&self, config: &mut Config) {
        match self {
            RuntimeOverride::ServiceName(name) => config.service.name = name.clone(),
            RuntimeOverride::ServerAddress(address) => config.server.address = address.clone(),
            RuntimeOverride::AdvertiseAddress(address) => {
                config.server.advertise_address = Some(address.clone())
            }
            RuntimeOverride::ServerPort(port) => config.server.port = *port,
            RuntimeOverride::RegistryType(registry_type) => {
                registry_mut(config).registry_type = registry_type.clone();
            }
            RuntimeOverride::RegistryEndpoints(endpoints) => {
                registry_mut(config).endpoints = endpoints.clone();
            }
        }
    }
}

fn registry_mut(config: &mut Config) -> &mut RegistryConfig {
    config
        .registry
        .get_or_insert_with(|| RegistryConfig::new(String::new(), Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_environment() {
        let env = env_from(&[]);
        assert_eq!(ConfigManager::get_environment_from(&env), "development");

        let env = env_from(&[(ENV_PROFILE_VAR, "docker")]);
        assert_eq!(ConfigManager::get_environment_from(&env), "docker");
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = PetclinicAppConfig::default();
        let env = env_from(&[
            (ENV_SERVER_PORT, "9999"),
            (ENV_REGISTRY_TYPE, "etcd"),
            (ENV_REGISTRY_ENDPOINTS, "http://a:2379, http://b:2379"),
        ]);
        ConfigManager::apply_env_overrides(&mut cfg, &env).unwrap();

        assert_eq!(cfg.core.server.port, 9999);
        let registry = cfg.core.registry.unwrap();
        assert_eq!(registry.registry_type, "etcd");
        assert_eq!(registry.endpoints, vec!["http://a:2379", "http://b:2379"]);
    }

    #[test]
    fn test_invalid_env_port() {
        let mut cfg = PetclinicAppConfig::default();
        let env = env_from(&[(ENV_SERVER_PORT, "eighty")]);
        assert!(ConfigManager::apply_env_overrides(&mut cfg, &env).is_err());
    }

    #[test]
    fn test_arg_overrides() {
        let mut cfg = PetclinicAppConfig::default();
        ConfigManager::apply_arg_overrides(
            &mut cfg,
            [
                "--server.port=0",
                "--service.name=customers-canary",
                "positional",
                "--config=config",
            ],
        )
        .unwrap();

        assert_eq!(cfg.core.server.port, 0);
        assert_eq!(cfg.core.service.name, "customers-canary");
    }

    #[test]
    fn test_unknown_arg_override_is_ignored() {
        let mut cfg = PetclinicAppConfig::default();
        ConfigManager::apply_arg_overrides(
            &mut cfg,
            ["--spring.profiles.active=docker", "--server.port=9000"],
        )
        .unwrap();

        assert_eq!(cfg.core.server.port, 9000);
        assert_eq!(cfg.overrides, vec![RuntimeOverride::ServerPort(9000)]);
    }

    #[test]
    fn test_invalid_arg_value_is_rejected() {
        let mut cfg = PetclinicAppConfig::default();
        let err = ConfigManager::apply_arg_overrides(&mut cfg, ["--server.port=http"]).unwrap_err();
        assert!(err.to_string().contains("invalid server port"));
    }

    #[test]
    fn test_endpoints_without_registry_type_fail_validation() {
        let mut cfg = PetclinicAppConfig::default();
        ConfigManager::apply_arg_overrides(&mut cfg, ["--registry.endpoints=http://x"]).unwrap();

        let registry = cfg.core.registry.as_ref().unwrap();
        assert!(registry.registry_type.is_empty());
        assert!(cfg.core.validate().is_err());
    }

    #[test]
    fn test_overrides_win_over_service_section() {
        let mut cfg = PetclinicAppConfig::default();
        cfg.services.customers = Some(crate::config::CustomersServiceConfig {
            runtime: crate::config::ServiceRuntimeConfig {
                service_name: None,
                server: Some(crate::config::ServiceEndpointConfig {
                    address: None,
                    port: Some(8081),
                }),
                registry: Some(RegistryConfig::new("memory", vec![])),
            },
            shutdown_timeout_secs: None,
        });

        let env = env_from(&[
            (ENV_REGISTRY_TYPE, "consul"),
            (ENV_REGISTRY_ENDPOINTS, "http://consul:8500"),
        ]);
        ConfigManager::apply_env_overrides(&mut cfg, &env).unwrap();
        ConfigManager::apply_arg_overrides(&mut cfg, ["--server.port=9000"]).unwrap();

        let composed = cfg.compose_service_config(&cfg.customers_service().runtime, None);
        assert_eq!(composed.server.port, 9000);
        let registry = composed.registry.unwrap();
        assert_eq!(registry.registry_type, "consul");
        assert_eq!(registry.endpoints, vec!["http://consul:8500"]);
    }
}
