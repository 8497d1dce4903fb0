//! Petclinic Core 配置模块
//!
//! 该模块提供了完整的应用程序配置管理功能，包括：
//! - 配置文件加载和解析（单文件或目录合并）
//! - 环境特定配置覆盖、环境变量与启动参数覆盖
//! - 服务运行时配置、注册中心配置与日志配置定义

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::Value;
use tracing::{debug, warn};

use crate::error::{ErrorCode, Result, StartupError, map_infra_error};
use crate::service_names::{CUSTOMERS_SERVICE, validate_service_name};

mod manager;
pub use manager::{ConfigManager, ENV_PROFILE_VAR, RuntimeOverride};

/// 默认监听地址
pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0";
/// 默认监听端口
pub const DEFAULT_SERVER_PORT: u16 = 8081;
/// 默认心跳间隔（秒）
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 20;

/// 服务基本信息
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// 服务名称（注册到注册中心时使用）
    pub name: String,
    /// 服务版本
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: CUSTOMERS_SERVICE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// 服务器监听配置
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub address: String,
    /// 监听端口，0 表示由系统分配
    pub port: u16,
    /// 对外公布的地址（注册到注册中心），未配置时由监听地址推导
    pub advertise_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            port: DEFAULT_SERVER_PORT,
            advertise_address: None,
        }
    }
}

/// 注册中心配置
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegistryConfig {
    /// 注册中心类型：etcd / consul / eureka / memory
    #[serde(alias = "type")]
    pub registry_type: String,
    /// 注册中心地址列表
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// 命名空间（etcd key 前缀）
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// 注册租约 TTL（秒）
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// 心跳间隔（秒）
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
    /// 注册失败时是否终止启动
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
    /// 固定实例 ID，未配置时自动生成
    #[serde(default)]
    pub instance_id: Option<String>,
    /// 实例元数据
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_namespace() -> String {
    "petclinic".to_string()
}

fn default_ttl() -> u64 {
    30
}

fn default_fail_fast() -> bool {
    true
}

impl RegistryConfig {
    /// 构造指定类型的注册中心配置，其余字段取默认值
    pub fn new(registry_type: impl Into<String>, endpoints: Vec<String>) -> Self {
        Self {
            registry_type: registry_type.into(),
            endpoints,
            namespace: default_namespace(),
            ttl: default_ttl(),
            heartbeat_interval_secs: None,
            fail_fast: default_fail_fast(),
            instance_id: None,
            metadata: HashMap::new(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
    /// 是否输出 JSON 格式
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            json: false,
        }
    }
}

/// 核心配置
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub server: ServerConfig,
    pub registry: Option<RegistryConfig>,
}

impl Config {
    /// 解析监听地址
    ///
    /// 支持 IPv4/IPv6 字面量（`::` 与 `[::1]` 均可）以及主机名。
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let address = self.server.address.trim();
        let host = address
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(address);

        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.server.port));
        }

        let invalid = || {
            StartupError::config(format!(
                "invalid server address {}:{}",
                self.server.address, self.server.port
            ))
        };
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }

        (host, self.server.port)
            .to_socket_addrs()
            .map_err(|err| {
                map_infra_error(
                    err,
                    ErrorCode::InvalidConfiguration,
                    &format!("unable to resolve server address {host}"),
                )
            })?
            .next()
            .ok_or_else(invalid)
    }

    /// 校验运行时配置
    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(StartupError::config("service name must not be empty"));
        }
        if !validate_service_name(&self.service.name) {
            warn!(
                service = %self.service.name,
                "service name is not a well-known petclinic service"
            );
        }
        self.bind_addr()?;
        if let Some(registry) = &self.registry {
            if registry.registry_type.trim().is_empty() {
                return Err(StartupError::config("registry type must not be empty"));
            }
            let needs_endpoints = !registry.registry_type.eq_ignore_ascii_case("memory");
            if needs_endpoints && registry.endpoints.is_empty() {
                return Err(StartupError::config(format!(
                    "registry type {} requires at least one endpoint",
                    registry.registry_type
                )));
            }
            if registry.ttl == 0 {
                return Err(StartupError::config("registry ttl must be positive"));
            }
        }
        Ok(())
    }
}

/// 服务端点配置
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ServiceEndpointConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
}

/// 服务运行时配置
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ServiceRuntimeConfig {
    /// 服务名称
    #[serde(default)]
    pub service_name: Option<String>,
    /// 服务器配置
    #[serde(default)]
    pub server: Option<ServiceEndpointConfig>,
    /// 注册中心配置
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
}

/// 客户服务配置
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct CustomersServiceConfig {
    /// 运行时配置
    #[serde(flatten)]
    pub runtime: ServiceRuntimeConfig,
    /// 优雅停机等待时间（秒）
    #[serde(default)]
    pub shutdown_timeout_secs: Option<u64>,
}

/// 服务配置集合
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ServicesConfig {
    #[serde(default)]
    pub customers: Option<CustomersServiceConfig>,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct PetclinicAppConfig {
    /// 核心配置
    #[serde(flatten)]
    pub core: Config,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 服务配置
    #[serde(default)]
    pub services: ServicesConfig,
    /// 环境变量与启动参数中的运行时覆盖，按出现顺序保存
    #[serde(skip)]
    pub overrides: Vec<RuntimeOverride>,
}

impl PetclinicAppConfig {
    /// 获取客户服务配置
    pub fn customers_service(&self) -> CustomersServiceConfig {
        self.services.customers.clone().unwrap_or_default()
    }

    /// 组合服务配置
    ///
    /// 优先级由低到高：核心配置、服务配置段、`deployed_name`（服务名环境变量）、
    /// 环境变量与启动参数覆盖。
    pub fn compose_service_config(
        &self,
        runtime: &ServiceRuntimeConfig,
        deployed_name: Option<&str>,
    ) -> Config {
        let mut cfg = self.core.clone();

        if let Some(name) = runtime.service_name.as_deref().filter(|n| !n.trim().is_empty()) {
            cfg.service.name = name.to_string();
        }
        if let Some(name) = deployed_name.filter(|n| !n.trim().is_empty()) {
            cfg.service.name = name.to_string();
        }

        if let Some(server) = runtime.server.as_ref() {
            if let Some(address) = server.address.as_ref() {
                cfg.server.address = address.clone();
            }
            if let Some(port) = server.port {
                cfg.server.port = port;
            }
        }

        if let Some(registry) = runtime.registry.as_ref() {
            cfg.registry = Some(registry.clone());
        }

        for runtime_override in &self.overrides {
            runtime_override.apply(&mut cfg);
        }

        cfg
    }

    /// 确保配置有默认值
    fn ensure_defaults(&mut self) {
        if self.core.server.address.is_empty() {
            self.core.server.address = DEFAULT_SERVER_ADDRESS.to_string();
        }
        if self.core.service.name.is_empty() {
            self.core.service.name = CUSTOMERS_SERVICE.to_string();
        }
    }
}

/// 加载配置
///
/// * 指定路径时，路径必须存在且可解析
/// * 未指定路径时依次尝试 `config/` 目录与 `config.toml`，均不存在时使用默认配置
///
/// 加载后依次叠加环境配置（`environments/{env}.toml`）与环境变量覆盖。
pub fn load_config(path: Option<&str>) -> Result<PetclinicAppConfig> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// 加载配置，并应用启动参数中的 `--key=value` 覆盖
pub fn load_config_with_args<I, S>(path: Option<&str>, args: I) -> Result<PetclinicAppConfig>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cfg = load_config(path)?;
    ConfigManager::apply_arg_overrides(&mut cfg, args)?;
    Ok(cfg)
}

/// 使用指定的环境变量读取函数加载配置
pub fn load_config_with<F>(path: Option<&str>, env: F) -> Result<PetclinicAppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let (mut merged, config_root) = match path {
        Some(p) => {
            let path = PathBuf::from(p);
            let value = load_config_source(&path)?;
            (value, environment_root(&path))
        }
        None => load_with_fallback(&[PathBuf::from("config"), PathBuf::from("config.toml")])?,
    };

    let profile = ConfigManager::get_environment_from(&env);
    ConfigManager::load_environment_config(&mut merged, &config_root, &profile)?;

    let mut cfg: PetclinicAppConfig = merged.try_into().map_err(|err| {
        map_infra_error(
            err,
            ErrorCode::InvalidConfiguration,
            "invalid configuration after merging",
        )
    })?;
    cfg.ensure_defaults();

    ConfigManager::apply_env_overrides(&mut cfg, &env)?;
    Ok(cfg)
}

/// 环境配置所在目录
fn environment_root(source: &Path) -> PathBuf {
    if source.is_dir() {
        source.join("environments")
    } else {
        source
            .parent()
            .map(|parent| parent.join("environments"))
            .unwrap_or_else(|| PathBuf::from("environments"))
    }
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> Result<(Value, PathBuf)> {
    for path in candidates {
        if !path.exists() {
            debug!("config candidate {} not found", path.display());
            continue;
        }
        let value = load_config_source(path)?;
        return Ok((value, environment_root(path)));
    }

    warn!("no configuration source found, falling back to defaults");
    Ok((
        Value::Table(toml::map::Map::new()),
        PathBuf::from("config").join("environments"),
    ))
}

/// 从源加载配置
fn load_config_source(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(StartupError::config(format!(
            "configuration path {} does not exist",
            path.display()
        )));
    }

    if path.is_dir() {
        load_config_from_directory(path)
    } else {
        load_toml_value(path)
    }
}

/// 从目录加载配置
///
/// 以 `base.toml` 为基础，依次合并 `shared/`、`services/`、`overrides/` 下的片段。
fn load_config_from_directory(path: &Path) -> Result<Value> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(StartupError::config(format!(
            "missing base configuration: {}",
            base_file.display()
        )));
    }

    let mut merged = load_toml_value(&base_file)?;
    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;
    Ok(merged)
}

/// 合并目录中的配置
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let entries = fs::read_dir(dir).map_err(|err| {
        map_infra_error(
            err,
            ErrorCode::InvalidConfiguration,
            &format!("unable to read config directory {}", dir.display()),
        )
    })?;

    let mut paths = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    paths.sort();

    for path in paths {
        let value = load_toml_value(&path)?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
pub(crate) fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).map_err(|err| {
        map_infra_error(
            err,
            ErrorCode::InvalidConfiguration,
            &format!("unable to read config file {}", path.display()),
        )
    })?;
    let value: Value = toml::from_str(&content).map_err(|err| {
        map_infra_error(
            err,
            ErrorCode::InvalidConfiguration,
            &format!("invalid TOML content in {}", path.display()),
        )
    })?;
    if !value.is_table() {
        return Err(StartupError::config(format!(
            "configuration must be a table: {}",
            path.display()
        )));
    }
    Ok(value)
}

/// 合并值
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
