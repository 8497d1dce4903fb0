//! 微服务服务名定义模块
//!
//! 所有服务注册和发现必须使用此模块中定义的常量，确保一致性。
//!
//! ## 环境变量覆盖
//!
//! 为了支持不同环境部署，可以通过环境变量覆盖：
//! - 格式: `{SERVICE_NAME}`，例如 `customers-service` 对应 `CUSTOMERS_SERVICE`
//! - 例如: `CUSTOMERS_SERVICE=customers-service-dev`
//!
//! **注意**：注册和发现必须使用相同的服务名。

/// Petclinic 微服务服务名定义
pub mod service_names {
    /// Customers 服务名
    ///
    /// 负责宠物主人与宠物信息
    pub const CUSTOMERS_SERVICE: &str = "customers-service";

    /// Vets 服务名
    pub const VETS_SERVICE: &str = "vets-service";

    /// Visits 服务名
    pub const VISITS_SERVICE: &str = "visits-service";

    /// API Gateway 服务名
    ///
    /// 通过注册中心按服务名定位后端实例
    pub const API_GATEWAY: &str = "api-gateway";

    /// 注册中心自身的服务名
    pub const DISCOVERY_SERVER: &str = "discovery-server";
}

/// 服务名验证函数
///
/// 验证服务名是否有效（是否在常量定义中）
pub fn validate_service_name(name: &str) -> bool {
    matches!(
        name,
        service_names::CUSTOMERS_SERVICE
            | service_names::VETS_SERVICE
            | service_names::VISITS_SERVICE
            | service_names::API_GATEWAY
            | service_names::DISCOVERY_SERVER
    )
}

/// 获取服务名的环境变量名称
pub fn service_name_env_var(service_name: &str) -> String {
    // "customers-service" -> "CUSTOMERS_SERVICE"
    service_name.to_uppercase().replace('-', "_")
}

/// 读取服务名环境变量
///
/// 例如 `CUSTOMERS_SERVICE=customers-service-dev`，未设置或为空时返回 `None`
pub fn service_name_from_env<F>(constant_name: &str, env: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(&service_name_env_var(constant_name)).filter(|name| !name.trim().is_empty())
}

// 重新导出，方便使用
pub use service_names::*;
