//! Petclinic Core 错误模块
//!
//! - 启动阶段的所有失败统一归类为 [`StartupError`]
//! - 为基础设施层提供便捷的错误转换工具

use std::fmt;

use thiserror::Error;

/// 错误分类码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// 配置无法加载或不合法
    InvalidConfiguration,
    /// 监听端口无法绑定
    AddressUnavailable,
    /// 注册中心不可用或拒绝注册
    ServiceUnavailable,
    /// 服务运行期错误
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidConfiguration => "INVALID_CONFIGURATION",
            ErrorCode::AddressUnavailable => "ADDRESS_UNAVAILABLE",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// 启动失败
///
/// 启动阶段的错误在本层不做重试，直接上抛并由进程以非零状态退出。
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("failed to bind listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service registry error: {message}")]
    Registry {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("server error: {0}")]
    Server(String),
}

impl StartupError {
    /// 构造配置错误
    pub fn config(message: impl Into<String>) -> Self {
        StartupError::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 构造注册中心错误
    pub fn registry(message: impl Into<String>) -> Self {
        StartupError::Registry {
            message: message.into(),
            source: None,
        }
    }

    /// 错误分类码
    pub fn code(&self) -> ErrorCode {
        match self {
            StartupError::Config { .. } => ErrorCode::InvalidConfiguration,
            StartupError::Bind { .. } => ErrorCode::AddressUnavailable,
            StartupError::Registry { .. } => ErrorCode::ServiceUnavailable,
            StartupError::Server(_) => ErrorCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, StartupError>;

/// 将基础设施错误映射为指定分类的启动错误
pub fn map_infra_error<E>(err: E, code: ErrorCode, message: &str) -> StartupError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let source: Option<Box<dyn std::error::Error + Send + Sync>> = Some(Box::new(err));
    match code {
        ErrorCode::InvalidConfiguration => StartupError::Config {
            message: message.to_string(),
            source,
        },
        ErrorCode::ServiceUnavailable => StartupError::Registry {
            message: message.to_string(),
            source,
        },
        ErrorCode::AddressUnavailable | ErrorCode::Internal => StartupError::Server(format!(
            "{message}: {}",
            source.map(|e| e.to_string()).unwrap_or_default()
        )),
    }
}
