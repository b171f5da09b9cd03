use thiserror::Error;
use std::net::AddrParseError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Address parse error: {0}")]
    AddrParseError(#[from] AddrParseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 上报端点返回非2xx状态，或请求本身失败
    #[error("Transport error{}: {message}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    TransportError {
        status: Option<u16>,
        message: String,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Web server error: {0}")]
    WebServerError(String),

    #[error("Pipeline fault: {0}")]
    PipelineFault(String),
}

impl AppError {
    /// 构造一个传输错误
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        AppError::TransportError {
            status,
            message: message.into(),
        }
    }

    /// 获取错误类型的简洁摘要
    ///
    /// 返回一个稳定的错误类别字符串，便于收集端按类别聚合
    pub fn get_error_type_summary(&self) -> &'static str {
        match self {
            // 上报链路
            AppError::HttpError(_) => "telemetry_connection_failed",
            AppError::TransportError { .. } => "telemetry_delivery_failed",

            // 数据处理
            AppError::JsonError(_) => "telemetry_payload_invalid",
            AppError::InvalidInput(_) => "telemetry_input_rejected",

            // 本地持久化
            AppError::StorageError(_) => "telemetry_persistence_failed",
            AppError::IoError(_) => "telemetry_file_operation_failed",

            // 配置
            AppError::ConfigError(_) |
            AppError::TomlError(_) => "telemetry_configuration_invalid",
            AppError::AddrParseError(_) => "collector_address_invalid",

            // 服务与管道内部
            AppError::WebServerError(_) => "collector_server_failed",
            AppError::PipelineFault(_) => "telemetry_pipeline_fault",
        }
    }

    /// 检查错误是否为可重试类型
    ///
    /// 批量上报对所有失败都会退避重试，这里的判断只记录在重试日志中
    pub fn is_retryable(&self) -> bool {
        match self {
            // 网络错误通常可重试
            AppError::HttpError(_) => true,

            // 5xx、429、408 以及请求级失败可重试，其余4xx说明负载本身有问题
            AppError::TransportError { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 429 || *code == 408,
            },

            // 临时性文件系统错误可重试
            AppError::IoError(_) => true,
            AppError::StorageError(msg) => {
                msg.contains("quota") || msg.contains("busy") || msg.contains("temporarily")
            }

            AppError::JsonError(_) |
            AppError::TomlError(_) |
            AppError::AddrParseError(_) |
            AppError::ConfigError(_) |
            AppError::InvalidInput(_) => false,

            AppError::WebServerError(_) |
            AppError::PipelineFault(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
