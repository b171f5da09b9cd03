//! 遥测系统配置模块
//!
//! 所有字段都有默认值，配置文件中缺省的键会回退到默认配置。

use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::common::{AppError, Result, Severity};

/// 系统配置常量
pub mod constants {
    /// 默认配置文件路径
    pub const DEFAULT_CONFIG_PATH: &str = "config/telemetry.toml";

    /// 覆盖配置文件路径的环境变量
    pub const CONFIG_PATH_ENV: &str = "TELEMETRY_CONFIG";

    /// 本地持久化默认保留的条目数
    pub const DEFAULT_MAX_LOCAL_STORAGE_ERRORS: usize = 100;

    /// 收集端内存中默认保留的条目数
    pub const DEFAULT_SERVER_MAX_ENTRIES: usize = 1000;
}

use constants::*;

fn default_true() -> bool {
    true
}

fn default_log_endpoint() -> String {
    "http://127.0.0.1:8000/api/log/errors".to_string()
}

fn default_max_local_storage_errors() -> usize {
    DEFAULT_MAX_LOCAL_STORAGE_ERRORS
}

fn default_local_storage_key() -> String {
    "error_logs".to_string()
}

fn default_storage_dir() -> String {
    ".telemetry".to_string()
}

fn default_max_batch_size() -> usize {
    10
}

fn default_max_batch_wait_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_min_severity() -> Severity {
    Severity::Info
}

fn default_max_duplicates() -> u32 {
    5
}

/// 客户端遥测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// 是否镜像到控制台
    #[serde(default = "default_true")]
    pub log_to_console: bool,

    /// 是否批量上报到收集端
    #[serde(default = "default_true")]
    pub log_to_server: bool,

    /// 批量上报端点（完整URL）
    #[serde(default = "default_log_endpoint")]
    pub log_endpoint: String,

    /// 是否写入本地持久化存储
    #[serde(default = "default_true")]
    pub log_to_local_storage: bool,

    /// 本地持久化最多保留的条目数
    #[serde(default = "default_max_local_storage_errors")]
    pub max_local_storage_errors: usize,

    /// 本地持久化使用的键
    #[serde(default = "default_local_storage_key")]
    pub local_storage_key: String,

    /// 文件存储目录
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    #[serde(default = "default_true")]
    pub include_user_context: bool,

    /// 附加运行环境信息（浏览器信息在本地进程中的对应物）
    #[serde(default = "default_true", alias = "include_browser_info")]
    pub include_environment_info: bool,

    #[serde(default)]
    pub include_app_state: bool,

    /// 缓冲区达到该大小立即发送
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// 缓冲区从空变为非空后，最多等待多少毫秒发送
    #[serde(default = "default_max_batch_wait_ms", alias = "max_batch_wait")]
    pub max_batch_wait_ms: u64,

    /// 单次发送最多尝试的次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// 退避基准延迟（毫秒），第 n 次失败后等待 retry_delay * 2^n
    #[serde(default = "default_retry_delay_ms", alias = "retry_delay")]
    pub retry_delay_ms: u64,

    /// 采样率 (0.0-1.0)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,

    #[serde(default = "default_true")]
    pub deduplicate: bool,

    /// 同一指纹最多记录的次数
    #[serde(default = "default_max_duplicates")]
    pub max_duplicates: u32,

    /// 是否安装全局捕获钩子（panic 与受监控任务的失败）
    #[serde(default = "default_true")]
    pub capture_global_errors: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_to_console: true,
            log_to_server: true,
            log_endpoint: default_log_endpoint(),
            log_to_local_storage: true,
            max_local_storage_errors: default_max_local_storage_errors(),
            local_storage_key: default_local_storage_key(),
            storage_dir: default_storage_dir(),
            include_user_context: true,
            include_environment_info: true,
            include_app_state: false,
            max_batch_size: default_max_batch_size(),
            max_batch_wait_ms: default_max_batch_wait_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            sample_rate: default_sample_rate(),
            min_severity: default_min_severity(),
            deduplicate: true,
            max_duplicates: default_max_duplicates(),
            capture_global_errors: true,
        }
    }
}

impl TelemetryConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(AppError::ConfigError("批量大小必须大于0".to_string()));
        }

        if self.max_retries == 0 {
            return Err(AppError::ConfigError("最大尝试次数必须大于0".to_string()));
        }

        if !(0.0..=1.0).contains(&self.sample_rate) || self.sample_rate.is_nan() {
            return Err(AppError::ConfigError(format!(
                "采样率必须在 0.0 到 1.0 之间: {}",
                self.sample_rate
            )));
        }

        if self.log_to_local_storage {
            if self.max_local_storage_errors == 0 {
                return Err(AppError::ConfigError("本地持久化上限必须大于0".to_string()));
            }
            if self.local_storage_key.trim().is_empty() {
                return Err(AppError::ConfigError("本地持久化键不能为空".to_string()));
            }
        }

        if self.deduplicate && self.max_duplicates == 0 {
            return Err(AppError::ConfigError("去重上限必须大于0".to_string()));
        }

        if self.log_to_server && self.log_endpoint.trim().is_empty() {
            return Err(AppError::ConfigError("上报端点不能为空".to_string()));
        }

        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_server_max_entries() -> usize {
    DEFAULT_SERVER_MAX_ENTRIES
}

fn default_server_log_file() -> Option<String> {
    Some("logs/client_errors.jsonl".to_string())
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}

/// 收集端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// 内存快照最多保留的条目数
    #[serde(default = "default_server_max_entries")]
    pub max_entries: usize,

    /// 审计文件（JSON Lines），为空则不落盘
    #[serde(default = "default_server_log_file")]
    pub log_file: Option<String>,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_entries: default_server_max_entries(),
            log_file: default_server_log_file(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(AppError::ConfigError("监听端口必须大于0".to_string()));
        }
        if self.max_entries == 0 {
            return Err(AppError::ConfigError("收集端保留条目数必须大于0".to_string()));
        }
        Ok(())
    }

    /// 监听地址
    pub fn bind_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> Option<String> {
    Some("logs".to_string())
}

fn default_file_prefix() -> String {
    "telemetry.log".to_string()
}

/// 本进程自身的日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别 / EnvFilter 指令 (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 控制台是否输出JSON格式
    #[serde(default)]
    pub json: bool,

    /// 按天滚动的日志目录，为空则只输出到控制台
    #[serde(default = "default_log_dir")]
    pub log_dir: Option<String>,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            log_dir: default_log_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

/// 总配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML文本解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 按 `TELEMETRY_CONFIG` 环境变量或默认路径加载；文件不存在时使用默认配置
    pub fn load(explicit_path: Option<&str>) -> Result<Self> {
        let config_path = explicit_path
            .map(|p| p.to_string())
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else if explicit_path.is_some() {
            Err(AppError::ConfigError(format!("配置文件不存在: {}", config_path)))
        } else {
            Ok(Self::default())
        }
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::ConfigError(format!("序列化配置失败: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.telemetry.validate()?;
        self.server.validate()?;
        Ok(())
    }
}
