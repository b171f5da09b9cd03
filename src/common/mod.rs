// 导出共享模块
pub mod config;
pub mod error;
pub mod logging_setup;
pub mod models;

// 重新导出常用类型，方便使用
pub use config::{AppConfig, LoggingConfig, ServerConfig, TelemetryConfig};
pub use error::{AppError, Result};
pub use logging_setup::{init_logging, LogGuard};
pub use models::{
    BatchPayload, Category, ContextMap, ErrorInput, ErrorReport, LogEntry, LogOptions, Severity,
};
