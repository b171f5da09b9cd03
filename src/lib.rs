// 导出模块
pub mod collector;
pub mod common;
pub mod logger;

// Re-export common types
pub use common::{AppError, Category, ErrorInput, LogEntry, LogOptions, Result, Severity, TelemetryConfig};
pub use logger::{spawn_monitored, ErrorBoundary, ErrorLoggingService};
