//! 统一日志系统初始化模块
//!
//! 提供跨二进制文件的日志系统初始化功能：控制台层 + 可选的按天滚动文件层。

use crate::common::{AppError, LoggingConfig, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// 日志系统的生命周期守卫，由 main 函数持有直到退出
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// 构造过滤器字符串：配置级别 + 压低第三方库噪音
pub fn build_filter_directives(log_level: &str) -> String {
    format!("{},hyper=warn,reqwest=warn,tower_http=info", log_level)
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先使用，便于外部脚本覆盖配置文件中的级别。
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let directives = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| build_filter_directives(&config.log_level));

    // 校验一次，避免配置写错时静默失效
    EnvFilter::try_new(&directives)
        .map_err(|e| AppError::ConfigError(format!("无效的日志过滤器 {}: {}", directives, e)))?;

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(EnvFilter::new(&directives))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_level(true)
            .with_filter(EnvFilter::new(&directives))
            .boxed()
    };

    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("警告：无法创建日志目录 {}: {}", dir, e);
            }
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new(&directives))
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("日志系统初始化失败: {}", e)))?;

    tracing::info!(
        event_type = "logging_config_loaded",
        log_level = %config.log_level,
        json = config.json,
        log_dir = ?config.log_dir,
        "📋 日志配置已加载并应用"
    );

    Ok(LogGuard { _file_guard: file_guard })
}
