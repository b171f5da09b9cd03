//! 控制台输出
//!
//! 严重级别到 tracing 宏的映射是固定的，target 统一为 `console`。

use crate::common::{LogEntry, Severity};
use tracing::{debug, error, info, warn};

/// 控制台通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleChannel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Severity> for ConsoleChannel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Debug => ConsoleChannel::Debug,
            Severity::Info => ConsoleChannel::Info,
            Severity::Warning => ConsoleChannel::Warn,
            Severity::Error | Severity::Critical => ConsoleChannel::Error,
        }
    }
}

/// `[ERROR] disk full` 形式的单行文本
pub fn format_console_line(entry: &LogEntry) -> String {
    format!("[{}] {}", entry.severity.label(), entry.message)
}

/// 输出到对应通道，返回输出的文本
pub fn emit(entry: &LogEntry) -> String {
    let line = format_console_line(entry);
    let source = entry.source.as_str();
    let category = entry.category.as_str();
    let fingerprint = entry.fingerprint.as_str();
    match ConsoleChannel::from(entry.severity) {
        ConsoleChannel::Debug => debug!(target: "console", source, category, fingerprint, "{}", line),
        ConsoleChannel::Info => info!(target: "console", source, category, fingerprint, "{}", line),
        ConsoleChannel::Warn => warn!(target: "console", source, category, fingerprint, "{}", line),
        ConsoleChannel::Error => {
            error!(target: "console", source, category, fingerprint, stack = entry.stack.as_deref().unwrap_or(""), "{}", line)
        }
    }
    line
}
