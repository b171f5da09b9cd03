//! 遥测系统的核心数据类型定义
//!
//! 客户端管道里流动的 `LogEntry`，以及客户端与收集端之间共享的上报格式 `ErrorReport`。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 上下文映射：字符串键 → 任意可序列化值
pub type ContextMap = serde_json::Map<String, serde_json::Value>;

/// 严重级别，按 debug < info < warning < error < critical 全序排列
///
/// 序列化为小写名称；反序列化经过 `FromStr`，配置文件与上报数据接受同一组别名。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    /// 在固定顺序中的排名
    pub fn rank(self) -> u8 {
        match self {
            Severity::Debug => 0,
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Error => 3,
            Severity::Critical => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// 控制台输出使用的大写标签，例如 `[ERROR]`
    pub fn label(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    /// 宽松解析：无法识别的输入回退为 `error`
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or(Severity::Error)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" | "fatal" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, <Severity as TryFrom<String>>::Error> {
        value.parse()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Network,
    Api,
    Authentication,
    Authorization,
    Validation,
    Rendering,
    Performance,
    Dependency,
    Unknown,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Network => "network",
            Category::Api => "api",
            Category::Authentication => "authentication",
            Category::Authorization => "authorization",
            Category::Validation => "validation",
            Category::Rendering => "rendering",
            Category::Performance => "performance",
            Category::Dependency => "dependency",
            Category::Unknown => "unknown",
        }
    }

    /// 宽松解析：无法识别的类别一律归为 `unknown`
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "network" => Category::Network,
            "api" => Category::Api,
            "authentication" => Category::Authentication,
            "authorization" => Category::Authorization,
            "validation" => Category::Validation,
            "rendering" => Category::Rendering,
            "performance" => Category::Performance,
            "dependency" => Category::Dependency,
            _ => Category::Unknown,
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Unknown
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 日志条目，由门面在每次调用时创建，存储后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default)]
    pub context: ContextMap,
    pub fingerprint: String,
    #[serde(default = "default_occurrences")]
    pub occurrences: u32,
}

fn default_occurrences() -> u32 {
    1
}

impl LogEntry {
    /// 堆栈的第一行（指纹只使用这一行）
    pub fn stack_head(&self) -> Option<&str> {
        first_line(self.stack.as_deref())
    }
}

/// 取多行文本的第一行
pub fn first_line(text: Option<&str>) -> Option<&str> {
    text.and_then(|s| s.lines().next())
}

/// 调用方传入的错误：字符串或类错误值
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorInput {
    Message(String),
    Error {
        message: String,
        stack: Option<String>,
    },
}

impl ErrorInput {
    /// 从任意 `std::error::Error` 构造，错误链展开为堆栈文本
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut lines = vec![format!("{}", err)];
        let mut source = err.source();
        while let Some(cause) = source {
            lines.push(format!("Caused by: {}", cause));
            source = cause.source();
        }
        let stack = if lines.len() > 1 { Some(lines.join("\n")) } else { None };
        ErrorInput::Error {
            message: err.to_string(),
            stack,
        }
    }

    /// 归一化为 (message, stack)，空消息回退为 "Unknown error"
    pub fn normalize(self) -> (String, Option<String>) {
        let (message, stack) = match self {
            ErrorInput::Message(message) => (message, None),
            ErrorInput::Error { message, stack } => (message, stack),
        };
        let message = message.trim().to_string();
        let message = if message.is_empty() {
            "Unknown error".to_string()
        } else {
            message
        };
        let stack = stack.filter(|s| !s.trim().is_empty());
        (message, stack)
    }
}

impl From<&str> for ErrorInput {
    fn from(value: &str) -> Self {
        ErrorInput::Message(value.to_string())
    }
}

impl From<String> for ErrorInput {
    fn from(value: String) -> Self {
        ErrorInput::Message(value)
    }
}

impl From<&anyhow::Error> for ErrorInput {
    fn from(err: &anyhow::Error) -> Self {
        let chain: Vec<String> = err.chain().map(|e| e.to_string()).collect();
        let stack = if chain.len() > 1 {
            Some(chain.iter().skip(1).map(|c| format!("Caused by: {}", c)).collect::<Vec<_>>().join("\n"))
        } else {
            None
        };
        ErrorInput::Error {
            message: err.to_string(),
            stack: stack.map(|s| format!("{}\n{}", err, s)),
        }
    }
}

impl From<&crate::common::AppError> for ErrorInput {
    fn from(err: &crate::common::AppError) -> Self {
        ErrorInput::from_error(err)
    }
}

/// 单次日志调用的可选参数
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub source: Option<String>,
    pub category: Option<Category>,
    pub context: ContextMap,
}

impl LogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// 上报格式：客户端批量发送的条目，也是收集端单条接口的请求体
///
/// 所有字段都是可选的，`error` 缺失的条目由收集端拒绝或跳过。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<u32>,
}

impl ErrorReport {
    /// 提取错误消息：字符串直接使用，对象优先取 `message` 字段
    pub fn error_message(&self) -> Option<String> {
        let message = match self.error.as_ref()? {
            serde_json::Value::Null => return None,
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => match map.get("message") {
                Some(serde_json::Value::String(s)) => s.clone(),
                _ => serde_json::Value::Object(map.clone()).to_string(),
            },
            other => other.to_string(),
        };
        let message = message.trim().to_string();
        if message.is_empty() {
            None
        } else {
            Some(message)
        }
    }
}

impl From<&LogEntry> for ErrorReport {
    fn from(entry: &LogEntry) -> Self {
        Self {
            error: Some(serde_json::Value::String(entry.message.clone())),
            stack: entry.stack.clone(),
            source: Some(entry.source.clone()),
            level: Some(entry.severity.as_str().to_string()),
            category: Some(entry.category.as_str().to_string()),
            context: Some(serde_json::Value::Object(entry.context.clone())),
            timestamp: Some(entry.timestamp.to_rfc3339()),
            fingerprint: Some(entry.fingerprint.clone()),
            occurrences: Some(entry.occurrences),
        }
    }
}

/// 批量上报请求体 `{errors: [...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchPayload {
    #[serde(default)]
    pub errors: Vec<ErrorReport>,
}

impl BatchPayload {
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        Self {
            errors: entries.iter().map(ErrorReport::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}
