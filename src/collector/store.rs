//! 收集端存储
//!
//! 接收到的错误保存在有界内存队列中供查询，同时逐行追加到按天滚动的 JSON 审计文件。

use crate::common::{AppError, Category, ErrorReport, Result, ServerConfig, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// 收集端保存的一条错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedError {
    pub id: u64,
    pub received_at: DateTime<Utc>,
    /// 客户端报告的时间，缺失时使用接收时间
    pub timestamp: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub source: String,
    pub level: Severity,
    pub category: Category,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub occurrences: u32,
}

impl CollectedError {
    /// 缺少 `error` 的报告返回 None
    pub fn from_report(report: ErrorReport, id: u64) -> Option<Self> {
        let message = report.error_message()?;
        let received_at = Utc::now();
        Some(Self {
            id,
            received_at,
            timestamp: report
                .timestamp
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| received_at.to_rfc3339()),
            message,
            stack: report.stack.filter(|s| !s.trim().is_empty()),
            source: report
                .source
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "client".to_string()),
            level: report
                .level
                .as_deref()
                .map(Severity::parse_lenient)
                .unwrap_or(Severity::Error),
            category: report
                .category
                .as_deref()
                .map(Category::parse_lenient)
                .unwrap_or_default(),
            context: report
                .context
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            fingerprint: report.fingerprint,
            occurrences: report.occurrences.unwrap_or(1).max(1),
        })
    }
}

/// 批量接收结果
///
/// 一批要么全部写入，要么整体失败，客户端重发时不会出现重复条目。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub accepted: usize,
    pub skipped: usize,
}

/// 按天滚动的 JSON 行审计文件
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl AuditLog {
    /// `path` 的父目录为日志目录，文件名作为滚动文件的前缀
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::ConfigError(format!("无效的审计日志路径: {}", path.display())))?;

        std::fs::create_dir_all(dir)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .build(dir)
            .map_err(|e| AppError::StorageError(format!("无法创建审计日志: {}", e)))?;

        info!(target: "collector", path = %path.display(), "📝 审计日志已打开");
        Ok(Self::with_writer(path, appender))
    }

    /// 使用任意写入端，`path` 只用于展示
    pub fn with_writer<W: Write + Send + 'static>(path: impl Into<PathBuf>, writer: W) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 所有记录序列化成功后一次性写入
    fn append_all(&self, records: &[CollectedError]) -> Result<()> {
        let mut lines = String::new();
        for record in records {
            lines.push_str(&serde_json::to_string(record)?);
            lines.push('\n');
        }
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(lines.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

/// 收集端错误存储
pub struct ErrorStore {
    max_entries: usize,
    entries: Mutex<VecDeque<CollectedError>>,
    next_id: AtomicU64,
    audit: Option<AuditLog>,
}

impl ErrorStore {
    pub fn new(max_entries: usize, audit: Option<AuditLog>) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            audit,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let audit = match config.log_file.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(AuditLog::open(path)?),
            _ => None,
        };
        Ok(Self::new(config.max_entries, audit))
    }

    pub fn audit_path(&self) -> Option<&Path> {
        self.audit.as_ref().map(AuditLog::path)
    }

    /// 保存一条报告；缺少 `error` 时返回 `Ok(None)`
    ///
    /// 审计文件写入失败时该条不进入内存队列。
    pub fn record(&self, report: ErrorReport) -> Result<Option<CollectedError>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let Some(record) = CollectedError::from_report(report, id) else {
            return Ok(None);
        };
        self.admit(vec![record.clone()])?;
        Ok(Some(record))
    }

    /// 保存一批报告，缺少 `error` 的条目被跳过
    ///
    /// 审计写入失败时整批都不进入内存队列。
    pub fn record_batch(&self, reports: Vec<ErrorReport>) -> Result<BatchSummary> {
        let total = reports.len();
        let records: Vec<CollectedError> = reports
            .into_iter()
            .filter_map(|report| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                CollectedError::from_report(report, id)
            })
            .collect();
        let summary = BatchSummary {
            accepted: records.len(),
            skipped: total - records.len(),
        };

        self.admit(records)?;
        if summary.skipped > 0 {
            warn!(target: "collector", skipped = summary.skipped, "批量报告中有条目缺少 error 字段");
        }
        Ok(summary)
    }

    /// 先写审计文件，成功后再进入内存队列
    fn admit(&self, records: Vec<CollectedError>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(audit) = &self.audit {
            audit.append_all(&records).map_err(|e| {
                error!(
                    target: "collector",
                    error_type = e.get_error_type_summary(),
                    count = records.len(),
                    "写入审计日志失败: {}", e
                );
                e
            })?;
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            mirror(&record);
            entries.push_back(record);
        }
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        Ok(())
    }

    /// 从旧到新
    pub fn snapshot(&self) -> Vec<CollectedError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清空内存队列，返回清除的条目数；审计文件保留
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let cleared = entries.len();
        entries.clear();
        cleared
    }
}

/// 在收集端自己的日志中输出一行
fn mirror(record: &CollectedError) {
    let source = record.source.as_str();
    let category = record.category.as_str();
    match record.level {
        Severity::Debug => debug!(target: "collector", source, category, "[{}] {}", record.level.label(), record.message),
        Severity::Info => info!(target: "collector", source, category, "[{}] {}", record.level.label(), record.message),
        Severity::Warning => warn!(target: "collector", source, category, "[{}] {}", record.level.label(), record.message),
        Severity::Error | Severity::Critical => {
            error!(target: "collector", source, category, "[{}] {}", record.level.label(), record.message)
        }
    }
}
