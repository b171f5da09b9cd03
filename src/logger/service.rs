//! 错误日志服务（门面）
//!
//! 每次 `log_*` 调用依次经过：
//! 采样 → 级别过滤 → 归一化 → 合并上下文 → 指纹/去重 → 控制台 → 本地持久化 → 批量上报 → 监听器
//!
//! 服务在启动时用注入的配置构造一次，以 `Arc` 句柄传递给调用方。
//! 任何内部故障都被转换为 `false` 返回值，不会传播给调用方。

use crate::common::{
    AppError, Category, ContextMap, ErrorInput, LogEntry, LogOptions, Result, Severity,
    TelemetryConfig,
};
use crate::logger::batch::{BatchQueue, BatchSettings, BatchStats, FlushOutcome};
use crate::logger::console;
use crate::logger::context::ContextProviders;
use crate::logger::filter::{Sampler, SeverityFilter};
use crate::logger::fingerprint::{compute_fingerprint, DedupDecision, DedupTracker};
use crate::logger::hooks::{self, HookSuppression};
use crate::logger::listeners::{panic_message, ListenerBus, ListenerId};
use crate::logger::store::{FileStorage, KeyValueStorage, LocalLogStore};
use crate::logger::transport::{HttpTransport, LogTransport, NullTransport};
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};

/// 未指定来源时使用的默认值
pub const DEFAULT_SOURCE: &str = "client";

/// 单次调用在管道中的去向
#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    /// 未被采样
    Sampled,
    /// 低于最低级别
    Filtered,
    /// 同一指纹超过上限
    Suppressed,
    Recorded(LogEntry),
}

impl LogOutcome {
    pub fn entry(&self) -> Option<&LogEntry> {
        match self {
            LogOutcome::Recorded(entry) => Some(entry),
            _ => None,
        }
    }
}

pub struct ErrorLoggingService {
    config: TelemetryConfig,
    filter: SeverityFilter,
    sampler: Sampler,
    dedup: DedupTracker,
    store: Option<LocalLogStore>,
    batch: BatchQueue,
    listeners: ListenerBus,
    context: ContextProviders,
}

impl ErrorLoggingService {
    /// 使用给定的存储和传输构造服务，不安装全局钩子
    pub fn new(
        config: TelemetryConfig,
        storage: Arc<dyn KeyValueStorage>,
        transport: Arc<dyn LogTransport>,
    ) -> Arc<Self> {
        let store = config.log_to_local_storage.then(|| {
            LocalLogStore::open(
                storage,
                config.local_storage_key.clone(),
                config.max_local_storage_errors,
            )
        });

        Arc::new(Self {
            filter: SeverityFilter::new(config.min_severity),
            sampler: Sampler::new(config.sample_rate),
            dedup: DedupTracker::new(config.max_duplicates),
            store,
            batch: BatchQueue::new(BatchSettings::from(&config), transport),
            listeners: ListenerBus::new(),
            context: ContextProviders::new(),
            config,
        })
    }

    /// 按配置构造：文件存储 + HTTP 上报，`capture_global_errors` 为真时安装全局钩子
    pub fn init(config: TelemetryConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let storage: Arc<dyn KeyValueStorage> = Arc::new(FileStorage::new(&config.storage_dir)?);
        let transport: Arc<dyn LogTransport> = if config.log_to_server {
            Arc::new(HttpTransport::new(config.log_endpoint.clone())?)
        } else {
            Arc::new(NullTransport)
        };

        let capture = config.capture_global_errors;
        let service = Self::new(config, storage, transport);
        if capture {
            service.install_global_hooks();
        }

        info!(
            target: "telemetry",
            endpoint = %service.config.log_endpoint,
            log_to_server = service.config.log_to_server,
            min_severity = %service.config.min_severity,
            "✅ 错误日志服务已初始化"
        );
        Ok(service)
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn install_global_hooks(self: &Arc<Self>) {
        hooks::attach(self);
    }

    /// 拆除全局钩子；钩子当前指向其它服务时不做任何事
    pub fn detach_global_hooks(&self) -> bool {
        hooks::detach(self)
    }

    pub fn log_error(&self, error: impl Into<ErrorInput>, options: LogOptions) -> bool {
        self.log(Severity::Error, error, options)
    }

    pub fn log_warning(&self, error: impl Into<ErrorInput>, options: LogOptions) -> bool {
        self.log(Severity::Warning, error, options)
    }

    pub fn log_info(&self, error: impl Into<ErrorInput>, options: LogOptions) -> bool {
        self.log(Severity::Info, error, options)
    }

    pub fn log_debug(&self, error: impl Into<ErrorInput>, options: LogOptions) -> bool {
        self.log(Severity::Debug, error, options)
    }

    pub fn log_critical(&self, error: impl Into<ErrorInput>, options: LogOptions) -> bool {
        self.log(Severity::Critical, error, options)
    }

    /// 被采样、过滤、抑制的调用同样返回 true；只有内部故障返回 false
    pub fn log(&self, severity: Severity, error: impl Into<ErrorInput>, options: LogOptions) -> bool {
        match self.record(severity, error.into(), options) {
            Ok(_) => true,
            Err(e) => {
                eprintln!("[Error Logger] 记录日志失败: {}", e);
                false
            }
        }
    }

    /// 与 `log` 相同，但返回本次调用的去向
    pub fn record(&self, severity: Severity, error: ErrorInput, options: LogOptions) -> Result<LogOutcome> {
        let _quiet = HookSuppression::enter();
        catch_unwind(AssertUnwindSafe(|| self.process(severity, error, options)))
            .map_err(|payload| AppError::PipelineFault(panic_message(payload.as_ref())))
    }

    fn process(&self, severity: Severity, error: ErrorInput, options: LogOptions) -> LogOutcome {
        if !self.sampler.should_sample() {
            return LogOutcome::Sampled;
        }
        if !self.filter.is_loggable(severity) {
            return LogOutcome::Filtered;
        }

        let (message, stack) = error.normalize();
        let source = options
            .source
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let category = options.category.unwrap_or(Category::Unknown);
        let context = self.context.merge(options.context, &self.config);

        let fingerprint = compute_fingerprint(&message, stack.as_deref(), &source, category);
        let occurrences = if self.config.deduplicate {
            match self.dedup.check(&fingerprint) {
                DedupDecision::Allow { occurrences } => occurrences,
                DedupDecision::Suppress => {
                    debug!(target: "telemetry", %fingerprint, "重复日志已抑制");
                    return LogOutcome::Suppressed;
                }
            }
        } else {
            1
        };

        let entry = LogEntry {
            timestamp: Utc::now(),
            source,
            severity,
            category,
            message,
            stack,
            context,
            fingerprint,
            occurrences,
        };

        if self.config.log_to_console {
            console::emit(&entry);
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.append(entry.clone()) {
                eprintln!("[Local Log] 写入本地日志失败，仅保留在内存中: {}", e);
            }
        }

        if self.config.log_to_server {
            self.batch.enqueue(entry.clone());
        }

        self.listeners.notify(&entry);
        LogOutcome::Recorded(entry)
    }

    /// 本地持久化日志的快照（从旧到新）
    pub fn get_errors(&self) -> Vec<LogEntry> {
        self.store.as_ref().map(LocalLogStore::all).unwrap_or_default()
    }

    /// 清空持久化日志、去重计数和未发送的批次
    pub fn clear_errors(&self) -> bool {
        self.dedup.reset();
        self.batch.clear();
        match self.store.as_ref().map(LocalLogStore::clear) {
            Some(Err(e)) => {
                eprintln!("[Local Log] 清除本地日志失败: {}", e);
                false
            }
            _ => true,
        }
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn set_user_context(&self, user: ContextMap) {
        self.context.set_user_context(user);
    }

    pub fn clear_user_context(&self) {
        self.context.clear_user_context();
    }

    pub fn set_app_state_provider<F>(&self, provider: F)
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        self.context.set_app_state_provider(provider);
    }

    /// 立即发送当前批次
    pub async fn flush(&self) -> FlushOutcome {
        self.batch.flush().await
    }

    /// 尚未发送的条目
    pub fn pending_batch(&self) -> Vec<LogEntry> {
        self.batch.pending()
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.batch.stats()
    }

    /// 拆除钩子，最后发送一次并等待在途请求结束，然后取消定时器
    pub async fn shutdown(&self) -> FlushOutcome {
        self.detach_global_hooks();
        let outcome = self.batch.flush().await;
        self.batch.wait_idle().await;
        self.batch.cancel_timer();
        info!(
            target: "telemetry",
            outcome = ?outcome,
            pending = self.batch.pending_len(),
            "🛑 错误日志服务已关闭"
        );
        outcome
    }
}
