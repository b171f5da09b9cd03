//! 错误边界
//!
//! 包裹一段可能失败的渲染逻辑：失败（`Err` 或 panic）时记录到日志服务并进入回退状态，
//! 回退状态期间不再执行被包裹的逻辑，直到手动或定时重置。

use crate::common::{Category, ErrorInput, LogOptions};
use crate::logger::hooks::HookSuppression;
use crate::logger::listeners::panic_message;
use crate::logger::scheduler::ScheduledTask;
use crate::logger::service::ErrorLoggingService;
use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 回退状态中保存的失败信息
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFailure {
    pub boundary: String,
    pub message: String,
    pub panicked: bool,
    pub occurred_at: DateTime<Utc>,
}

pub struct ErrorBoundary {
    name: String,
    service: Arc<ErrorLoggingService>,
    failure: Arc<Mutex<Option<BoundaryFailure>>>,
    reset_task: Mutex<Option<ScheduledTask>>,
}

impl ErrorBoundary {
    pub fn new(name: impl Into<String>, service: Arc<ErrorLoggingService>) -> Self {
        Self {
            name: name.into(),
            service,
            failure: Arc::new(Mutex::new(None)),
            reset_task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 执行 `render`；处于回退状态时直接返回当前失败
    pub fn run<T, E, F>(&self, render: F) -> std::result::Result<T, BoundaryFailure>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: std::fmt::Display,
    {
        if let Some(failure) = self.fallback() {
            return Err(failure);
        }

        let outcome = {
            let _quiet = HookSuppression::enter();
            catch_unwind(AssertUnwindSafe(render))
        };

        let (message, panicked) = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => (e.to_string(), false),
            Err(payload) => (panic_message(payload.as_ref()), true),
        };

        let options = LogOptions::new()
            .source(self.name.clone())
            .category(Category::Rendering)
            .context("boundary", self.name.clone())
            .context("panicked", panicked);
        self.service.log_error(ErrorInput::Message(message.clone()), options);

        let failure = BoundaryFailure {
            boundary: self.name.clone(),
            message,
            panicked,
            occurred_at: Utc::now(),
        };
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(failure.clone());
        Err(failure)
    }

    pub fn has_error(&self) -> bool {
        self.fallback().is_some()
    }

    pub fn fallback(&self) -> Option<BoundaryFailure> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 立即恢复，并取消尚未执行的定时重置
    pub fn reset(&self) {
        if let Some(task) = self.reset_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.cancel();
        }
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// 在 `delay` 后恢复；重复调用只保留最后一次。不在运行时中返回 false
    pub fn schedule_reset(&self, delay: Duration) -> bool {
        let failure = self.failure.clone();
        let task = ScheduledTask::after(delay, async move {
            *failure.lock().unwrap_or_else(|e| e.into_inner()) = None;
        });
        let scheduled = task.is_some();
        let previous = std::mem::replace(
            &mut *self.reset_task.lock().unwrap_or_else(|e| e.into_inner()),
            task,
        );
        if let Some(previous) = previous {
            previous.cancel();
        }
        scheduled
    }
}
