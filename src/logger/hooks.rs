//! 全局捕获钩子
//!
//! - 未捕获的 panic：进程级 panic hook，来源记为 `window`
//! - 受监控任务的失败（返回 `Err` 或 panic）：来源记为 `promise`
//!
//! panic hook 在进程内只安装一次并串联之前的 hook。它指向一个全局目标槽，
//! 服务拆除时清空该槽，之后的 panic 只交给之前的 hook 处理。

use crate::common::{Category, ErrorInput, LogOptions};
use crate::logger::listeners::panic_message;
use crate::logger::service::ErrorLoggingService;
use once_cell::sync::Lazy;
use std::cell::Cell;
use std::future::Future;
use std::sync::{Arc, Mutex, Once, Weak};
use tokio::task::JoinHandle;
use tracing::warn;

pub const WINDOW_SOURCE: &str = "window";
pub const PROMISE_SOURCE: &str = "promise";

static INSTALL_PANIC_HOOK: Once = Once::new();

static TARGET: Lazy<Mutex<Option<Weak<ErrorLoggingService>>>> = Lazy::new(|| Mutex::new(None));

thread_local! {
    // 大于0时当前线程的 panic 已由调用方自行捕获和记录
    static SUPPRESS_DEPTH: Cell<u32> = const { Cell::new(0) };
}

tokio::task_local! {
    static MONITORED: ();
}

/// 作用域守卫：存活期间当前线程的 panic 不经过全局钩子
pub(crate) struct HookSuppression(());

impl HookSuppression {
    pub(crate) fn enter() -> Self {
        SUPPRESS_DEPTH.with(|depth| depth.set(depth.get() + 1));
        HookSuppression(())
    }
}

impl Drop for HookSuppression {
    fn drop(&mut self) {
        SUPPRESS_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn suppressed() -> bool {
    SUPPRESS_DEPTH.with(|depth| depth.get() > 0)
}

/// 让全局钩子指向 `service`，首次调用时安装 panic hook
pub fn attach(service: &Arc<ErrorLoggingService>) {
    install_panic_hook();
    *TARGET.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::downgrade(service));
}

/// 只有当前目标正是 `service` 时才清空
pub fn detach(service: &ErrorLoggingService) -> bool {
    let mut target = TARGET.lock().unwrap_or_else(|e| e.into_inner());
    let is_current = target
        .as_ref()
        .map(|weak| std::ptr::eq(weak.as_ptr(), service as *const ErrorLoggingService))
        .unwrap_or(false);
    if is_current {
        *target = None;
    }
    is_current
}

pub fn is_attached() -> bool {
    current_target().is_some()
}

fn current_target() -> Option<Arc<ErrorLoggingService>> {
    TARGET
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .and_then(Weak::upgrade)
}

fn install_panic_hook() {
    INSTALL_PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let monitored = MONITORED.try_with(|_| ()).is_ok();
            if !suppressed() && !monitored {
                let location = info
                    .location()
                    .map(|loc| format!("at {}:{}:{}", loc.file(), loc.line(), loc.column()));
                report(WINDOW_SOURCE, panic_message(info.payload()), location);
            }
            previous(info);
        }));
    });
}

fn report(source: &str, message: String, stack: Option<String>) -> bool {
    let Some(service) = current_target() else {
        return false;
    };
    let thread = std::thread::current();
    let options = LogOptions::new()
        .source(source)
        .category(Category::Unknown)
        .context("thread", thread.name().unwrap_or("unnamed"));
    service.log_error(ErrorInput::Error { message, stack }, options)
}

/// 启动受监控的任务
///
/// 任务返回 `Err` 或 panic 时记录一条 `promise` 来源的错误，句柄的结果为 `None`。
pub fn spawn_monitored<F, T, E>(future: F) -> JoinHandle<Option<T>>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        let inner = tokio::spawn(MONITORED.scope((), future));
        match inner.await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                let message = format!("Unhandled rejection: {}", e);
                if !report(PROMISE_SOURCE, message.clone(), None) {
                    warn!(target: "telemetry", "未挂接日志服务，任务失败未记录: {}", message);
                }
                None
            }
            Err(join_err) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                let message = format!("Unhandled rejection: {}", panic_message(payload.as_ref()));
                if !report(PROMISE_SOURCE, message.clone(), None) {
                    warn!(target: "telemetry", "未挂接日志服务，任务 panic 未记录: {}", message);
                }
                None
            }
            // 任务被取消不算失败
            Err(_) => None,
        }
    })
}
