//! 日志监听器
//!
//! 每条被接受的日志同步分发给所有监听器。单个监听器 panic 只在标准错误输出中报告，
//! 不影响其它监听器，也不会再次进入日志管道。

use crate::common::LogEntry;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// 监听器回调
pub type Listener = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// 订阅句柄，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

#[derive(Default)]
pub struct ListenerBus {
    registry: Mutex<Registry>,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.listeners.push((id, Arc::new(listener)));
        id
    }

    /// 返回是否确实移除了监听器
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let before = registry.listeners.len();
        registry.listeners.retain(|(existing, _)| *existing != id);
        registry.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按订阅顺序通知；返回 panic 的监听器数量
    pub fn notify(&self, entry: &LogEntry) -> usize {
        // 先复制列表再释放锁，监听器内部可以安全地订阅或取消订阅
        let listeners: Vec<(ListenerId, Listener)> = self
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .clone();

        let mut failures = 0;
        for (id, listener) in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(entry))) {
                failures += 1;
                eprintln!(
                    "[Error Logger] 监听器 {:?} 执行失败: {}",
                    id,
                    panic_message(payload.as_ref())
                );
            }
        }
        failures
    }
}

/// 提取 panic 负载中的文本
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
