//! 批量上报队列
//!
//! 条目先进入内存缓冲区，满足以下任一条件即整体发送：
//! - 缓冲区达到 `max_batch_size`
//! - 缓冲区从空变为非空后经过 `max_batch_wait`（单个定时器，发送时清除）
//!
//! 发送失败按 `retry_delay * 2^attempt` 退避重试，最多尝试 `max_retries` 次；
//! 全部失败后批次按原顺序放回缓冲区，排在新条目之前，等待下一轮发送。
//!
//! 多个批次可能同时在途（按大小触发的发送与定时发送互不等待）。每个条目在入队时
//! 获得一个递增序号，放回时按序号归位，所以无论哪个批次先放弃，缓冲区都保持入队顺序。
//! `clear` 推进清空纪元，纪元变化后在途批次不再放回。

use crate::common::{BatchPayload, LogEntry, TelemetryConfig};
use crate::logger::scheduler::ScheduledTask;
use crate::logger::transport::LogTransport;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// 批量发送参数
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub enabled: bool,
    pub max_batch_size: usize,
    pub max_batch_wait: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl From<&TelemetryConfig> for BatchSettings {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            enabled: config.log_to_server,
            max_batch_size: config.max_batch_size.max(1),
            max_batch_wait: Duration::from_millis(config.max_batch_wait_ms),
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from(&TelemetryConfig::default())
    }
}

impl BatchSettings {
    /// 第 `attempt` 次（从0开始）失败后的等待时间
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// 一次发送的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 缓冲区为空，没有发送
    Empty,
    /// 已送达，附带条目数
    Sent(usize),
    /// 上报被禁用，或发送期间缓冲区被清空，条目被丢弃
    Discarded(usize),
    /// 重试耗尽，条目已放回缓冲区
    Requeued(usize),
}

/// 队列统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub batches_sent: u64,
    pub entries_sent: u64,
    pub failed_attempts: u64,
    pub requeued_batches: u64,
    pub discarded_entries: u64,
}

#[derive(Default)]
struct Counters {
    batches_sent: AtomicU64,
    entries_sent: AtomicU64,
    failed_attempts: AtomicU64,
    requeued_batches: AtomicU64,
    discarded_entries: AtomicU64,
}

/// 带入队序号的条目
struct Pending {
    seq: u64,
    entry: LogEntry,
}

/// 从缓冲区取走的一批
struct Snapshot {
    epoch: u64,
    items: Vec<Pending>,
}

#[derive(Default)]
struct BatchState {
    buffer: VecDeque<Pending>,
    next_seq: u64,
    // 每次 clear 递增
    epoch: u64,
    timer: Option<ScheduledTask>,
    // 每次布置定时器递增，过期的定时器据此放弃执行
    timer_generation: u64,
}

impl BatchState {
    fn push(&mut self, entry: LogEntry) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.buffer.push_back(Pending { seq, entry });
    }

    /// 原子地取走缓冲区并取消定时器
    fn take_snapshot(&mut self) -> Snapshot {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        Snapshot {
            epoch: self.epoch,
            items: std::mem::take(&mut self.buffer).into(),
        }
    }

    /// 放回失败的批次，按入队序号归位
    fn requeue(&mut self, items: Vec<Pending>) {
        self.buffer.extend(items);
        self.buffer.make_contiguous().sort_by_key(|p| p.seq);
    }
}

struct BatchShared {
    settings: BatchSettings,
    transport: Arc<dyn LogTransport>,
    state: Mutex<BatchState>,
    counters: Counters,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// 在途发送计数守卫
struct InFlight(Arc<BatchShared>);

impl InFlight {
    fn enter(shared: &Arc<BatchShared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(shared.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// 批量上报队列，可廉价克隆
#[derive(Clone)]
pub struct BatchQueue {
    shared: Arc<BatchShared>,
}

impl BatchQueue {
    pub fn new(settings: BatchSettings, transport: Arc<dyn LogTransport>) -> Self {
        Self {
            shared: Arc::new(BatchShared {
                settings,
                transport,
                state: Mutex::new(BatchState::default()),
                counters: Counters::default(),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.shared.settings
    }

    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 加入缓冲区；达到批量大小时立即在后台发送
    pub fn enqueue(&self, entry: LogEntry) {
        let runtime = tokio::runtime::Handle::try_current().ok();
        let mut state = self.state();
        state.push(entry);

        if state.buffer.len() >= self.shared.settings.max_batch_size {
            if let Some(runtime) = runtime {
                let snapshot = state.take_snapshot();
                drop(state);
                // 在启动任务前计数，wait_idle 才能看到尚未开始执行的发送
                let guard = InFlight::enter(&self.shared);
                let queue = self.clone();
                runtime.spawn(async move {
                    queue.send_snapshot(snapshot).await;
                    drop(guard);
                });
                return;
            }
            // 没有运行时只能留在缓冲区，等待手动 flush
            return;
        }

        self.arm_timer(&mut state);
    }

    /// 立即发送当前缓冲区
    pub async fn flush(&self) -> FlushOutcome {
        let _guard = InFlight::enter(&self.shared);
        let snapshot = self.state().take_snapshot();
        self.send_snapshot(snapshot).await
    }

    /// 当前未发送的条目（按发送顺序）
    pub fn pending(&self) -> Vec<LogEntry> {
        self.state().buffer.iter().map(|p| p.entry.clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.state().buffer.len()
    }

    /// 是否有已布置但尚未触发的定时器
    pub fn timer_armed(&self) -> bool {
        self.state().timer.is_some()
    }

    /// 丢弃未发送的条目并取消定时器；在途批次失败后也不会再放回
    pub fn clear(&self) {
        let mut state = self.state();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.buffer.clear();
        state.epoch = state.epoch.wrapping_add(1);
    }

    /// 只取消定时器，缓冲区保持不变
    pub fn cancel_timer(&self) {
        if let Some(timer) = self.state().timer.take() {
            timer.cancel();
        }
    }

    /// 等待所有在途发送（含重试）结束
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> BatchStats {
        let c = &self.shared.counters;
        BatchStats {
            batches_sent: c.batches_sent.load(Ordering::Relaxed),
            entries_sent: c.entries_sent.load(Ordering::Relaxed),
            failed_attempts: c.failed_attempts.load(Ordering::Relaxed),
            requeued_batches: c.requeued_batches.load(Ordering::Relaxed),
            discarded_entries: c.discarded_entries.load(Ordering::Relaxed),
        }
    }

    /// 缓冲区非空且没有定时器时布置一个
    fn arm_timer(&self, state: &mut BatchState) {
        if state.timer.is_some() || state.buffer.is_empty() {
            return;
        }
        state.timer_generation = state.timer_generation.wrapping_add(1);
        let generation = state.timer_generation;
        let queue = self.clone();
        state.timer = ScheduledTask::after(self.shared.settings.max_batch_wait, async move {
            queue.flush_from_timer(generation).await;
        });
    }

    async fn flush_from_timer(&self, generation: u64) {
        let snapshot = {
            let mut state = self.state();
            if state.timer_generation != generation || state.timer.is_none() {
                return;
            }
            // 自己的句柄只分离不取消，否则会在下面的 await 处被中止
            state.timer = None;
            state.take_snapshot()
        };
        let _guard = InFlight::enter(&self.shared);
        debug!(target: "telemetry", count = snapshot.items.len(), "批量等待时间到，开始发送");
        self.send_snapshot(snapshot).await;
    }

    fn cleared_since(&self, epoch: u64) -> bool {
        self.state().epoch != epoch
    }

    fn discard(&self, count: usize) -> FlushOutcome {
        self.shared
            .counters
            .discarded_entries
            .fetch_add(count as u64, Ordering::Relaxed);
        FlushOutcome::Discarded(count)
    }

    async fn send_snapshot(&self, snapshot: Snapshot) -> FlushOutcome {
        if snapshot.items.is_empty() {
            return FlushOutcome::Empty;
        }
        let count = snapshot.items.len();
        let settings = &self.shared.settings;
        let counters = &self.shared.counters;

        if !settings.enabled {
            return self.discard(count);
        }

        let entries: Vec<LogEntry> = snapshot.items.iter().map(|p| p.entry.clone()).collect();
        let payload = BatchPayload::from_entries(&entries);

        for attempt in 0..settings.max_retries {
            if attempt > 0 && self.cleared_since(snapshot.epoch) {
                debug!(target: "telemetry", count, "缓冲区已清空，停止重试");
                return self.discard(count);
            }
            match self.shared.transport.send(&payload).await {
                Ok(()) => {
                    counters.batches_sent.fetch_add(1, Ordering::Relaxed);
                    counters.entries_sent.fetch_add(count as u64, Ordering::Relaxed);
                    if attempt > 0 {
                        info!(target: "telemetry", attempt = attempt + 1, count, "批量上报在重试后成功");
                    }
                    return FlushOutcome::Sent(count);
                }
                Err(e) => {
                    counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target: "telemetry",
                        attempt = attempt + 1,
                        max_retries = settings.max_retries,
                        retryable = e.is_retryable(),
                        error_type = e.get_error_type_summary(),
                        "批量上报失败: {}", e
                    );
                    if attempt + 1 < settings.max_retries {
                        tokio::time::sleep(settings.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        // 重试耗尽：按入队顺序放回，排在新条目之前
        let mut state = self.state();
        if state.epoch != snapshot.epoch {
            drop(state);
            return self.discard(count);
        }
        counters.requeued_batches.fetch_add(1, Ordering::Relaxed);
        state.requeue(snapshot.items);
        warn!(target: "telemetry", count, pending = state.buffer.len(), "重试耗尽，批次已放回缓冲区");
        self.arm_timer(&mut state);
        FlushOutcome::Requeued(count)
    }
}
