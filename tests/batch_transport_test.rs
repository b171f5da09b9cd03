//! 批量上报：触发条件、退避重试、重试耗尽后放回缓冲区

mod support;

use parachute_telemetry::common::{Category, ContextMap, LogEntry, Severity};
use parachute_telemetry::logger::{BatchQueue, BatchSettings, FlushOutcome};
use std::time::Duration;
use support::RecordingTransport;

fn entry(message: &str) -> LogEntry {
    LogEntry {
        timestamp: chrono::Utc::now(),
        source: "client".to_string(),
        severity: Severity::Error,
        category: Category::Network,
        message: message.to_string(),
        stack: None,
        context: ContextMap::new(),
        fingerprint: message.to_string(),
        occurrences: 1,
    }
}

fn settings(max_batch_size: usize, wait_ms: u64, max_retries: u32) -> BatchSettings {
    BatchSettings {
        enabled: true,
        max_batch_size,
        max_batch_wait: Duration::from_millis(wait_ms),
        max_retries,
        retry_delay: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_full_batch_flushes_immediately() {
    let transport = RecordingTransport::new();
    let queue = BatchQueue::new(settings(3, 60_000, 3), transport.clone());

    queue.enqueue(entry("a"));
    queue.enqueue(entry("b"));
    assert_eq!(transport.attempts(), 0);
    assert!(queue.timer_armed());

    queue.enqueue(entry("c"));
    assert!(queue.pending().is_empty());
    assert!(!queue.timer_armed());
    queue.wait_idle().await;

    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(transport.delivered_messages(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_partial_batch_flushes_once_after_wait() {
    let transport = RecordingTransport::new();
    let queue = BatchQueue::new(settings(10, 40, 3), transport.clone());

    queue.enqueue(entry("a"));
    queue.enqueue(entry("b"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.attempts(), 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    queue.wait_idle().await;
    assert_eq!(transport.delivered().len(), 1);
    assert_eq!(transport.delivered_messages(), vec!["a", "b"]);
    assert!(!queue.timer_armed());

    // 定时器只在缓冲区从空变为非空时布置，没有新条目就不会再次发送
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn test_manual_flush_cancels_timer() {
    let transport = RecordingTransport::new();
    let queue = BatchQueue::new(settings(10, 40, 3), transport.clone());

    queue.enqueue(entry("a"));
    assert!(queue.timer_armed());
    assert_eq!(queue.flush().await, FlushOutcome::Sent(1));
    assert!(!queue.timer_armed());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn test_retry_then_success_delivers_exactly_once() {
    let transport = RecordingTransport::failing_first(2);
    let queue = BatchQueue::new(settings(10, 60_000, 3), transport.clone());

    for m in ["a", "b", "c"] {
        queue.enqueue(entry(m));
    }
    assert_eq!(queue.flush().await, FlushOutcome::Sent(3));

    assert_eq!(transport.attempts(), 3);
    assert_eq!(transport.delivered().len(), 1);
    assert_eq!(transport.delivered_messages(), vec!["a", "b", "c"]);
    assert!(queue.pending().is_empty());

    let stats = queue.stats();
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.batches_sent, 1);
}

#[tokio::test]
async fn test_exhausted_retries_requeue_ahead_of_newer_entries() {
    let transport = RecordingTransport::always_failing();
    let queue = BatchQueue::new(settings(10, 60_000, 3), transport.clone());

    queue.enqueue(entry("a"));
    queue.enqueue(entry("b"));

    let flush = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.flush().await })
    };
    // 在退避等待期间加入的新条目排在被放回的批次之后
    tokio::time::sleep(Duration::from_millis(2)).await;
    queue.enqueue(entry("c"));

    assert_eq!(flush.await.unwrap(), FlushOutcome::Requeued(2));
    assert_eq!(transport.attempts(), 3);

    let pending: Vec<String> = queue.pending().into_iter().map(|e| e.message).collect();
    assert_eq!(pending, vec!["a", "b", "c"]);
    assert_eq!(queue.stats().requeued_batches, 1);
    assert!(queue.timer_armed());
}

#[tokio::test]
async fn test_overlapping_size_flushes_requeue_in_enqueue_order() {
    let transport = RecordingTransport::always_failing();
    let queue = BatchQueue::new(settings(2, 60_000, 2), transport.clone());

    // 两个按大小触发的批次同时在途，先放弃的是先入队的那个
    queue.enqueue(entry("a"));
    queue.enqueue(entry("b"));
    tokio::task::yield_now().await;
    queue.enqueue(entry("c"));
    queue.enqueue(entry("d"));
    queue.enqueue(entry("e"));
    queue.wait_idle().await;

    let pending: Vec<String> = queue.pending().into_iter().map(|e| e.message).collect();
    assert_eq!(pending, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(queue.stats().requeued_batches, 2);
}

#[tokio::test]
async fn test_clear_during_inflight_flush_drops_the_batch() {
    let transport = RecordingTransport::always_failing();
    let mut slow = settings(10, 60_000, 3);
    slow.retry_delay = Duration::from_millis(20);
    let queue = BatchQueue::new(slow, transport.clone());

    queue.enqueue(entry("cleared"));
    let flush = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.flush().await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    queue.clear();
    queue.enqueue(entry("after clear"));

    assert_eq!(flush.await.unwrap(), FlushOutcome::Discarded(1));
    // 清空之后不再重试
    assert_eq!(transport.attempts(), 1);
    let pending: Vec<String> = queue.pending().into_iter().map(|e| e.message).collect();
    assert_eq!(pending, vec!["after clear"]);
    assert_eq!(queue.stats().requeued_batches, 0);
}

#[tokio::test]
async fn test_requeued_batch_is_sent_on_next_flush() {
    let transport = RecordingTransport::failing_first(2);
    let queue = BatchQueue::new(settings(10, 60_000, 2), transport.clone());

    queue.enqueue(entry("a"));
    assert_eq!(queue.flush().await, FlushOutcome::Requeued(1));
    assert_eq!(queue.pending().len(), 1);

    queue.enqueue(entry("b"));
    assert_eq!(queue.flush().await, FlushOutcome::Sent(2));
    assert_eq!(transport.delivered_messages(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_disabled_queue_discards_without_sending() {
    let transport = RecordingTransport::new();
    let mut disabled = settings(10, 60_000, 3);
    disabled.enabled = false;
    let queue = BatchQueue::new(disabled, transport.clone());

    queue.enqueue(entry("a"));
    assert_eq!(queue.flush().await, FlushOutcome::Discarded(1));
    assert!(queue.pending().is_empty());
    assert_eq!(transport.attempts(), 0);
    assert_eq!(queue.stats().discarded_entries, 1);
}

#[tokio::test]
async fn test_enqueue_during_inflight_flush_is_not_lost_or_duplicated() {
    let transport = RecordingTransport::failing_first(1);
    let queue = BatchQueue::new(settings(100, 60_000, 3), transport.clone());

    for i in 0..5 {
        queue.enqueue(entry(&format!("old{}", i)));
    }
    let flush = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.flush().await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    for i in 0..3 {
        queue.enqueue(entry(&format!("new{}", i)));
    }

    assert_eq!(flush.await.unwrap(), FlushOutcome::Sent(5));
    assert_eq!(queue.flush().await, FlushOutcome::Sent(3));

    let mut messages = transport.delivered_messages();
    let total = messages.len();
    messages.dedup();
    assert_eq!(total, 8);
    assert_eq!(messages.len(), 8);
}

#[tokio::test]
async fn test_empty_flush_is_noop() {
    let transport = RecordingTransport::new();
    let queue = BatchQueue::new(settings(10, 60_000, 3), transport.clone());
    assert_eq!(queue.flush().await, FlushOutcome::Empty);
    assert_eq!(transport.attempts(), 0);
}
