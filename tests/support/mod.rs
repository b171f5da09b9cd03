//! 集成测试共用的桩实现
#![allow(dead_code)]

use async_trait::async_trait;
use parachute_telemetry::common::{AppError, BatchPayload, Result, TelemetryConfig};
use parachute_telemetry::logger::{ErrorLoggingService, LogTransport, MemoryStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 记录每次发送的传输；可配置前 N 次失败或始终失败
#[derive(Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<BatchPayload>>,
    attempts: AtomicUsize,
    fail_first: AtomicUsize,
    always_fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        let transport = Self::default();
        transport.fail_first.store(n, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            always_fail: true,
            ..Self::default()
        })
    }

    pub fn delivered(&self) -> Vec<BatchPayload> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_messages(&self) -> Vec<String> {
        self.delivered()
            .iter()
            .flat_map(|p| p.errors.iter().filter_map(|r| r.error_message()))
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogTransport for RecordingTransport {
    async fn send(&self, payload: &BatchPayload) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(AppError::transport(Some(503), "collector unavailable"));
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::transport(None, "connection refused"));
        }
        self.delivered.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// 测试用配置：不装全局钩子，批量定时器足够长，不会在测试中途触发
pub fn test_config() -> TelemetryConfig {
    TelemetryConfig {
        log_to_console: true,
        log_to_server: true,
        log_to_local_storage: true,
        include_environment_info: false,
        max_batch_size: 100,
        max_batch_wait_ms: 60_000,
        retry_delay_ms: 1,
        capture_global_errors: false,
        ..TelemetryConfig::default()
    }
}

pub fn service_with(
    config: TelemetryConfig,
) -> (Arc<ErrorLoggingService>, Arc<MemoryStorage>, Arc<RecordingTransport>) {
    let storage = Arc::new(MemoryStorage::new());
    let transport = RecordingTransport::new();
    let service = ErrorLoggingService::new(config, storage.clone(), transport.clone());
    (service, storage, transport)
}
