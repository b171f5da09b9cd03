//! 客户端管道经真实 HTTP 传输送达收集端

use parachute_telemetry::collector::{create_app, CollectorState, ErrorStore};
use parachute_telemetry::common::{Category, LogOptions, Severity, TelemetryConfig};
use parachute_telemetry::logger::{ErrorLoggingService, FlushOutcome, HttpTransport, MemoryStorage};
use std::sync::Arc;
use std::time::Duration;

async fn start_collector() -> (String, Arc<CollectorState>) {
    let state = CollectorState::new(ErrorStore::new(1000, None));
    let app = create_app(state.clone(), &[]);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/api/log/errors", addr), state)
}

fn client_config(endpoint: &str) -> TelemetryConfig {
    TelemetryConfig {
        log_endpoint: endpoint.to_string(),
        include_environment_info: false,
        max_batch_size: 3,
        max_batch_wait_ms: 150,
        retry_delay_ms: 10,
        capture_global_errors: false,
        ..TelemetryConfig::default()
    }
}

#[tokio::test]
async fn test_batches_reach_collector() {
    let (endpoint, collector) = start_collector().await;
    let transport = Arc::new(HttpTransport::new(endpoint.clone()).unwrap());
    let service = ErrorLoggingService::new(client_config(&endpoint), Arc::new(MemoryStorage::new()), transport);

    // 三条触发按大小发送
    service.log_error("upload failed", LogOptions::new().source("upload").category(Category::Network));
    service.log_warning("slow frame extraction", LogOptions::new().category(Category::Performance));
    service.log_critical("pipeline crashed", LogOptions::new().source("pipeline"));
    // 第四条等待定时发送
    service.log_error("viewer crashed", LogOptions::new().category(Category::Rendering));

    tokio::time::sleep(Duration::from_millis(600)).await;

    let stored = collector.store.snapshot();
    let messages: Vec<&str> = stored.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        messages,
        vec!["upload failed", "slow frame extraction", "pipeline crashed", "viewer crashed"]
    );
    assert_eq!(stored[0].source, "upload");
    assert_eq!(stored[0].category, Category::Network);
    assert_eq!(stored[2].level, Severity::Critical);
    assert!(stored.iter().all(|e| e.fingerprint.is_some()));
    assert!(service.pending_batch().is_empty());
    assert_eq!(service.batch_stats().entries_sent, 4);
}

#[tokio::test]
async fn test_unreachable_collector_requeues() {
    // 绑定后立即释放端口，保证连接被拒绝
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let endpoint = format!("http://{}/api/log/errors", addr);

    let config = TelemetryConfig {
        max_batch_size: 100,
        max_batch_wait_ms: 60_000,
        max_retries: 2,
        ..client_config(&endpoint)
    };
    let transport = Arc::new(HttpTransport::new(endpoint).unwrap());
    let service = ErrorLoggingService::new(config, Arc::new(MemoryStorage::new()), transport);

    service.log_error("offline", LogOptions::new());
    assert_eq!(service.flush().await, FlushOutcome::Requeued(1));
    assert_eq!(service.pending_batch().len(), 1);
    assert_eq!(service.batch_stats().failed_attempts, 2);
    // 本地持久化不受影响
    assert_eq!(service.get_errors().len(), 1);
}

#[tokio::test]
async fn test_collector_rejection_is_reported_as_transport_error() {
    use parachute_telemetry::common::BatchPayload;
    use parachute_telemetry::logger::LogTransport;

    let (endpoint, _collector) = start_collector().await;
    // 单条接口拒绝缺少 error 的请求体
    let single = endpoint.replace("/api/log/errors", "/api/log/error");
    let transport = HttpTransport::new(single).unwrap();
    let err = transport.send(&BatchPayload::default()).await.unwrap_err();
    assert_eq!(err.get_error_type_summary(), "telemetry_delivery_failed");
    assert!(!err.is_retryable());
}
