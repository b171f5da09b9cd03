//! 全局捕获钩子：未捕获 panic、受监控任务失败、拆除
//!
//! 钩子是进程级的，本文件内的测试串行执行。

mod support;

use parachute_telemetry::common::{Category, LogOptions};
use parachute_telemetry::logger::{hooks, spawn_monitored, ErrorBoundary, PROMISE_SOURCE, WINDOW_SOURCE};
use std::sync::Mutex;
use std::time::Duration;
use support::{service_with, test_config};

static SERIAL: Mutex<()> = Mutex::new(());

#[test]
fn test_uncaught_panic_is_logged_once_with_window_source() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (service, _storage, _transport) = service_with(test_config());
    service.install_global_hooks();
    // 重复安装不会产生重复记录
    service.install_global_hooks();

    let worker = std::thread::Builder::new()
        .name("frame-extractor".to_string())
        .spawn(|| panic!("ffmpeg pipe closed"))
        .unwrap();
    assert!(worker.join().is_err());

    let errors = service.get_errors();
    assert_eq!(errors.len(), 1);
    let entry = &errors[0];
    assert_eq!(entry.source, WINDOW_SOURCE);
    assert_eq!(entry.category, Category::Unknown);
    assert_eq!(entry.message, "ffmpeg pipe closed");
    assert!(entry.stack.as_deref().unwrap().starts_with("at "));
    assert_eq!(entry.context["thread"], "frame-extractor");

    assert!(service.detach_global_hooks());
}

#[test]
fn test_detached_hooks_stop_capturing() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (service, _storage, _transport) = service_with(test_config());
    service.install_global_hooks();
    assert!(hooks::is_attached());

    assert!(service.detach_global_hooks());
    assert!(!service.detach_global_hooks());
    assert!(!hooks::is_attached());

    let worker = std::thread::spawn(|| panic!("after teardown"));
    assert!(worker.join().is_err());
    assert!(service.get_errors().is_empty());
}

#[test]
fn test_hooks_follow_the_latest_service() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (first, _s1, _t1) = service_with(test_config());
    let (second, _s2, _t2) = service_with(test_config());
    first.install_global_hooks();
    second.install_global_hooks();

    // 旧服务拆除不影响新目标
    assert!(!first.detach_global_hooks());

    let worker = std::thread::spawn(|| panic!("routed to second"));
    assert!(worker.join().is_err());
    assert!(first.get_errors().is_empty());
    assert_eq!(second.get_errors().len(), 1);

    drop(second);
    // 目标被释放后钩子自然失效
    assert!(!hooks::is_attached());
}

#[test]
fn test_listener_panic_is_not_captured_as_uncaught() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (service, _storage, _transport) = service_with(test_config());
    service.install_global_hooks();
    service.add_listener(|_| panic!("toast layer crashed"));

    assert!(service.log_error("original", LogOptions::new()));
    let errors = service.get_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "original");

    service.detach_global_hooks();
}

#[tokio::test]
async fn test_monitored_task_failures_use_promise_source() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (service, _storage, _transport) = service_with(test_config());
    service.install_global_hooks();

    let ok = spawn_monitored(async { Ok::<_, String>(7) }).await.unwrap();
    assert_eq!(ok, Some(7));

    let rejected = spawn_monitored(async { Err::<(), _>("upload worker crashed") })
        .await
        .unwrap();
    assert_eq!(rejected, None);

    let panicked = spawn_monitored(async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        if true {
            panic!("model export panicked");
        }
        Ok::<(), String>(())
    })
    .await
    .unwrap();
    assert_eq!(panicked, None);

    let errors = service.get_errors();
    // 任务中的 panic 只记录一次，不会同时作为 window 来源出现
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.source == PROMISE_SOURCE));
    assert_eq!(errors[0].message, "Unhandled rejection: upload worker crashed");
    assert_eq!(errors[1].message, "Unhandled rejection: model export panicked");

    service.detach_global_hooks();
}

#[test]
fn test_boundary_panic_is_logged_only_by_the_boundary() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (service, _storage, _transport) = service_with(test_config());
    service.install_global_hooks();

    let boundary = ErrorBoundary::new("ModelViewer", service.clone());
    let failure = boundary
        .run(|| -> Result<(), String> { panic!("mesh buffer overflow") })
        .unwrap_err();
    assert!(failure.panicked);

    let errors = service.get_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].source, "ModelViewer");
    assert_eq!(errors[0].category, Category::Rendering);

    service.detach_global_hooks();
}
