use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::collector::handlers::{
    clear_errors_handler, get_errors_handler, health_handler, log_error_handler,
    log_errors_handler, CollectorState,
};
use crate::collector::store::ErrorStore;
use crate::common::{AppError, Result, ServerConfig};

/// 创建收集端路由
pub fn create_app(state: Arc<CollectorState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/log/error", post(log_error_handler))
        .route(
            "/api/log/errors",
            post(log_errors_handler)
                .get(get_errors_handler)
                .delete(clear_errors_handler),
        )
        .route("/health", get(health_handler))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `*` 表示任意来源，无法解析的来源被忽略
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o.trim() == "*") {
        return base.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(target: "collector", origin = %origin, "忽略无效的CORS来源");
                None
            }
        })
        .collect();
    base.allow_origin(parsed)
}

/// 启动收集端，直到收到 Ctrl+C
pub async fn start_server(config: &ServerConfig) -> Result<()> {
    config.validate()?;
    let addr = config.bind_addr()?;

    let store = ErrorStore::from_config(config)?;
    let state = CollectorState::new(store);
    let app = create_app(state, &config.cors_origins);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "collector", %addr, max_entries = config.max_entries, "🌐 错误收集服务启动在: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::WebServerError(format!("收集服务运行失败: {}", e)))?;

    info!(target: "collector", "🛑 错误收集服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "collector", "无法监听Ctrl+C信号: {}", e);
        std::future::pending::<()>().await;
    }
    info!(target: "collector", "收到关闭信号");
}
