use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::collector::store::ErrorStore;
use crate::common::{AppError, BatchPayload, ErrorReport};

/// 收集端共享状态
pub struct CollectorState {
    pub store: ErrorStore,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl CollectorState {
    pub fn new(store: ErrorStore) -> Arc<Self> {
        Arc::new(Self {
            store,
            started_at: chrono::Utc::now(),
        })
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "success": false, "message": message.into() }))).into_response()
}

/// 请求体本身有问题，客户端不应原样重发
fn rejected(e: AppError) -> Response {
    warn!(target: "collector", error_type = e.get_error_type_summary(), "拒绝错误报告: {}", e);
    failure(StatusCode::BAD_REQUEST, e.to_string())
}

fn internal_error(e: AppError) -> Response {
    error!(target: "collector", error_type = e.get_error_type_summary(), "处理错误报告失败: {}", e);
    failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to log error")
}

/// POST /api/log/error
pub async fn log_error_handler(
    State(state): State<Arc<CollectorState>>,
    payload: Result<Json<ErrorReport>, JsonRejection>,
) -> Response {
    let Json(report) = match payload {
        Ok(body) => body,
        Err(rejection) => return rejected(AppError::InvalidInput(rejection.body_text())),
    };

    match state.store.record(report) {
        Ok(Some(record)) => Json(json!({ "success": true, "id": record.id })).into_response(),
        Ok(None) => rejected(AppError::InvalidInput("Error message is required".to_string())),
        Err(e) => internal_error(e),
    }
}

/// POST /api/log/errors
pub async fn log_errors_handler(
    State(state): State<Arc<CollectorState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return rejected(AppError::InvalidInput(rejection.body_text())),
    };

    if !body.get("errors").map(Value::is_array).unwrap_or(false) {
        return rejected(AppError::InvalidInput("Errors array is required".to_string()));
    }
    // 单条格式错误的元素当作缺少 error 处理，不影响整批
    let items = match body {
        Value::Object(mut map) => match map.remove("errors") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    let payload = BatchPayload {
        errors: items
            .into_iter()
            .map(|item| serde_json::from_value(item).unwrap_or_default())
            .collect(),
    };

    let total = payload.len();
    match state.store.record_batch(payload.errors) {
        Ok(summary) => {
            info!(target: "collector", total, accepted = summary.accepted, skipped = summary.skipped, "📥 收到批量错误报告");
            Json(json!({
                "success": true,
                "processed": summary.accepted,
                "skipped": summary.skipped,
            }))
            .into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// GET /api/log/errors
pub async fn get_errors_handler(State(state): State<Arc<CollectorState>>) -> Response {
    let errors = state.store.snapshot();
    match serde_json::to_value(&errors) {
        Ok(errors) => Json(json!({ "success": true, "errors": errors })).into_response(),
        Err(e) => internal_error(e.into()),
    }
}

/// DELETE /api/log/errors
pub async fn clear_errors_handler(State(state): State<Arc<CollectorState>>) -> Response {
    if state.store.is_empty() {
        return failure(StatusCode::NOT_FOUND, "No error logs found");
    }
    let cleared = state.store.clear();
    info!(target: "collector", cleared, "🧹 错误日志已清除");
    Json(json!({ "success": true, "cleared": cleared })).into_response()
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<CollectorState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "started_at": state.started_at.to_rfc3339(),
        "entries": state.store.len(),
    }))
}
