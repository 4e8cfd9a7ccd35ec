//! HTTP 接口
//!
//! - `POST /sign`：PSBT 签名
//! - `POST /webhook`：转账签名
//! - `GET /health`、`GET /metrics`：无需认证，不含任何密钥信息

use std::sync::Arc;

use axum::{
    http::{header, HeaderMap, StatusCode},
    middleware::from_fn,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    app_state::AppState,
    domain::SigningLifecycle,
    error::{AppError, SignerError},
    infrastructure::log_redact::redact_secrets,
    security::SIGNATURE_HEADER,
};

pub mod middleware;
pub mod sign_api;
pub mod webhook_api;

/// 请求体上限（1 MiB）
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sign", post(sign_api::sign_psbt))
        .route("/webhook", post(webhook_api::handle_transfer))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .fallback(fallback)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(middleware::trace_id_middleware))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn metrics(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

async fn fallback() -> AppError {
    AppError::not_found("route not found")
}

pub(crate) fn signature_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
}

/// 引擎之外的拒绝路径：记录状态、计数、打日志，再转换为 HTTP 错误
///
/// `auth_status` 只在 `err` 为认证失败时生效，各路由传入自己的常量
pub(crate) fn reject(
    state: &AppState,
    lifecycle: Option<&mut SigningLifecycle>,
    err: SignerError,
    trace_id: Option<String>,
    auth_status: StatusCode,
) -> AppError {
    let kind = err.kind();
    if let Some(lifecycle) = lifecycle {
        lifecycle.reject(kind);
    }
    state.metrics.count_rejected(kind);

    match &err {
        SignerError::Authentication => {
            tracing::warn!(trace_id = ?trace_id, "❌ request rejected: invalid signature");
        }
        other => {
            tracing::warn!(
                trace_id = ?trace_id,
                reason = kind.as_str(),
                detail = %redact_secrets(&other.to_string()),
                "request rejected"
            );
        }
    }

    let app_err = AppError::from(err).with_trace_id(trace_id);
    if app_err.status == StatusCode::UNAUTHORIZED {
        app_err.with_status(auth_status)
    } else {
        app_err
    }
}
