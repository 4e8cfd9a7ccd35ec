//! Trace ID 中间件
//! 为每个请求生成唯一的 trace_id，用于全链路追踪

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// trace_id 过长时不沿用调用方的值
const MAX_TRACE_ID_LEN: usize = 128;

/// 请求扩展中的 trace_id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId(pub String);

/// Trace ID 生成器
pub struct TraceIdGenerator;

impl TraceIdGenerator {
    /// 生成新的 trace_id
    pub fn generate() -> String {
        Uuid::new_v4().to_string()
    }

    /// 从请求头中提取 trace_id，如果没有则生成新的
    pub fn get_or_generate(req: &Request) -> String {
        // 优先从请求头获取 trace_id
        if let Some(trace_id_header) = req.headers().get(TRACE_ID_HEADER) {
            if let Ok(trace_id) = trace_id_header.to_str() {
                if !trace_id.is_empty() && trace_id.len() <= MAX_TRACE_ID_LEN {
                    return trace_id.to_string();
                }
            }
        }

        Self::generate()
    }
}

/// Trace ID 中间件
/// 为每个请求生成或提取 trace_id，并添加到请求扩展和响应头中
pub async fn trace_id_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = TraceIdGenerator::get_or_generate(&req);

    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(header_value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, header_value);
    }

    response
}
