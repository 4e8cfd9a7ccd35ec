//! POST /webhook：按转账参数构造并签名交易
//!
//! 认证标签覆盖线上收到的原始请求体，失败返回 403

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    api::{middleware::TraceId, reject, signature_header},
    app_state::AppState,
    domain::{signing_request::TransferBody, SigningLifecycle, SigningStage},
    error::{AppError, SignerError},
    security::SignedPayload,
};

/// 本路由认证失败时的状态码（其余拒绝原因沿用错误映射）
const AUTH_FAILURE_STATUS: StatusCode = StatusCode::FORBIDDEN;

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub ok: bool,
    pub txid: String,
    pub txhex: String,
}

pub async fn handle_transfer(
    State(state): State<Arc<AppState>>,
    trace_id: Option<Extension<TraceId>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TransferResponse>, AppError> {
    state.metrics.count_request();
    let trace_id = trace_id.map(|Extension(TraceId(id))| id);

    // 1. 先认证原始字节，再解析
    if let Err(err) = state
        .authenticator
        .verify(&SignedPayload::RawBody(&body), signature_header(&headers))
    {
        return Err(reject(&state, None, err, trace_id, AUTH_FAILURE_STATUS));
    }

    // 2. 解析请求体
    let parsed: TransferBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(_) => {
            let err = SignerError::malformed("request body is not valid JSON");
            return Err(reject(&state, None, err, trace_id, AUTH_FAILURE_STATUS));
        }
    };
    let request = match parsed.into_request() {
        Ok(request) => request,
        Err(err) => return Err(reject(&state, None, err, trace_id, AUTH_FAILURE_STATUS)),
    };

    // 3. 签名
    let mut lifecycle = SigningLifecycle::new(request.trade_id.clone());
    if let Err(err) = lifecycle.advance(SigningStage::Authenticated) {
        return Err(reject(
            &state,
            Some(&mut lifecycle),
            err.into(),
            trace_id,
            AUTH_FAILURE_STATUS,
        ));
    }

    let signed = state
        .engine
        .sign(&request, &mut lifecycle)
        .map_err(|e| AppError::from(e).with_trace_id(trace_id))?;

    Ok(Json(TransferResponse {
        ok: true,
        txid: signed.txid.to_string(),
        txhex: signed.tx_hex,
    }))
}
