//! POST /sign：对调用方提交的 PSBT 签名
//!
//! 认证标签覆盖 `tradeId + ":" + psbt`，失败返回 401

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
    domain::{signing_request::SignPsbtBody, SigningLifecycle, SigningStage},
    error::{AppError, SignerError},
    security::SignedPayload,
};

/// 本路由认证失败时的状态码（其余拒绝原因沿用错误映射）
const AUTH_FAILURE_STATUS: StatusCode = StatusCode::UNAUTHORIZED;

#[derive(Debug, Serialize, Deserialize)]
pub struct SignPsbtResponse {
    pub txhex: String,
    pub txid: String,
}

pub async fn sign_psbt(
    State(state): State<Arc<AppState>>,
    trace_id: Option<Extension<TraceId>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SignPsbtResponse>, AppError> {
    state.metrics.count_request();
    let trace_id = trace_id.map(|Extension(TraceId(id))| id);

    let parsed: SignPsbtBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(_) => {
            let err = SignerError::malformed("request body is not valid JSON");
            return Err(reject(&state, None, err, trace_id, AUTH_FAILURE_STATUS));
        }
    };

    let (trade_id, psbt) = match parsed.signed_fields() {
        Ok(fields) => fields,
        Err(err) => return Err(reject(&state, None, err, trace_id, AUTH_FAILURE_STATUS)),
    };

    let mut lifecycle = SigningLifecycle::new(trade_id);
    let payload = SignedPayload::TradeAndPsbt { trade_id, psbt };
    if let Err(err) = state
        .authenticator
        .verify(&payload, signature_header(&headers))
    {
        return Err(reject(
            &state,
            Some(&mut lifecycle),
            err,
            trace_id,
            AUTH_FAILURE_STATUS,
        ));
    }
    if let Err(err) = lifecycle.advance(SigningStage::Authenticated) {
        return Err(reject(
            &state,
            Some(&mut lifecycle),
            err.into(),
            trace_id,
            AUTH_FAILURE_STATUS,
        ));
    }

    let request = match parsed.into_request() {
        Ok(request) => request,
        Err(err) => {
            return Err(reject(
                &state,
                Some(&mut lifecycle),
                err,
                trace_id,
                AUTH_FAILURE_STATUS,
            ))
        }
    };

    let signed = state
        .engine
        .sign(&request, &mut lifecycle)
        .map_err(|e| AppError::from(e).with_trace_id(trace_id))?;

    Ok(Json(SignPsbtResponse {
        txhex: signed.tx_hex,
        txid: signed.txid.to_string(),
    }))
}
