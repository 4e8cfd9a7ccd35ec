use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// 签名流程错误分类
///
/// 所有变体的消息都只描述"哪里不对"，绝不携带主私钥、派生私钥或共享密钥。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    /// 签名标签缺失或不匹配
    #[error("invalid signature")]
    Authentication,

    /// 请求字段缺失或非法
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// 派生路径格式错误或越界
    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    /// 派生过程中无法得到可用私钥
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// 存在签名材料不足的输入，无法最终化
    #[error("finalize failed: {0}")]
    Finalization(String),

    /// 未预期的内部错误
    #[error("internal error: {0}")]
    Internal(String),
}

/// 错误种类（不带负载），用于状态机与指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignerErrorKind {
    Authentication,
    MalformedRequest,
    InvalidDerivationPath,
    KeyDerivation,
    Finalization,
    Internal,
}

impl SignerErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::MalformedRequest => "malformed_request",
            Self::InvalidDerivationPath => "invalid_derivation_path",
            Self::KeyDerivation => "key_derivation",
            Self::Finalization => "finalization",
            Self::Internal => "internal",
        }
    }
}

impl SignerError {
    pub fn kind(&self) -> SignerErrorKind {
        match self {
            Self::Authentication => SignerErrorKind::Authentication,
            Self::MalformedRequest(_) => SignerErrorKind::MalformedRequest,
            Self::InvalidDerivationPath(_) => SignerErrorKind::InvalidDerivationPath,
            Self::KeyDerivation(_) => SignerErrorKind::KeyDerivation,
            Self::Finalization(_) => SignerErrorKind::Finalization,
            Self::Internal(_) => SignerErrorKind::Internal,
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidDerivationPath(msg.into())
    }
}

/// 单个输入的签名失败原因（收集后由调用方决定是否可以最终化）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputSigningError {
    #[error("input {index}: previous output (witness_utxo / non_witness_utxo) missing")]
    MissingUtxo { index: usize },

    #[error("input {index}: non_witness_utxo does not match the spent outpoint")]
    UtxoMismatch { index: usize },

    #[error("input {index}: non-standard sighash type")]
    NonStandardSighash { index: usize },

    #[error("input {index}: SIGHASH_SINGLE without a matching output")]
    SingleWithoutOutput { index: usize },

    #[error("input {index}: sighash computation failed: {reason}")]
    Sighash { index: usize, reason: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP 错误响应
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorCode {
    BadRequest,
    NotFound,
    Internal,

    // 业务错误码
    InvalidSignature,
    InvalidDerivationPath,
    FinalizeFailed,
}

impl AppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppErrorCode::BadRequest => "bad_request",
            AppErrorCode::NotFound => "not_found",
            AppErrorCode::Internal => "internal",
            AppErrorCode::InvalidSignature => "invalid_signature",
            AppErrorCode::InvalidDerivationPath => "invalid_derivation_path",
            AppErrorCode::FinalizeFailed => "finalize_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    pub status: StatusCode,
    pub trace_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<&'a str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            code: self.code.as_str(),
            trace_id: self.trace_id.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::BadRequest,
            message: msg.into(),
            status: StatusCode::BAD_REQUEST,
            trace_id: None,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::NotFound,
            message: msg.into(),
            status: StatusCode::NOT_FOUND,
            trace_id: None,
        }
    }

    /// 内部错误对外只返回固定文案
    pub fn internal() -> Self {
        Self {
            code: AppErrorCode::Internal,
            message: "Internal signer error".to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            trace_id: None,
        }
    }

    /// 设置追踪ID
    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// 认证失败时使用的状态码因路由而异（/sign → 401，/webhook → 403）
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl From<SignerError> for AppError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Authentication => Self {
                code: AppErrorCode::InvalidSignature,
                message: "invalid signature".to_string(),
                status: StatusCode::UNAUTHORIZED,
                trace_id: None,
            },
            SignerError::MalformedRequest(msg) => Self::bad_request(msg),
            SignerError::InvalidDerivationPath(msg) => Self {
                code: AppErrorCode::InvalidDerivationPath,
                message: format!("invalid derivation path: {}", msg),
                status: StatusCode::BAD_REQUEST,
                trace_id: None,
            },
            SignerError::Finalization(msg) => Self {
                code: AppErrorCode::FinalizeFailed,
                message: format!("finalize failed: {}", msg),
                status: StatusCode::BAD_REQUEST,
                trace_id: None,
            },
            SignerError::KeyDerivation(_) | SignerError::Internal(_) => Self::internal(),
        }
    }
}
