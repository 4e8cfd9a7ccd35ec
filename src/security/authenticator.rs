//! 签名请求认证
//!
//! 算法: HMAC-SHA256(secret, canonical_bytes)，标签为 64 位十六进制，放在 `X-Signature` 头中。
//!
//! 规范化形式：
//! - `/sign`：`tradeId + ":" + psbt`
//! - `/webhook`：线上收到的原始请求体字节（不做 JSON 重新编码）

use std::{borrow::Cow, fmt};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::SignerError;

type HmacSha256 = Hmac<Sha256>;

/// 签名标签所在的请求头
pub const SIGNATURE_HEADER: &str = "X-Signature";

const DIGEST_LEN: usize = 32;

/// 参与签名的载荷
#[derive(Debug, Clone, Copy)]
pub enum SignedPayload<'a> {
    TradeAndPsbt { trade_id: &'a str, psbt: &'a str },
    RawBody(&'a [u8]),
}

impl<'a> SignedPayload<'a> {
    pub fn canonical_bytes(&self) -> Cow<'a, [u8]> {
        match self {
            Self::TradeAndPsbt { trade_id, psbt } => {
                Cow::Owned(format!("{}:{}", trade_id, psbt).into_bytes())
            }
            Self::RawBody(body) => Cow::Borrowed(*body),
        }
    }
}

fn hmac_digest(secret: &[u8], message: &[u8]) -> Option<[u8; DIGEST_LEN]> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(message);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Some(digest)
}

/// 计算十六进制签名标签
pub fn compute_tag(secret: &[u8], message: &[u8]) -> Result<String, SignerError> {
    hmac_digest(secret, message)
        .map(hex::encode)
        .ok_or_else(|| SignerError::Internal("HMAC key rejected".into()))
}

/// 校验 `supplied_tag` 是否为 `raw_body` 在 `secret` 下的 HMAC
///
/// 比较使用常量时间；标签大小写不敏感，非十六进制或长度不对直接视为不匹配
pub fn verify(raw_body: &[u8], supplied_tag: &str, secret: &[u8]) -> bool {
    let Some(expected) = hmac_digest(secret, raw_body) else {
        return false;
    };
    let supplied = match hex::decode(supplied_tag.trim()) {
        Ok(bytes) if bytes.len() == DIGEST_LEN => bytes,
        _ => return false,
    };
    expected[..].ct_eq(&supplied[..]).into()
}

/// 持有共享密钥的认证器（启动时注入，运行期只读）
pub struct Authenticator {
    secret: Zeroizing<Vec<u8>>,
}

impl Authenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// 为载荷计算标签（调用方/测试使用）
    pub fn compute_tag(&self, payload: &SignedPayload<'_>) -> Result<String, SignerError> {
        compute_tag(&self.secret, &payload.canonical_bytes())
    }

    /// 校验请求；标签缺失或不匹配都返回 `Authentication`
    pub fn verify(
        &self,
        payload: &SignedPayload<'_>,
        supplied_tag: Option<&str>,
    ) -> Result<(), SignerError> {
        let tag = supplied_tag
            .filter(|t| !t.is_empty())
            .ok_or(SignerError::Authentication)?;

        if verify(&payload.canonical_bytes(), tag, &self.secret) {
            Ok(())
        } else {
            Err(SignerError::Authentication)
        }
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
