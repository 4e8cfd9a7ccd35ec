//! 签名请求模型
//!
//! 两种载荷：
//! - PSBT：`{ tradeId, psbt (base64), escrow_idx }`
//! - 转账：`{ tradeId, toAddress, amountSats, derivationPath, utxos, feeSats }`
//!
//! 请求只在单次处理期间存在，不做持久化。

use serde::Deserialize;
use serde_json::Value;

use crate::error::SignerError;

/// tradeId 最大长度
pub const MAX_TRADE_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub trade_id: String,
    pub payload: TransactionPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionPayload {
    /// 调用方构造好的部分签名交易 + 托管索引（路径 = 前缀/escrow_idx）
    Psbt { psbt_base64: String, escrow_idx: i64 },
    /// 由本服务根据参数构造交易模板
    Transfer(TransferRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub to_address: String,
    pub amount_sats: u64,
    pub derivation_path: String,
    pub utxos: Vec<UtxoRef>,
    pub fee_sats: u64,
}

/// 调用方指定的托管 UTXO（本服务不做选币）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoRef {
    pub txid: String,
    pub vout: u32,
    pub amount_sats: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 线上请求体
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POST /sign 请求体
#[derive(Debug, Clone, Deserialize)]
pub struct SignPsbtBody {
    #[serde(rename = "tradeId")]
    pub trade_id: Option<String>,
    pub psbt: Option<String>,
    pub escrow_idx: Option<Value>,
}

impl SignPsbtBody {
    /// 认证所需的两个字段：`(tradeId, psbt)`
    pub fn signed_fields(&self) -> Result<(&str, &str), SignerError> {
        match (self.trade_id.as_deref(), self.psbt.as_deref()) {
            (Some(trade_id), Some(psbt)) if !trade_id.is_empty() && !psbt.is_empty() => {
                Ok((trade_id, psbt))
            }
            _ => Err(SignerError::malformed("missing tradeId or psbt")),
        }
    }

    pub fn into_request(self) -> Result<SigningRequest, SignerError> {
        let (trade_id, psbt) = self.signed_fields()?;
        let trade_id = validate_trade_id(trade_id)?;
        let psbt_base64 = psbt.to_string();
        let escrow_idx = parse_escrow_idx(self.escrow_idx.as_ref())?;

        Ok(SigningRequest {
            trade_id,
            payload: TransactionPayload::Psbt {
                psbt_base64,
                escrow_idx,
            },
        })
    }
}

/// POST /webhook 请求体
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    pub trade_id: Option<String>,
    pub to_address: Option<String>,
    pub amount_sats: Option<u64>,
    pub derivation_path: Option<String>,
    #[serde(default)]
    pub utxos: Option<Vec<UtxoRef>>,
    #[serde(default)]
    pub fee_sats: Option<u64>,
}

impl TransferBody {
    pub fn into_request(self) -> Result<SigningRequest, SignerError> {
        let (trade_id, to_address, amount_sats, derivation_path) = match (
            self.trade_id,
            self.to_address,
            self.amount_sats,
            self.derivation_path,
        ) {
            (Some(t), Some(to), Some(amount), Some(path))
                if !t.is_empty() && !to.is_empty() && amount > 0 && !path.is_empty() =>
            {
                (t, to, amount, path)
            }
            _ => return Err(SignerError::malformed("Missing required fields")),
        };

        let utxos = self
            .utxos
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SignerError::malformed("utxos must list the escrow outputs to spend"))?;

        Ok(SigningRequest {
            trade_id: validate_trade_id(&trade_id)?,
            payload: TransactionPayload::Transfer(TransferRequest {
                to_address,
                amount_sats,
                derivation_path,
                utxos,
                fee_sats: self.fee_sats.unwrap_or(0),
            }),
        })
    }
}

fn validate_trade_id(trade_id: &str) -> Result<String, SignerError> {
    if trade_id.trim().is_empty() {
        return Err(SignerError::malformed("tradeId must not be blank"));
    }
    if trade_id.len() > MAX_TRADE_ID_LEN {
        return Err(SignerError::malformed(format!(
            "tradeId longer than {} bytes",
            MAX_TRADE_ID_LEN
        )));
    }
    if trade_id.chars().any(char::is_control) {
        return Err(SignerError::malformed("tradeId contains control characters"));
    }
    Ok(trade_id.to_string())
}

/// escrow_idx 接受 JSON 整数或十进制字符串
///
/// 超出 i64 的整数按越界处理（InvalidDerivationPath），其它类型按请求格式错误处理
fn parse_escrow_idx(value: Option<&Value>) -> Result<i64, SignerError> {
    let value = value.ok_or_else(|| SignerError::malformed("missing escrow_idx"))?;
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if n.as_u64().is_some() {
                Err(SignerError::invalid_path("escrow_idx out of range"))
            } else {
                Err(SignerError::malformed("escrow_idx must be an integer"))
            }
        }
        Value::String(s) => {
            let digits = s.strip_prefix('-').unwrap_or(s);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(SignerError::malformed("escrow_idx must be an integer"));
            }
            s.parse::<i64>()
                .map_err(|_| SignerError::invalid_path("escrow_idx out of range"))
        }
        _ => Err(SignerError::malformed("escrow_idx must be an integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psbt_body(json: &str) -> SignPsbtBody {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_psbt_body_into_request() {
        let req = psbt_body(r#"{"tradeId":"trade-1","psbt":"cHNidP8=","escrow_idx":42}"#)
            .into_request()
            .unwrap();
        assert_eq!(req.trade_id, "trade-1");
        assert_eq!(
            req.payload,
            TransactionPayload::Psbt {
                psbt_base64: "cHNidP8=".into(),
                escrow_idx: 42
            }
        );
    }

    #[test]
    fn test_psbt_body_missing_fields() {
        let body = psbt_body(r#"{"tradeId":"trade-1"}"#);
        assert!(matches!(
            body.signed_fields(),
            Err(SignerError::MalformedRequest(_))
        ));

        let body = psbt_body(r#"{"tradeId":"trade-1","psbt":"cHNidP8="}"#);
        assert!(body.signed_fields().is_ok());
        assert!(matches!(
            body.into_request(),
            Err(SignerError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_escrow_idx_forms() {
        assert_eq!(parse_escrow_idx(Some(&Value::from(7))).unwrap(), 7);
        assert_eq!(parse_escrow_idx(Some(&Value::from("7"))).unwrap(), 7);
        assert_eq!(parse_escrow_idx(Some(&Value::from(-1))).unwrap(), -1);
        assert!(matches!(
            parse_escrow_idx(Some(&Value::from(u64::MAX))),
            Err(SignerError::InvalidDerivationPath(_))
        ));
        assert!(matches!(
            parse_escrow_idx(Some(&Value::from(1.5))),
            Err(SignerError::MalformedRequest(_))
        ));
        assert!(matches!(
            parse_escrow_idx(Some(&Value::from("4x"))),
            Err(SignerError::MalformedRequest(_))
        ));
        assert!(matches!(
            parse_escrow_idx(Some(&Value::Bool(true))),
            Err(SignerError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_transfer_body() {
        let body: TransferBody = serde_json::from_str(
            r#"{
                "tradeId": "trade-9",
                "toAddress": "tb1qexample",
                "amountSats": 15000,
                "derivationPath": "m/0/9",
                "utxos": [{"txid": "aa", "vout": 1, "amountSats": 20000}],
                "feeSats": 500
            }"#,
        )
        .unwrap();
        let req = body.into_request().unwrap();
        match req.payload {
            TransactionPayload::Transfer(t) => {
                assert_eq!(t.amount_sats, 15000);
                assert_eq!(t.fee_sats, 500);
                assert_eq!(t.utxos.len(), 1);
                assert_eq!(t.utxos[0].vout, 1);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_transfer_body_missing_fields() {
        let body: TransferBody =
            serde_json::from_str(r#"{"tradeId":"t","toAddress":"tb1q","amountSats":0}"#).unwrap();
        assert!(matches!(
            body.into_request(),
            Err(SignerError::MalformedRequest(_))
        ));

        let body: TransferBody = serde_json::from_str(
            r#"{"tradeId":"t","toAddress":"tb1q","amountSats":1000,"derivationPath":"m/0/1"}"#,
        )
        .unwrap();
        let err = body.into_request().unwrap_err();
        assert!(err.to_string().contains("utxos"));
    }

    #[test]
    fn test_trade_id_rules() {
        assert!(validate_trade_id("trade-1").is_ok());
        assert!(validate_trade_id("   ").is_err());
        assert!(validate_trade_id("a\nb").is_err());
        assert!(validate_trade_id(&"x".repeat(MAX_TRADE_ID_LEN + 1)).is_err());
    }
}
