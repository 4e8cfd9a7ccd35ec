//! 签名引擎
//!
//! 持有主私钥（进程生命周期内只读），按请求派生子密钥、签名、最终化并序列化。
//! 子密钥对只存在于单次调用内，调用结束即擦除。

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::{
    bip32::Fingerprint,
    secp256k1::{All, Secp256k1},
    Address, Network, NetworkKind, Psbt,
};

use crate::{
    domain::{
        ChildKeyPair, EscrowPath, MasterKey, SigningLifecycle, SigningRequest, SigningStage,
        TransactionPayload,
    },
    error::SignerError,
    infrastructure::log_redact::redact_address,
    metrics::SignerMetrics,
    service::{
        psbt_signer::{self, SignedTransaction},
        transfer_builder::TransferPlan,
    },
};

/// 待签名的交易来源
enum Prepared {
    Psbt(Psbt),
    Transfer(TransferPlan),
}

pub struct SigningEngine {
    master: MasterKey,
    network: Network,
    escrow_prefix: EscrowPath,
    secp: Secp256k1<All>,
    metrics: Arc<SignerMetrics>,
}

impl SigningEngine {
    pub fn new(
        master: MasterKey,
        network: Network,
        escrow_prefix: EscrowPath,
        metrics: Arc<SignerMetrics>,
    ) -> Result<Self, SignerError> {
        if master.network_kind() != NetworkKind::from(network) {
            return Err(SignerError::KeyDerivation(format!(
                "master key network does not match configured network {}",
                network
            )));
        }
        Ok(Self {
            master,
            network,
            escrow_prefix,
            secp: Secp256k1::new(),
            metrics,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn metrics(&self) -> &Arc<SignerMetrics> {
        &self.metrics
    }

    pub fn escrow_prefix(&self) -> &EscrowPath {
        &self.escrow_prefix
    }

    /// 主私钥指纹（公开信息，启动日志用于核对加载的是哪把密钥）
    pub fn master_fingerprint(&self) -> Fingerprint {
        self.master.fingerprint(&self.secp)
    }

    /// 托管索引对应的完整路径：前缀 + escrow_idx
    pub fn escrow_path(&self, escrow_idx: i64) -> Result<EscrowPath, SignerError> {
        self.escrow_prefix.with_index(escrow_idx)
    }

    pub fn parse_path(&self, path: &str) -> Result<EscrowPath, SignerError> {
        EscrowPath::parse(path)
    }

    /// 派生子密钥对（每次调用都会计数）
    pub fn derive(&self, path: &EscrowPath) -> Result<ChildKeyPair, SignerError> {
        self.metrics.count_derivation();
        self.master.derive(&self.secp, path, self.network)
    }

    /// 某条托管路径应当收款的地址
    pub fn escrow_address(&self, path: &EscrowPath) -> Result<Address, SignerError> {
        Ok(self.derive(path)?.address())
    }

    /// 对调用方已认证过的 PSBT 签名
    pub fn sign_psbt(
        &self,
        path: &EscrowPath,
        psbt: Psbt,
    ) -> Result<SignedTransaction, SignerError> {
        let mut lifecycle = pre_authenticated()?;
        self.execute(path, Prepared::Psbt(psbt), &mut lifecycle)
    }

    /// 端到端处理一个已通过认证的请求
    ///
    /// `lifecycle` 必须处于 `Authenticated`；失败时进入 `Rejected` 并计数
    pub fn sign(
        &self,
        request: &SigningRequest,
        lifecycle: &mut SigningLifecycle,
    ) -> Result<SignedTransaction, SignerError> {
        let result = self
            .prepare(request)
            .and_then(|(path, prepared)| self.execute(&path, prepared, lifecycle));

        match result {
            Ok(signed) => {
                self.metrics
                    .count_signed(signed.signed_inputs(), signed.failed_inputs());
                tracing::info!(
                    trade_id = %request.trade_id,
                    txid = %signed.txid,
                    inputs_signed = signed.signed_inputs(),
                    "✅ transaction signed and finalized"
                );
                Ok(signed)
            }
            Err(e) => {
                lifecycle.reject(e.kind());
                self.metrics.count_rejected(e.kind());
                tracing::warn!(
                    trade_id = %request.trade_id,
                    reason = e.kind().as_str(),
                    "signing request rejected"
                );
                Err(e)
            }
        }
    }

    /// 解析与校验：全部在派生密钥之前完成
    fn prepare(&self, request: &SigningRequest) -> Result<(EscrowPath, Prepared), SignerError> {
        match &request.payload {
            TransactionPayload::Psbt {
                psbt_base64,
                escrow_idx,
            } => {
                let path = self.escrow_path(*escrow_idx)?;
                let psbt = decode_psbt(psbt_base64)?;
                Ok((path, Prepared::Psbt(psbt)))
            }
            TransactionPayload::Transfer(transfer) => {
                let path = self.parse_path(&transfer.derivation_path)?;
                let plan = TransferPlan::validate(transfer, self.network)?;
                Ok((path, Prepared::Transfer(plan)))
            }
        }
    }

    fn execute(
        &self,
        path: &EscrowPath,
        prepared: Prepared,
        lifecycle: &mut SigningLifecycle,
    ) -> Result<SignedTransaction, SignerError> {
        lifecycle.advance(SigningStage::PathValidated)?;

        let key = self.derive(path)?;
        lifecycle.advance(SigningStage::KeyDerived)?;
        tracing::debug!(trade_id = %lifecycle.trade_id(), path = %path, "child key derived");

        let mut psbt = match prepared {
            Prepared::Psbt(psbt) => psbt,
            Prepared::Transfer(plan) => {
                tracing::info!(
                    trade_id = %lifecycle.trade_id(),
                    to = %redact_address(&plan.recipient().to_string()),
                    amount_sats = plan.amount().to_sat(),
                    change_sats = plan.change().map(|c| c.to_sat()).unwrap_or(0),
                    "transfer template built"
                );
                plan.into_psbt(&key)?
            }
        };

        let outcomes = psbt_signer::sign_inputs(&mut psbt, &key, &self.secp);
        lifecycle.advance(SigningStage::InputsSigned)?;

        psbt_signer::finalize(&mut psbt, &key, &outcomes)?;
        lifecycle.advance(SigningStage::Finalized)?;
        drop(key);

        let signed = psbt_signer::serialize(&psbt, outcomes)?;
        lifecycle.advance(SigningStage::Serialized)?;

        Ok(signed)
    }
}

fn pre_authenticated() -> Result<SigningLifecycle, SignerError> {
    let mut lifecycle = SigningLifecycle::new("-");
    lifecycle.advance(SigningStage::Authenticated)?;
    Ok(lifecycle)
}

/// base64 → PSBT；解码失败属于请求错误
pub fn decode_psbt(encoded: &str) -> Result<Psbt, SignerError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| SignerError::malformed("psbt is not valid base64"))?;
    Psbt::deserialize(&bytes).map_err(|e| SignerError::malformed(format!("invalid psbt: {}", e)))
}

impl std::fmt::Debug for SigningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningEngine")
            .field("network", &self.network)
            .field("escrow_prefix", &self.escrow_prefix.to_string())
            .field("master", &self.master)
            .finish()
    }
}
