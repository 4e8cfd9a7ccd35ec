//! PSBT 输入签名与最终化
//!
//! 单签名者模式：本服务签完之后每个输入都必须可以最终化，否则整笔请求失败，
//! 不返回部分最终化的交易。

use bitcoin::{
    consensus::encode::serialize_hex,
    ecdsa,
    hashes::Hash,
    psbt::{Input, Psbt},
    script::{Builder, PushBytesBuf},
    secp256k1::{Message, Secp256k1, Signing},
    sighash::{EcdsaSighashType, SighashCache},
    Amount, ScriptBuf, Transaction, TxOut, Txid, Witness, Wtxid,
};

use crate::{
    domain::ChildKeyPair,
    error::{InputSigningError, SignerError},
};

/// 输入所花费脚本的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendKind {
    P2wpkh,
    P2shP2wpkh,
    P2pkh,
}

impl SpendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P2wpkh => "p2wpkh",
            Self::P2shP2wpkh => "p2sh-p2wpkh",
            Self::P2pkh => "p2pkh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 输入已带有 final_script_sig / final_script_witness
    AlreadyFinalized,
    /// 前序输出不属于派生出的子密钥
    NotOwned,
}

/// 单个输入的签名结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    Signed { kind: SpendKind },
    Skipped(SkipReason),
    Failed(InputSigningError),
}

impl InputOutcome {
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Signed { .. })
    }
}

/// 最终化并序列化之后的交易
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub tx_hex: String,
    pub txid: Txid,
    pub wtxid: Wtxid,
    pub outcomes: Vec<InputOutcome>,
}

impl SignedTransaction {
    pub fn signed_inputs(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_signed()).count()
    }

    pub fn failed_inputs(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, InputOutcome::Failed(_)))
            .count()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 签名
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 为所有属于 `key` 的输入签名，结果逐个收集，单个输入失败不中断循环
pub fn sign_inputs<C: Signing>(
    psbt: &mut Psbt,
    key: &ChildKeyPair,
    secp: &Secp256k1<C>,
) -> Vec<InputOutcome> {
    let p2wpkh = key.p2wpkh_script();
    let p2sh_p2wpkh = key.p2sh_p2wpkh_script();
    let p2pkh = key.p2pkh_script();

    let mut cache = SighashCache::new(&psbt.unsigned_tx);
    let mut outcomes = Vec::with_capacity(psbt.inputs.len());

    for (index, input) in psbt.inputs.iter_mut().enumerate() {
        if input.final_script_sig.is_some() || input.final_script_witness.is_some() {
            outcomes.push(InputOutcome::Skipped(SkipReason::AlreadyFinalized));
            continue;
        }

        let prevout = match spent_output(&psbt.unsigned_tx, input, index) {
            Ok(prevout) => prevout,
            Err(e) => {
                tracing::warn!(input = index, reason = %e, "input not signed");
                outcomes.push(InputOutcome::Failed(e));
                continue;
            }
        };

        let kind = if prevout.script_pubkey == p2wpkh {
            SpendKind::P2wpkh
        } else if prevout.script_pubkey == p2sh_p2wpkh {
            SpendKind::P2shP2wpkh
        } else if prevout.script_pubkey == p2pkh {
            SpendKind::P2pkh
        } else {
            outcomes.push(InputOutcome::Skipped(SkipReason::NotOwned));
            continue;
        };

        let outcome = match sign_input(&mut cache, input, index, kind, &prevout, &p2wpkh, key, secp)
        {
            Ok(()) => InputOutcome::Signed { kind },
            Err(e) => {
                tracing::warn!(input = index, reason = %e, "input not signed");
                InputOutcome::Failed(e)
            }
        };
        outcomes.push(outcome);
    }

    outcomes
}

/// 找到输入花费的前序输出
///
/// 优先使用 witness_utxo；否则从 non_witness_utxo 中按 outpoint 取出，并校验 txid 一致
fn spent_output(
    tx: &Transaction,
    input: &Input,
    index: usize,
) -> Result<TxOut, InputSigningError> {
    if let Some(utxo) = &input.witness_utxo {
        return Ok(utxo.clone());
    }

    let prev_tx = input
        .non_witness_utxo
        .as_ref()
        .ok_or(InputSigningError::MissingUtxo { index })?;
    let outpoint = tx
        .input
        .get(index)
        .map(|txin| txin.previous_output)
        .ok_or(InputSigningError::MissingUtxo { index })?;

    if prev_tx.compute_txid() != outpoint.txid {
        return Err(InputSigningError::UtxoMismatch { index });
    }
    prev_tx
        .output
        .get(outpoint.vout as usize)
        .cloned()
        .ok_or(InputSigningError::UtxoMismatch { index })
}

#[allow(clippy::too_many_arguments)]
fn sign_input<C: Signing>(
    cache: &mut SighashCache<&Transaction>,
    input: &mut Input,
    index: usize,
    kind: SpendKind,
    prevout: &TxOut,
    p2wpkh: &ScriptBuf,
    key: &ChildKeyPair,
    secp: &Secp256k1<C>,
) -> Result<(), InputSigningError> {
    let sighash_type = match input.sighash_type {
        Some(t) => t
            .ecdsa_hash_ty()
            .map_err(|_| InputSigningError::NonStandardSighash { index })?,
        None => EcdsaSighashType::All,
    };

    // SIGHASH_SINGLE 且没有同序号输出：旧式摘要为常量 1，不签
    if sighash_type.is_single() && index >= cache.transaction().output.len() {
        return Err(InputSigningError::SingleWithoutOutput { index });
    }

    let digest = match kind {
        SpendKind::P2wpkh | SpendKind::P2shP2wpkh => {
            segwit_v0_digest(cache, index, p2wpkh, prevout.value, sighash_type)?
        }
        SpendKind::P2pkh => cache
            .legacy_signature_hash(index, &prevout.script_pubkey, sighash_type.to_u32())
            .map_err(|e| InputSigningError::Sighash {
                index,
                reason: e.to_string(),
            })?
            .to_byte_array(),
    };

    let signature = secp.sign_ecdsa_low_r(&Message::from_digest(digest), key.secret_key());
    input.partial_sigs.insert(
        key.public_key(),
        ecdsa::Signature {
            signature,
            sighash_type,
        },
    );
    if kind == SpendKind::P2shP2wpkh && input.redeem_script.is_none() {
        input.redeem_script = Some(p2wpkh.clone());
    }

    Ok(())
}

fn segwit_v0_digest(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    p2wpkh: &ScriptBuf,
    value: Amount,
    sighash_type: EcdsaSighashType,
) -> Result<[u8; 32], InputSigningError> {
    cache
        .p2wpkh_signature_hash(index, p2wpkh, value, sighash_type)
        .map(|h| h.to_byte_array())
        .map_err(|e| InputSigningError::Sighash {
            index,
            reason: e.to_string(),
        })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 最终化与序列化
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 把已签名输入转换为最终脚本；任何一个输入无法满足都返回 `Finalization`
///
/// 检查先于修改，失败时 PSBT 保持原样
pub fn finalize(
    psbt: &mut Psbt,
    key: &ChildKeyPair,
    outcomes: &[InputOutcome],
) -> Result<(), SignerError> {
    if psbt.inputs.is_empty() {
        return Err(SignerError::malformed("transaction has no inputs"));
    }

    let unsatisfied: Vec<usize> = outcomes
        .iter()
        .enumerate()
        .filter(|(_, outcome)| {
            !matches!(
                outcome,
                InputOutcome::Signed { .. } | InputOutcome::Skipped(SkipReason::AlreadyFinalized)
            )
        })
        .map(|(index, _)| index)
        .collect();
    if !unsatisfied.is_empty() || outcomes.len() != psbt.inputs.len() {
        return Err(SignerError::Finalization(format!(
            "inputs {:?} are not fully signed",
            unsatisfied
        )));
    }
    if !outcomes.iter().any(InputOutcome::is_signed) {
        return Err(SignerError::Finalization(
            "no input is spendable by the escrow key".into(),
        ));
    }

    let public_key = key.public_key();
    for (index, outcome) in outcomes.iter().enumerate() {
        let InputOutcome::Signed { kind } = outcome else {
            continue;
        };
        let input = &mut psbt.inputs[index];
        let signature = input.partial_sigs.get(&public_key).copied().ok_or_else(|| {
            SignerError::Finalization(format!("input {} lost its signature", index))
        })?;
        let sig_bytes = signature.to_vec();

        match kind {
            SpendKind::P2wpkh => {
                input.final_script_witness =
                    Some(Witness::from_slice(&[sig_bytes, public_key.to_bytes()]));
            }
            SpendKind::P2shP2wpkh => {
                let redeem = key.p2wpkh_script();
                let push = PushBytesBuf::try_from(redeem.to_bytes())
                    .map_err(|_| SignerError::Internal("redeem script too large".into()))?;
                input.final_script_sig = Some(Builder::new().push_slice(push).into_script());
                input.final_script_witness =
                    Some(Witness::from_slice(&[sig_bytes, public_key.to_bytes()]));
            }
            SpendKind::P2pkh => {
                let push = PushBytesBuf::try_from(sig_bytes)
                    .map_err(|_| SignerError::Internal("signature too large".into()))?;
                input.final_script_sig = Some(
                    Builder::new()
                        .push_slice(push)
                        .push_key(&public_key)
                        .into_script(),
                );
            }
        }

        input.partial_sigs.clear();
        input.sighash_type = None;
        input.redeem_script = None;
        input.witness_script = None;
        input.bip32_derivation.clear();
    }

    Ok(())
}

/// 从已最终化的 PSBT 中取出完整交易
pub fn extract(psbt: &Psbt) -> Result<Transaction, SignerError> {
    let mut tx = psbt.unsigned_tx.clone();
    if tx.input.len() != psbt.inputs.len() {
        return Err(SignerError::malformed(
            "psbt input count does not match the transaction",
        ));
    }

    for (index, (txin, input)) in tx.input.iter_mut().zip(&psbt.inputs).enumerate() {
        if input.final_script_sig.is_none() && input.final_script_witness.is_none() {
            return Err(SignerError::Finalization(format!(
                "input {} is not finalized",
                index
            )));
        }
        txin.script_sig = input.final_script_sig.clone().unwrap_or_default();
        txin.witness = input.final_script_witness.clone().unwrap_or_default();
    }

    Ok(tx)
}

/// 完整流程：签名 → 最终化 → 取出 → 序列化
pub fn sign_and_finalize<C: Signing>(
    mut psbt: Psbt,
    key: &ChildKeyPair,
    secp: &Secp256k1<C>,
) -> Result<SignedTransaction, SignerError> {
    let outcomes = sign_inputs(&mut psbt, key, secp);
    finalize(&mut psbt, key, &outcomes)?;
    serialize(&psbt, outcomes)
}

/// 取出交易并计算 txid / wtxid
pub fn serialize(
    psbt: &Psbt,
    outcomes: Vec<InputOutcome>,
) -> Result<SignedTransaction, SignerError> {
    let tx = extract(psbt)?;

    Ok(SignedTransaction {
        tx_hex: serialize_hex(&tx),
        txid: tx.compute_txid(),
        wtxid: tx.compute_wtxid(),
        outcomes,
    })
}
