//! 转账模板构建
//!
//! 调用方指定要花费的托管 UTXO 与手续费，本模块只做校验与组装，不做选币也不估算费率。
//! 字段校验在派生密钥之前完成；模板在派生之后才落地（输入脚本依赖子密钥）。

use std::{collections::HashSet, str::FromStr};

use bitcoin::{
    absolute::LockTime, transaction::Version, Address, Amount, Network, OutPoint, Psbt, Sequence,
    Transaction, TxIn, TxOut, Txid,
};

use crate::{
    domain::{ChildKeyPair, TransferRequest, UtxoRef},
    error::SignerError,
};

/// 粉尘阈值（satoshi）
pub const DUST_LIMIT_SATS: u64 = 546;

/// 单笔转账允许的最多输入数
pub const MAX_TRANSFER_INPUTS: usize = 500;

/// 经过校验、尚未绑定密钥的转账计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    recipient: Address,
    amount: Amount,
    fee: Amount,
    inputs: Vec<(OutPoint, Amount)>,
}

impl TransferPlan {
    pub fn validate(request: &TransferRequest, network: Network) -> Result<Self, SignerError> {
        let recipient = Address::from_str(request.to_address.trim())
            .map_err(|_| SignerError::malformed("toAddress is not a valid address"))?
            .require_network(network)
            .map_err(|_| {
                SignerError::malformed(format!("toAddress does not belong to {}", network))
            })?;

        if request.amount_sats < DUST_LIMIT_SATS {
            return Err(SignerError::malformed(format!(
                "amountSats below dust limit {}",
                DUST_LIMIT_SATS
            )));
        }
        if request.amount_sats > Amount::MAX_MONEY.to_sat() {
            return Err(SignerError::malformed("amountSats exceeds max supply"));
        }

        if request.utxos.is_empty() {
            return Err(SignerError::malformed("utxos must not be empty"));
        }
        if request.utxos.len() > MAX_TRANSFER_INPUTS {
            return Err(SignerError::malformed(format!(
                "at most {} utxos per transfer",
                MAX_TRANSFER_INPUTS
            )));
        }

        let mut seen = HashSet::with_capacity(request.utxos.len());
        let mut inputs = Vec::with_capacity(request.utxos.len());
        let mut total: u64 = 0;
        for (pos, utxo) in request.utxos.iter().enumerate() {
            let outpoint = parse_outpoint(pos, utxo)?;
            if !seen.insert(outpoint) {
                return Err(SignerError::malformed(format!(
                    "utxo {} duplicates an earlier outpoint",
                    pos
                )));
            }
            if utxo.amount_sats == 0 {
                return Err(SignerError::malformed(format!("utxo {} has zero amount", pos)));
            }
            total = total
                .checked_add(utxo.amount_sats)
                .filter(|t| *t <= Amount::MAX_MONEY.to_sat())
                .ok_or_else(|| SignerError::malformed("utxo total exceeds max supply"))?;
            inputs.push((outpoint, Amount::from_sat(utxo.amount_sats)));
        }

        let required = request
            .amount_sats
            .checked_add(request.fee_sats)
            .ok_or_else(|| SignerError::malformed("amountSats + feeSats overflows"))?;
        if total < required {
            return Err(SignerError::malformed(format!(
                "utxos total {} sats does not cover amount plus fee {} sats",
                total, required
            )));
        }

        Ok(Self {
            recipient,
            amount: Amount::from_sat(request.amount_sats),
            fee: Amount::from_sat(request.fee_sats),
            inputs,
        })
    }

    pub fn input_total(&self) -> Amount {
        self.inputs.iter().map(|(_, amount)| *amount).sum()
    }

    /// 找零；低于粉尘阈值时并入手续费
    pub fn change(&self) -> Option<Amount> {
        let change = self.input_total() - self.amount - self.fee;
        (change.to_sat() >= DUST_LIMIT_SATS).then_some(change)
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// 用派生出的托管密钥生成待签 PSBT
    pub fn into_psbt(self, key: &ChildKeyPair) -> Result<Psbt, SignerError> {
        let escrow_script = key.p2wpkh_script();

        let mut output = vec![TxOut {
            value: self.amount,
            script_pubkey: self.recipient.script_pubkey(),
        }];
        if let Some(change) = self.change() {
            output.push(TxOut {
                value: change,
                script_pubkey: escrow_script.clone(),
            });
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: self
                .inputs
                .iter()
                .map(|(outpoint, _)| TxIn {
                    previous_output: *outpoint,
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    ..Default::default()
                })
                .collect(),
            output,
        };

        let mut psbt = Psbt::from_unsigned_tx(tx)
            .map_err(|e| SignerError::Internal(format!("psbt template: {}", e)))?;
        for (input, (_, amount)) in psbt.inputs.iter_mut().zip(&self.inputs) {
            input.witness_utxo = Some(TxOut {
                value: *amount,
                script_pubkey: escrow_script.clone(),
            });
        }

        Ok(psbt)
    }
}

fn parse_outpoint(pos: usize, utxo: &UtxoRef) -> Result<OutPoint, SignerError> {
    if utxo.txid.len() != 64 || !utxo.txid.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SignerError::malformed(format!(
            "utxo {} txid must be 64 hex characters",
            pos
        )));
    }
    let txid = Txid::from_str(&utxo.txid)
        .map_err(|_| SignerError::malformed(format!("utxo {} txid is invalid", pos)))?;
    Ok(OutPoint {
        txid,
        vout: utxo.vout,
    })
}
