//! 测试辅助模块
//! 提供固定种子的主私钥、共享密钥和 PSBT 模板

#![allow(dead_code)]

use std::{str::FromStr, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::{
    absolute::LockTime, bip32::Xpriv, transaction::Version, Amount, Network, OutPoint, Psbt,
    Sequence, Transaction, TxIn, TxOut, Txid,
};
use escrow_signer::{
    app_state::AppState,
    config::{Config, LoggingConfig, SecretConfig, ServerConfig, SignerConfig},
    domain::EscrowPath,
    metrics::SignerMetrics,
    security::authenticator::compute_tag,
    service::SigningEngine,
};
use zeroize::Zeroizing;

pub const TEST_SEED: [u8; 32] = [0x42; 32];
pub const TEST_SECRET: &str = "integration-test-hmac-secret";
pub const TEST_NETWORK: Network = Network::Testnet;

/// 固定种子生成的测试网扩展私钥
pub fn test_xprv() -> String {
    Xpriv::new_master(TEST_NETWORK, &TEST_SEED)
        .expect("valid seed")
        .to_string()
}

pub fn test_config() -> Config {
    Config {
        signer: SignerConfig {
            network: "testnet".into(),
            escrow_path_prefix: "m/0".into(),
        },
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 4000,
        },
        logging: LoggingConfig {
            level: "debug".into(),
            format: "text".into(),
        },
        secrets: SecretConfig {
            xprv: Zeroizing::new(test_xprv()),
            hmac_secret: Zeroizing::new(TEST_SECRET.into()),
        },
    }
}

/// 独立的签名引擎（自带计数器），与应用状态使用同一把主私钥
pub fn test_engine() -> SigningEngine {
    let config = test_config();
    SigningEngine::new(
        config.master_key().expect("test key"),
        TEST_NETWORK,
        config.escrow_prefix().expect("test prefix"),
        Arc::new(SignerMetrics::new()),
    )
    .expect("network matches")
}

/// 创建测试应用状态
pub fn create_test_app_state() -> Arc<AppState> {
    Arc::new(AppState::new(test_config()).expect("test config is valid"))
}

pub fn tag(message: &[u8]) -> String {
    compute_tag(TEST_SECRET.as_bytes(), message).expect("hmac accepts any key length")
}

pub fn outpoint(n: u8) -> OutPoint {
    OutPoint {
        txid: Txid::from_str(&format!("{:02x}", n).repeat(32)).expect("valid txid"),
        vout: u32::from(n),
    }
}

/// 一个输入、一个输出的 PSBT 模板，输入支付给 `owner` 路径的 P2WPKH
pub fn psbt_owned_by(engine: &SigningEngine, owner: &EscrowPath, amount_sats: u64) -> Psbt {
    psbt_with_inputs(engine, &[owner.clone()], amount_sats)
}

/// 多输入模板：第 i 个输入属于 `owners[i]`
pub fn psbt_with_inputs(engine: &SigningEngine, owners: &[EscrowPath], amount_sats: u64) -> Psbt {
    let scripts: Vec<_> = owners
        .iter()
        .map(|path| engine.derive(path).expect("derivable path").p2wpkh_script())
        .collect();

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: (0..owners.len())
            .map(|i| TxIn {
                previous_output: outpoint(i as u8 + 1),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                ..Default::default()
            })
            .collect(),
        output: vec![TxOut {
            value: Amount::from_sat(amount_sats - 500),
            script_pubkey: scripts[0].clone(),
        }],
    };

    let mut psbt = Psbt::from_unsigned_tx(tx).expect("unsigned template");
    for (input, script) in psbt.inputs.iter_mut().zip(scripts) {
        input.witness_utxo = Some(TxOut {
            value: Amount::from_sat(amount_sats),
            script_pubkey: script,
        });
    }
    psbt
}

pub fn psbt_base64(psbt: &Psbt) -> String {
    STANDARD.encode(psbt.serialize())
}
