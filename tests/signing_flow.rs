//! 签名流程集成测试：派生 → 签名 → 最终化 → 序列化

mod common;

use std::collections::HashSet;

use bitcoin::{
    consensus::encode::deserialize,
    ecdsa,
    hashes::Hash,
    secp256k1::{Message, Secp256k1},
    sighash::SighashCache,
    Transaction,
};
use escrow_signer::{
    domain::{SigningLifecycle, SigningRequest, SigningStage, TransactionPayload},
    error::{SignerError, SignerErrorKind},
    service::{InputOutcome, SpendKind},
};

use common::*;

fn decode_tx(hex_str: &str) -> Transaction {
    deserialize(&hex::decode(hex_str).expect("hex")).expect("consensus tx")
}

#[test]
fn test_trade_1_escrow_42_scenario() {
    let engine = test_engine();
    let path = engine.escrow_path(42).unwrap();
    assert_eq!(path.to_string(), "m/0/42");

    let psbt = psbt_owned_by(&engine, &path, 50_000);
    let prevout = psbt.inputs[0].witness_utxo.clone().unwrap();
    let request = SigningRequest {
        trade_id: "trade-1".into(),
        payload: TransactionPayload::Psbt {
            psbt_base64: psbt_base64(&psbt),
            escrow_idx: 42,
        },
    };

    let mut lifecycle = SigningLifecycle::new("trade-1");
    lifecycle.advance(SigningStage::Authenticated).unwrap();
    let signed = engine.sign(&request, &mut lifecycle).unwrap();
    assert_eq!(lifecycle.stage(), SigningStage::Serialized);

    let tx = decode_tx(&signed.tx_hex);
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.compute_txid(), signed.txid);

    // 签名必须能用派生公钥针对该输入的 BIP143 摘要验证通过
    let witness = &tx.input[0].witness;
    assert_eq!(witness.len(), 2);
    let sig = ecdsa::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
    let pubkey = bitcoin::PublicKey::from_slice(witness.nth(1).unwrap()).unwrap();
    assert_eq!(pubkey, engine.derive(&path).unwrap().public_key());

    let sighash = SighashCache::new(&tx)
        .p2wpkh_signature_hash(0, &prevout.script_pubkey, prevout.value, sig.sighash_type)
        .unwrap();
    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(
        &Message::from_digest(sighash.to_byte_array()),
        &sig.signature,
        &pubkey.inner,
    )
    .expect("signature verifies against the input sighash");
}

#[test]
fn test_signing_is_deterministic() {
    let engine = test_engine();
    let path = engine.escrow_path(7).unwrap();
    let psbt = psbt_owned_by(&engine, &path, 30_000);

    let first = engine.sign_psbt(&path, psbt.clone()).unwrap();
    let second = engine.sign_psbt(&path, psbt).unwrap();
    assert_eq!(first.tx_hex, second.tx_hex);
    assert_eq!(first.txid, second.txid);
    assert_eq!(
        first.outcomes,
        vec![InputOutcome::Signed {
            kind: SpendKind::P2wpkh
        }]
    );
}

#[test]
fn test_same_key_across_engines() {
    let a = test_engine();
    let b = test_engine();
    let path = a.escrow_path(1234).unwrap();
    assert_eq!(
        a.escrow_address(&path).unwrap(),
        b.escrow_address(&path).unwrap()
    );
}

#[test]
fn test_distinct_paths_yield_distinct_addresses() {
    let engine = test_engine();
    let mut seen = HashSet::new();
    for idx in (0..200).chain([2_147_483_000, 2_147_483_647]) {
        let path = engine.escrow_path(idx).unwrap();
        let address = engine.escrow_address(&path).unwrap();
        assert!(seen.insert(address.to_string()), "collision at {}", idx);
    }

    for raw in ["m/0/1'", "m/0'/1", "m/1/0", "m/0/0/1"] {
        let path = engine.parse_path(raw).unwrap();
        assert!(seen.insert(engine.escrow_address(&path).unwrap().to_string()));
    }
}

#[test]
fn test_escrow_index_boundary() {
    let engine = test_engine();
    assert!(engine.escrow_path(2_147_483_647).is_ok());

    for idx in [2_147_483_648i64, -1, i64::MAX] {
        let err = engine.escrow_path(idx).unwrap_err();
        assert_eq!(err.kind(), SignerErrorKind::InvalidDerivationPath);
    }
}

#[test]
fn test_foreign_input_fails_finalization() {
    let engine = test_engine();
    let ours = engine.escrow_path(42).unwrap();
    let theirs = engine.escrow_path(43).unwrap();
    let psbt = psbt_with_inputs(&engine, &[ours.clone(), theirs], 20_000);

    let err = engine.sign_psbt(&ours, psbt).unwrap_err();
    match err {
        SignerError::Finalization(msg) => assert!(msg.contains("[1]"), "{}", msg),
        other => panic!("expected finalization error, got {:?}", other),
    }
}

#[test]
fn test_multi_input_spend() {
    let engine = test_engine();
    let path = engine.escrow_path(5).unwrap();
    let psbt = psbt_with_inputs(&engine, &[path.clone(), path.clone(), path.clone()], 10_000);

    let signed = engine.sign_psbt(&path, psbt).unwrap();
    assert_eq!(signed.signed_inputs(), 3);
    let tx = decode_tx(&signed.tx_hex);
    assert!(tx.input.iter().all(|txin| txin.witness.len() == 2));
}

#[test]
fn test_rejected_request_never_reaches_derivation() {
    let engine = test_engine();
    let template = psbt_owned_by(&test_engine(), &engine.escrow_path(1).unwrap(), 9_000);
    let request = SigningRequest {
        trade_id: "trade-x".into(),
        payload: TransactionPayload::Psbt {
            psbt_base64: psbt_base64(&template),
            escrow_idx: 2_147_483_648,
        },
    };

    let mut lifecycle = SigningLifecycle::new("trade-x");
    lifecycle.advance(SigningStage::Authenticated).unwrap();
    let err = engine.sign(&request, &mut lifecycle).unwrap_err();
    assert_eq!(err.kind(), SignerErrorKind::InvalidDerivationPath);
    assert_eq!(engine.metrics().derivations(), 0);
    assert_eq!(
        lifecycle.stage(),
        SigningStage::Rejected(SignerErrorKind::InvalidDerivationPath)
    );
}
