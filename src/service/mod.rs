pub mod psbt_signer;
pub mod signing_engine; // 派生 → 签名 → 最终化 → 序列化
pub mod transfer_builder;

pub use psbt_signer::{InputOutcome, SignedTransaction, SkipReason, SpendKind};
pub use signing_engine::SigningEngine;
pub use transfer_builder::TransferPlan;
