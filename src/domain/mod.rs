//! Domain 模块
//!
//! 派生路径、密钥材料、请求模型与请求生命周期

pub mod derivation_path;
pub mod key_material;
pub mod signing_request;
pub mod signing_state;

// 重新导出常用类型
pub use derivation_path::{EscrowPath, MAX_CHILD_INDEX, MAX_PATH_DEPTH};
pub use key_material::{ChildKeyPair, MasterKey};
pub use signing_request::{SigningRequest, TransactionPayload, TransferRequest, UtxoRef};
pub use signing_state::{SigningLifecycle, SigningStage};
