//! Escrow Signer - 托管交易远程签名服务
//!
//! 主扩展私钥只存在于进程内存中；每笔交易按确定性路径派生子密钥，签名后立即擦除

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod security;
pub mod service;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, AppErrorCode, SignerError};
