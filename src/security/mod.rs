//! 安全模块：请求认证

pub mod authenticator;

pub use authenticator::{Authenticator, SignedPayload, SIGNATURE_HEADER};
