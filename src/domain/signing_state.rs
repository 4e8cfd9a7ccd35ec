//! 单次签名请求的生命周期状态机
//!
//! Received → Authenticated → PathValidated → KeyDerived → InputsSigned → Finalized → Serialized
//! 任意非终态都可以直接进入 Rejected；请求不会回到更早的状态。

use std::fmt;

use crate::error::{SignerError, SignerErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStage {
    /// 已收到请求
    Received,
    /// 签名标签校验通过
    Authenticated,
    /// 派生路径校验通过
    PathValidated,
    /// 子密钥已派生
    KeyDerived,
    /// 输入签名完成（含逐个输入的结果）
    InputsSigned,
    /// 交易已最终化
    Finalized,
    /// 已序列化并返回（成功终态）
    Serialized,
    /// 被拒绝（失败终态）
    Rejected(SignerErrorKind),
}

impl SigningStage {
    fn ordinal(&self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Authenticated => 1,
            Self::PathValidated => 2,
            Self::KeyDerived => 3,
            Self::InputsSigned => 4,
            Self::Finalized => 5,
            Self::Serialized => 6,
            Self::Rejected(_) => 7,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Serialized | Self::Rejected(_))
    }

    /// 验证状态转换合法性：只允许前进一步，或从非终态进入 Rejected
    pub fn can_transition_to(&self, target: &Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            Self::Rejected(_) => true,
            _ => target.ordinal() == self.ordinal() + 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Authenticated => "authenticated",
            Self::PathValidated => "path_validated",
            Self::KeyDerived => "key_derived",
            Self::InputsSigned => "inputs_signed",
            Self::Finalized => "finalized",
            Self::Serialized => "serialized",
            Self::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for SigningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(kind) => write!(f, "rejected({})", kind.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// 非法状态转换
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal signing stage transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: SigningStage,
    pub to: SigningStage,
}

impl From<IllegalTransition> for SignerError {
    fn from(err: IllegalTransition) -> Self {
        SignerError::Internal(err.to_string())
    }
}

/// 跟踪一个请求所处的阶段
#[derive(Debug)]
pub struct SigningLifecycle {
    trade_id: String,
    stage: SigningStage,
}

impl SigningLifecycle {
    pub fn new(trade_id: impl Into<String>) -> Self {
        Self {
            trade_id: trade_id.into(),
            stage: SigningStage::Received,
        }
    }

    pub fn trade_id(&self) -> &str {
        &self.trade_id
    }

    pub fn stage(&self) -> SigningStage {
        self.stage
    }

    pub fn advance(&mut self, next: SigningStage) -> Result<(), IllegalTransition> {
        if !self.stage.can_transition_to(&next) {
            return Err(IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        tracing::debug!(
            trade_id = %self.trade_id,
            from = %self.stage,
            to = %next,
            "signing stage transition"
        );
        self.stage = next;
        Ok(())
    }

    /// 进入失败终态；已处于终态时保持不变
    pub fn reject(&mut self, kind: SignerErrorKind) {
        if self.stage.is_terminal() {
            return;
        }
        tracing::debug!(
            trade_id = %self.trade_id,
            from = %self.stage,
            reason = kind.as_str(),
            "signing request rejected"
        );
        self.stage = SigningStage::Rejected(kind);
    }
}
