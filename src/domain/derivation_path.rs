//! 托管派生路径
//!
//! 每笔交易对应主扩展私钥下的一条确定性路径，例如 `m/0/42`。
//! 路径在触碰任何密钥之前完成校验，格式错误属于请求错误而不是进程崩溃。

use std::fmt;

use bitcoin::bip32::ChildNumber;

use crate::error::SignerError;

/// 允许的最大路径深度
pub const MAX_PATH_DEPTH: usize = 8;

/// 非强化索引上限（2^31 - 1），强化索引在此基础上加偏移
pub const MAX_CHILD_INDEX: u32 = (1 << 31) - 1;

/// 经过校验的派生路径
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EscrowPath {
    children: Vec<ChildNumber>,
}

impl EscrowPath {
    /// 解析完整派生路径（至少一层）
    ///
    /// 支持的强化标记：`'`、`h`、`H`
    pub fn parse(path: &str) -> Result<Self, SignerError> {
        let parsed = Self::parse_components(path)?;
        if parsed.children.is_empty() {
            return Err(SignerError::invalid_path(
                "path must contain at least one segment",
            ));
        }
        Ok(parsed)
    }

    /// 解析路径前缀（允许只有 `m`），之后由 [`EscrowPath::with_index`] 追加托管索引
    pub fn parse_prefix(prefix: &str) -> Result<Self, SignerError> {
        let parsed = Self::parse_components(prefix)?;
        if parsed.children.len() >= MAX_PATH_DEPTH {
            return Err(SignerError::invalid_path(format!(
                "prefix leaves no room for the escrow index (max depth {})",
                MAX_PATH_DEPTH
            )));
        }
        Ok(parsed)
    }

    fn parse_components(path: &str) -> Result<Self, SignerError> {
        let rest = match path {
            "m" => return Ok(Self { children: Vec::new() }),
            _ => path
                .strip_prefix("m/")
                .ok_or_else(|| SignerError::invalid_path("path must start with 'm/'"))?,
        };

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() > MAX_PATH_DEPTH {
            return Err(SignerError::invalid_path(format!(
                "path depth {} exceeds maximum {}",
                segments.len(),
                MAX_PATH_DEPTH
            )));
        }

        let children = segments
            .iter()
            .enumerate()
            .map(|(pos, segment)| parse_segment(pos, segment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { children })
    }

    /// 在当前路径末尾追加一个非强化的托管索引
    ///
    /// 索引必须落在 `0..=2^31-1`，否则返回 `InvalidDerivationPath`
    pub fn with_index(&self, index: i64) -> Result<Self, SignerError> {
        if index < 0 || index > i64::from(MAX_CHILD_INDEX) {
            return Err(SignerError::invalid_path(format!(
                "escrow index {} out of range 0..={}",
                index, MAX_CHILD_INDEX
            )));
        }
        if self.children.len() >= MAX_PATH_DEPTH {
            return Err(SignerError::invalid_path(format!(
                "path depth exceeds maximum {}",
                MAX_PATH_DEPTH
            )));
        }

        let mut children = self.children.clone();
        children.push(ChildNumber::Normal {
            index: index as u32,
        });
        Ok(Self { children })
    }

    pub fn depth(&self) -> usize {
        self.children.len()
    }

    pub fn children(&self) -> &[ChildNumber] {
        &self.children
    }
}

fn parse_segment(pos: usize, segment: &str) -> Result<ChildNumber, SignerError> {
    let (digits, hardened) = match segment
        .strip_suffix('\'')
        .or_else(|| segment.strip_suffix('h'))
        .or_else(|| segment.strip_suffix('H'))
    {
        Some(digits) => (digits, true),
        None => (segment, false),
    };

    if digits.is_empty() {
        return Err(SignerError::invalid_path(format!(
            "segment {} is empty",
            pos + 1
        )));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SignerError::invalid_path(format!(
            "segment {} is not a decimal index",
            pos + 1
        )));
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(SignerError::invalid_path(format!(
            "segment {} has leading zeros",
            pos + 1
        )));
    }

    let index: u32 = digits
        .parse()
        .ok()
        .filter(|i| *i <= MAX_CHILD_INDEX)
        .ok_or_else(|| {
            SignerError::invalid_path(format!(
                "segment {} out of range 0..={}",
                pos + 1,
                MAX_CHILD_INDEX
            ))
        })?;

    Ok(if hardened {
        ChildNumber::Hardened { index }
    } else {
        ChildNumber::Normal { index }
    })
}

impl fmt::Display for EscrowPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for child in &self.children {
            match child {
                ChildNumber::Normal { index } => write!(f, "/{}", index)?,
                ChildNumber::Hardened { index } => write!(f, "/{}'", index)?,
            }
        }
        Ok(())
    }
}
