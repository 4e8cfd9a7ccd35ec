//! 日志脱敏
//!
//! 错误文本在写入日志之前经过这里：扩展私钥整体替换，长十六进制串只保留首尾。

use std::sync::LazyLock;

use regex::Regex;

// base58 扩展私钥（xprv / tprv 及 SLIP-132 变体）
static EXTENDED_PRIVATE_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[xtyzuv]prv[1-9A-HJ-NP-Za-km-z]{100,}\b").expect("static regex")
});

// 64 位及以上十六进制串（私钥、HMAC 标签等）
static LONG_HEX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{64,}\b").expect("static regex"));

/// 脱敏十六进制字符串（显示前缀和后缀）
pub fn redact_hex_string(hex: &str, show_chars: usize) -> String {
    if hex.len() <= show_chars * 2 {
        return "*".repeat(hex.len());
    }

    let prefix = &hex[..show_chars];
    let suffix = &hex[hex.len() - show_chars..];
    format!("{}...{}", prefix, suffix)
}

/// 脱敏地址（显示前6位和后4位）
pub fn redact_address(address: &str) -> String {
    if address.len() < 10 {
        return "*".repeat(address.len());
    }

    let prefix = &address[..6];
    let suffix = &address[address.len() - 4..];
    format!("{}...{}", prefix, suffix)
}

/// 清理自由文本中的密钥材料
pub fn redact_secrets(text: &str) -> String {
    let text = EXTENDED_PRIVATE_KEY_REGEX.replace_all(text, "[REDACTED_XPRV]");
    LONG_HEX_REGEX
        .replace_all(&text, |caps: &regex::Captures| redact_hex_string(&caps[0], 6))
        .into_owned()
}
