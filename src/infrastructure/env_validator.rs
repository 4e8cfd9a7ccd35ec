//! 环境变量验证器
//! 启动时一次性收集所有配置问题，全部打印后再退出

use std::env;

use crate::config::{parse_network, MIN_SECRET_LEN};

#[derive(Debug)]
pub struct EnvValidator;

impl EnvValidator {
    /// 验证进程环境变量
    pub fn validate_all() -> Result<(), Vec<String>> {
        Self::validate_with(|key| env::var(key).ok())
    }

    /// 使用自定义查找函数验证（便于测试）
    pub fn validate_with<F>(lookup: F) -> Result<(), Vec<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut errors = Vec::new();

        // 必需的环境变量
        if lookup("XPRV").map_or(true, |v| v.trim().is_empty()) {
            errors.push("XPRV is required but not set".to_string());
        }

        match lookup("SIGNER_HMAC_SECRET").or_else(|| lookup("SIGNER_SECRET")) {
            None => errors.push("SIGNER_HMAC_SECRET is required but not set".to_string()),
            Some(secret) if secret.len() < MIN_SECRET_LEN => errors.push(format!(
                "SIGNER_HMAC_SECRET must be at least {} bytes",
                MIN_SECRET_LEN
            )),
            Some(_) => {}
        }

        // 可选变量：设置了就必须合法
        if let Some(network) = lookup("NETWORK") {
            if let Err(e) = parse_network(&network) {
                errors.push(e.to_string());
            }
        }

        if let Some(port) = lookup("PORT") {
            if !matches!(port.parse::<u16>(), Ok(p) if p > 0) {
                errors.push(format!("PORT must be between 1 and 65535 (got '{}')", port));
            }
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            if format != "json" && format != "text" {
                errors.push("LOG_FORMAT must be 'json' or 'text'".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// 验证并打印错误
    pub fn validate_and_log() -> Result<(), anyhow::Error> {
        match Self::validate_all() {
            Ok(()) => {
                tracing::info!("Environment variables validation passed");
                Ok(())
            }
            Err(errors) => {
                for error in &errors {
                    tracing::error!("{}", error);
                }
                Err(anyhow::anyhow!(
                    "Environment validation failed: {} error(s)",
                    errors.len()
                ))
            }
        }
    }
}
