//! 配置管理模块
//! 支持从环境变量和配置文件加载配置
//!
//! 密钥（`XPRV`、`SIGNER_HMAC_SECRET`）只从环境变量读取，不会写入也不会从配置文件读取。

use std::{fmt, path::Path};

use anyhow::{Context, Result};
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::domain::{EscrowPath, MasterKey};

/// 共享密钥最短长度（字节）
pub const MIN_SECRET_LEN: usize = 16;

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub secrets: SecretConfig,
}

/// 签名配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// mainnet / bitcoin / testnet / signet / regtest
    pub network: String,
    /// escrow_idx 追加在此前缀之后
    pub escrow_path_prefix: String,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 进程级密钥材料（只从环境变量读取）
#[derive(Clone)]
pub struct SecretConfig {
    pub xprv: Zeroizing<String>,
    pub hmac_secret: Zeroizing<String>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            network: std::env::var("NETWORK").unwrap_or_else(|_| "testnet".into()),
            escrow_path_prefix: std::env::var("ESCROW_PATH_PREFIX")
                .unwrap_or_else(|_| "m/0".into()),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4000),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            xprv: Zeroizing::new(std::env::var("XPRV").unwrap_or_default()),
            hmac_secret: Zeroizing::new(
                std::env::var("SIGNER_HMAC_SECRET")
                    .or_else(|_| std::env::var("SIGNER_SECRET"))
                    .unwrap_or_default(),
            ),
        }
    }
}

impl fmt::Debug for SecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |s: &str| if s.is_empty() { "<unset>" } else { "[REDACTED]" };
        f.debug_struct("SecretConfig")
            .field("xprv", &mask(&self.xprv))
            .field("hmac_secret", &mask(&self.hmac_secret))
            .finish()
    }
}

/// 解析网络名称
pub fn parse_network(name: &str) -> Result<Network> {
    match name.trim().to_lowercase().as_str() {
        "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => anyhow::bail!(
            "NETWORK must be one of mainnet, testnet, signet, regtest (got '{}')",
            other
        ),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            signer: SignerConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            secrets: SecretConfig::default(),
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                let file_config = Self::from_file(path)?;
                config = Config {
                    secrets: config.secrets,
                    ..file_config
                };
            }
        }

        Ok(config)
    }

    pub fn network(&self) -> Result<Network> {
        parse_network(&self.signer.network)
    }

    pub fn escrow_prefix(&self) -> Result<EscrowPath> {
        EscrowPath::parse_prefix(self.signer.escrow_path_prefix.trim())
            .map_err(|e| anyhow::anyhow!("ESCROW_PATH_PREFIX: {}", e))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 加载主私钥；错误信息不包含密钥内容
    pub fn master_key(&self) -> Result<MasterKey> {
        let network = self.network()?;
        MasterKey::from_base58(&self.secrets.xprv, network).map_err(|e| anyhow::anyhow!("XPRV: {}", e))
    }

    /// 收集所有配置问题（而不是遇到第一个就返回）
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.secrets.xprv.trim().is_empty() {
            problems.push("XPRV is required but not set".to_string());
        }
        if self.secrets.hmac_secret.is_empty() {
            problems.push("SIGNER_HMAC_SECRET is required but not set".to_string());
        } else if self.secrets.hmac_secret.len() < MIN_SECRET_LEN {
            problems.push(format!(
                "SIGNER_HMAC_SECRET must be at least {} bytes",
                MIN_SECRET_LEN
            ));
        }

        match self.network() {
            Ok(_) if !self.secrets.xprv.trim().is_empty() => {
                if let Err(e) = self.master_key() {
                    problems.push(e.to_string());
                }
            }
            Ok(_) => {}
            Err(e) => problems.push(e.to_string()),
        }

        if let Err(e) = self.escrow_prefix() {
            problems.push(e.to_string());
        }

        if self.server.port == 0 {
            problems.push("PORT must be between 1 and 65535".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            problems.push(format!("LOG_LEVEL must be one of: {:?}", valid_levels));
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            problems.push("LOG_FORMAT must be 'json' or 'text'".to_string());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::bip32::Xpriv;
    use std::io::Write;

    fn config(xprv: &str, secret: &str, network: &str) -> Config {
        Config {
            signer: SignerConfig {
                network: network.into(),
                escrow_path_prefix: "m/0".into(),
            },
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 4000,
            },
            logging: LoggingConfig {
                level: "info".into(),
                format: "text".into(),
            },
            secrets: SecretConfig {
                xprv: Zeroizing::new(xprv.into()),
                hmac_secret: Zeroizing::new(secret.into()),
            },
        }
    }

    fn tprv() -> String {
        Xpriv::new_master(Network::Testnet, &[5u8; 32])
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_valid_config() {
        let cfg = config(&tprv(), "0123456789abcdef", "testnet");
        assert!(cfg.problems().is_empty());
        assert_eq!(cfg.network().unwrap(), Network::Testnet);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:4000");
        assert_eq!(cfg.escrow_prefix().unwrap().to_string(), "m/0");
    }

    #[test]
    fn test_collects_all_problems() {
        let mut cfg = config("", "short", "moon");
        cfg.logging.format = "xml".into();
        let problems = cfg.problems();
        assert!(problems.iter().any(|p| p.contains("XPRV")));
        assert!(problems.iter().any(|p| p.contains("at least 16")));
        assert!(problems.iter().any(|p| p.contains("NETWORK")));
        assert!(problems.iter().any(|p| p.contains("LOG_FORMAT")));
    }

    #[test]
    fn test_network_mismatch_is_a_problem() {
        let cfg = config(&tprv(), "0123456789abcdef", "mainnet");
        let err = cfg.problems().join("; ");
        assert!(err.contains("network"));
        assert!(!err.contains(&tprv()));
    }

    #[test]
    fn test_parse_network_aliases() {
        assert_eq!(parse_network("mainnet").unwrap(), Network::Bitcoin);
        assert_eq!(parse_network("Bitcoin").unwrap(), Network::Bitcoin);
        assert_eq!(parse_network("regtest").unwrap(), Network::Regtest);
        assert!(parse_network("litecoin").is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let xprv = tprv();
        let cfg = config(&xprv, "super-secret-value-123", "testnet");
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains(&xprv));
        assert!(!debug.contains("super-secret-value-123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_file_keeps_env_secrets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[signer]
network = "regtest"
escrow_path_prefix = "m/7'"

[server]
host = "127.0.0.1"
port = 4100

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.signer.network, "regtest");
        assert_eq!(cfg.server.port, 4100);
        assert_eq!(cfg.logging.format, "json");
        assert_eq!(cfg.escrow_prefix().unwrap().to_string(), "m/7'");
    }

    #[test]
    fn test_bad_prefix() {
        let mut cfg = config(&tprv(), "0123456789abcdef", "testnet");
        cfg.signer.escrow_path_prefix = "0/1".into();
        assert!(cfg
            .problems()
            .iter()
            .any(|p| p.contains("ESCROW_PATH_PREFIX")));
    }
}
