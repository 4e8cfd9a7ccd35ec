//! 主扩展私钥与单次请求的子密钥对
//!
//! 主私钥只在进程内存中存在；子密钥对按请求派生，用完即擦除，从不缓存。

use std::{fmt, str::FromStr};

use bitcoin::{
    bip32::{Fingerprint, Xpriv},
    secp256k1::{PublicKey, Secp256k1, SecretKey, Signing},
    Address, CompressedPublicKey, Network, NetworkKind, ScriptBuf,
};

use crate::{domain::derivation_path::EscrowPath, error::SignerError};

/// 主扩展私钥（进程级只读）
pub struct MasterKey {
    xpriv: Xpriv,
}

impl MasterKey {
    /// 从 base58 编码的扩展私钥加载，并校验其网络类型与配置一致
    ///
    /// 错误信息不回显输入内容
    pub fn from_base58(encoded: &str, network: Network) -> Result<Self, SignerError> {
        let xpriv = Xpriv::from_str(encoded.trim()).map_err(|_| {
            SignerError::KeyDerivation("master key is not a valid extended private key".into())
        })?;

        if xpriv.network != NetworkKind::from(network) {
            return Err(SignerError::KeyDerivation(format!(
                "master key network does not match configured network {}",
                network
            )));
        }

        Ok(Self { xpriv })
    }

    /// 从种子生成主私钥（测试与基准使用）
    pub fn from_seed(network: Network, seed: &[u8]) -> Result<Self, SignerError> {
        let xpriv = Xpriv::new_master(network, seed)
            .map_err(|e| SignerError::KeyDerivation(format!("invalid seed: {}", e)))?;
        Ok(Self { xpriv })
    }

    pub fn network_kind(&self) -> NetworkKind {
        self.xpriv.network
    }

    pub fn fingerprint<C: Signing>(&self, secp: &Secp256k1<C>) -> Fingerprint {
        self.xpriv.fingerprint(secp)
    }

    /// 沿路径逐层派生子私钥
    ///
    /// 每一层的中间私钥在进入下一层后立即擦除
    pub(crate) fn derive<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        path: &EscrowPath,
        network: Network,
    ) -> Result<ChildKeyPair, SignerError> {
        if path.depth() == 0 {
            return Err(SignerError::invalid_path(
                "refusing to sign with the master key itself",
            ));
        }

        let mut current = self.xpriv;
        for (depth, child) in path.children().iter().enumerate() {
            let next = current.derive_priv(secp, &[*child]);
            current.private_key.non_secure_erase();
            current = next.map_err(|e| {
                SignerError::KeyDerivation(format!("step {} yielded no usable key: {}", depth + 1, e))
            })?;
        }

        let secret = current.private_key;
        current.private_key.non_secure_erase();

        Ok(ChildKeyPair::new(secp, secret, network, path.clone()))
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.xpriv.private_key.non_secure_erase();
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("network", &self.xpriv.network)
            .field("xpriv", &"[REDACTED]")
            .finish()
    }
}

/// 单次请求派生出的子密钥对
pub struct ChildKeyPair {
    secret: SecretKey,
    public: CompressedPublicKey,
    network: Network,
    path: EscrowPath,
}

impl ChildKeyPair {
    fn new<C: Signing>(
        secp: &Secp256k1<C>,
        secret: SecretKey,
        network: Network,
        path: EscrowPath,
    ) -> Self {
        let public = CompressedPublicKey(PublicKey::from_secret_key(secp, &secret));
        Self {
            secret,
            public,
            network,
            path,
        }
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> bitcoin::PublicKey {
        bitcoin::PublicKey::new(self.public.0)
    }

    /// 原生隔离见证（P2WPKH）锁定脚本，同时也是 P2SH-P2WPKH 的赎回脚本
    pub fn p2wpkh_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&self.public.wpubkey_hash())
    }

    pub fn p2sh_p2wpkh_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2sh(&self.p2wpkh_script().script_hash())
    }

    pub fn p2pkh_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&self.public.pubkey_hash())
    }

    /// 托管资金地址（P2WPKH）
    pub fn address(&self) -> Address {
        Address::p2wpkh(&self.public, self.network)
    }
}

impl Drop for ChildKeyPair {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl fmt::Debug for ChildKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildKeyPair")
            .field("path", &self.path.to_string())
            .field("public", &self.public.to_string())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::bip32::DerivationPath;

    fn master() -> MasterKey {
        MasterKey::from_seed(Network::Testnet, &[7u8; 32]).unwrap()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let secp = Secp256k1::new();
        let master = master();
        let path = EscrowPath::parse("m/0/42").unwrap();

        let a = master.derive(&secp, &path, Network::Testnet).unwrap();
        let b = master.derive(&secp, &path, Network::Testnet).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.address(), b.address());
        assert_eq!(a.secret_key(), b.secret_key());
    }

    #[test]
    fn test_matches_direct_bip32_derivation() {
        let secp = Secp256k1::new();
        let xpriv = Xpriv::new_master(Network::Testnet, &[7u8; 32]).unwrap();
        let path = EscrowPath::parse("m/84'/1'/0'/0/3").unwrap();

        let expected = xpriv
            .derive_priv(&secp, &DerivationPath::from(path.children().to_vec()))
            .unwrap()
            .private_key;
        let pair = master().derive(&secp, &path, Network::Testnet).unwrap();
        assert_eq!(*pair.secret_key(), expected);
    }

    #[test]
    fn test_master_key_network_must_match() {
        let xpriv = Xpriv::new_master(Network::Testnet, &[1u8; 32]).unwrap();
        let encoded = xpriv.to_string();
        assert!(encoded.starts_with("tprv"));

        assert!(MasterKey::from_base58(&encoded, Network::Testnet).is_ok());
        assert!(MasterKey::from_base58(&encoded, Network::Regtest).is_ok());
        let err = MasterKey::from_base58(&encoded, Network::Bitcoin).unwrap_err();
        assert!(!err.to_string().contains(&encoded));
    }

    #[test]
    fn test_invalid_master_key_not_echoed() {
        let err = MasterKey::from_base58("xprvNOTAKEY", Network::Bitcoin).unwrap_err();
        assert!(matches!(err, SignerError::KeyDerivation(_)));
        assert!(!err.to_string().contains("xprvNOTAKEY"));
    }

    #[test]
    fn test_refuses_empty_path() {
        let secp = Secp256k1::new();
        let root = EscrowPath::parse_prefix("m").unwrap();
        let err = master().derive(&secp, &root, Network::Testnet).unwrap_err();
        assert!(matches!(err, SignerError::InvalidDerivationPath(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let secp = Secp256k1::new();
        let master = master();
        let pair = master
            .derive(&secp, &EscrowPath::parse("m/0/1").unwrap(), Network::Testnet)
            .unwrap();

        let secret_hex = pair.secret_key().display_secret().to_string();
        assert!(!format!("{:?}", pair).contains(&secret_hex));
        assert!(format!("{:?}", master).contains("[REDACTED]"));
    }

    #[test]
    fn test_scripts_and_address() {
        let secp = Secp256k1::new();
        let pair = master()
            .derive(&secp, &EscrowPath::parse("m/0/42").unwrap(), Network::Testnet)
            .unwrap();

        assert!(pair.p2wpkh_script().is_p2wpkh());
        assert!(pair.p2pkh_script().is_p2pkh());
        assert!(pair.p2sh_p2wpkh_script().is_p2sh());
        assert_eq!(pair.address().script_pubkey(), pair.p2wpkh_script());
        assert!(pair.address().to_string().starts_with("tb1q"));
    }
}
