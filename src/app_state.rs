use std::sync::Arc;

use anyhow::Context;

use crate::{
    config::Config, metrics::SignerMetrics, security::Authenticator,
    service::signing_engine::SigningEngine,
};

/// 应用状态
/// 启动时构造一次，之后只读；处理器之间无锁共享
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SigningEngine>,
    pub authenticator: Arc<Authenticator>,
    pub metrics: Arc<SignerMetrics>,
}

impl AppState {
    /// 从已校验的配置创建应用状态
    ///
    /// 配置按值传入，构造完成后连同其中的 `Zeroizing` 密钥一起释放；
    /// 此后主私钥只存在于签名引擎内，共享密钥只存在于认证器内
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let network = config.network()?;
        let prefix = config.escrow_prefix()?;
        let master = config.master_key()?;
        let metrics = Arc::new(SignerMetrics::new());

        let engine = SigningEngine::new(master, network, prefix, metrics.clone())
            .context("failed to initialize signing engine")?;
        let authenticator = Authenticator::new(config.secrets.hmac_secret.as_bytes().to_vec());
        drop(config);

        tracing::info!(
            network = %engine.network(),
            fingerprint = %engine.master_fingerprint(),
            prefix = %engine.escrow_prefix(),
            "🔑 Signing engine ready"
        );

        Ok(Self {
            engine: Arc::new(engine),
            authenticator: Arc::new(authenticator),
            metrics,
        })
    }
}
