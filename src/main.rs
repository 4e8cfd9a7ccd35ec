//! Escrow Signer 主入口
//! 托管签名预言机：认证请求 → 派生子密钥 → 签名 → 最终化 → 返回交易

use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use escrow_signer::{
    api,
    app_state::AppState,
    config::Config,
    infrastructure::{env_validator::EnvValidator, log_redact::redact_secrets, logging},
};

#[tokio::main]
async fn main() -> ExitCode {
    // ✅ 1. 加载环境变量
    dotenvy::dotenv().ok();

    // ✅ 2. 加载配置（CONFIG_PATH 指向的 TOML 覆盖非密钥项）
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = match Config::from_env_and_file(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_default_logging();
            tracing::error!("❌ Failed to load configuration: {}", redact_secrets(&e.to_string()));
            return ExitCode::FAILURE;
        }
    };

    // ✅ 3. 初始化日志
    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    // ✅ 4. 启动前校验：收集所有问题后退出
    if let Err(e) = EnvValidator::validate_and_log() {
        tracing::error!("❌ {}", e);
        return ExitCode::FAILURE;
    }
    let problems = config.problems();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("{}", redact_secrets(problem));
        }
        tracing::error!("❌ Configuration invalid: {} error(s)", problems.len());
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("❌ Signer stopped: {}", redact_secrets(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let bind_addr = config.bind_addr();
    let state = Arc::new(AppState::new(config)?);

    tracing::info!(
        network = %state.engine.network(),
        "🚀 Starting escrow signer"
    );

    let app = api::routes(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("✅ Listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Signer shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("⚠️ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
