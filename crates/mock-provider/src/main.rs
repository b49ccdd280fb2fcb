//! Mock 发卡供应商入口
//!
//! 启动一个模拟供应商 HTTP 服务，密钥须与履约服务的
//! `provider.signing_secret` 配置一致。

use std::sync::Arc;

use clap::Parser;
use mock_provider::{CardServiceState, provider_routes};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "mock-provider", about = "Mock 礼品卡发卡供应商")]
struct Cli {
    /// 监听端口
    #[arg(long, default_value_t = 9401)]
    port: u16,

    /// HMAC 验签密钥
    #[arg(long, default_value = "dev-provider-secret")]
    secret: String,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 优先使用环境变量 RUST_LOG，否则使用命令行参数指定的级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .init();

    let state = Arc::new(CardServiceState::new(cli.secret));
    let app = provider_routes().with_state(state);

    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Mock provider listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
