use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use foresight_rpc::config::Config;
use foresight_rpc::context::EngineContext;
use foresight_rpc::metadata::MetadataServices;
use foresight_rpc::router;

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("foresight_rpc=info,tower_http=debug")),
        )
        .init();

    let cfg = Config::from_env()?;
    tracing::info!(
        "Foresight RPC Proxy v{} starting on {}:{}",
        env!("CARGO_PKG_VERSION"),
        cfg.host,
        cfg.port
    );
    tracing::info!("Upstream RPC: {}", cfg.upstream_rpc_url);
    tracing::info!("Signer RPC: {}", cfg.signer_rpc_url);
    if let Some(address) = cfg.impersonation_address {
        tracing::info!("Impersonating {address}");
    }

    let listen_addr = cfg.listen_addr();
    let ctx = EngineContext::connect(cfg, MetadataServices::default()).await?;
    let _follower = ctx.spawn_block_follower();
    let app = router::build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
