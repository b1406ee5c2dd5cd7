use std::sync::Arc;

use anyhow::Context;
use gatehouse::config::Config;
use gatehouse::proxy::Proxy;
use gatehouse::server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()>{
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load().context("failed to load config")?;
    let proxy = Arc::new(Proxy::new(&cfg).context("failed to build proxy")?);

    tokio::select! {
        res = server::listener::run(&cfg, Arc::clone(&proxy)) => {
            res.context("failed to start server")?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    proxy.shutdown().await;

    Ok(())
}
