use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mgw_core::config::Config;
use mgw_link::{BridgeConfig, BridgeConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mgw_core::logging::init("mgw")?;

    let cfg = Config::load()?;
    cfg.ensure_dirs()?;

    let connector = Arc::new(BridgeConnector::new(BridgeConfig {
        url: cfg.link_url.clone(),
        version_url: cfg.link_version_url.clone(),
        send_timeout: cfg.send_timeout,
    })?);

    let listener = TcpListener::bind((cfg.bind_addr, cfg.port)).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => tracing::error!(error = %e, "cannot listen for ctrl-c"),
            }
        }
    });

    mgw::run(cfg, connector, listener, shutdown).await
}
