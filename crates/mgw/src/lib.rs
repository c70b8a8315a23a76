//! Gateway assembly: wires the core services to the control API and a link
//! connector, then runs until shutdown.

use std::sync::Arc;

use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;

use mgw_api::AppState;
use mgw_core::{
    auth::AuthStore, config::Config, connection::Connection, dispatch::OutboundDispatcher,
    link::NetworkConnector, relay::InboundRelay, webhook::InMemoryWebhookStore,
};

const INBOUND_BUFFER: usize = 1024;

/// Run the gateway on `listener` until `shutdown` fires.
pub async fn run(
    cfg: Config,
    connector: Arc<dyn NetworkConnector>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let webhook = Arc::new(InMemoryWebhookStore::new(cfg.webhook_url.clone()));
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);

    let connection = Arc::new(Connection::new(
        connector,
        AuthStore::new(&cfg.auth_dir),
        cfg.reconnect,
        inbound_tx,
    ));
    let relay = Arc::new(InboundRelay::new(webhook.clone(), cfg.webhook_timeout)?);
    let dispatcher = Arc::new(OutboundDispatcher::new(connection.clone()));

    let relay_task = tokio::spawn(relay.run(inbound_rx));
    let conn_task = tokio::spawn(connection.clone().run(shutdown.clone()));

    let app = mgw_api::router(AppState {
        dispatcher,
        webhook,
        status: connection,
        upload_dir: cfg.upload_dir.clone(),
        max_upload_bytes: cfg.max_upload_bytes,
    });

    let served = mgw_api::serve(listener, app, shutdown.clone()).await;
    // The connection task only ends on its own for logout or an exhausted
    // retry budget; the API keeps serving status in that case.
    shutdown.cancel();

    match conn_task.await {
        Ok(state) => tracing::info!(state = state.as_str(), "connection task finished"),
        Err(e) => tracing::error!(error = %e, "connection task panicked"),
    }
    relay_task.abort();

    served
}
