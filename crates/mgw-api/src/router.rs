use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mgw_core::{
    connection::Connection, dispatch::OutboundDispatcher, domain::Status, webhook::WebhookStore,
};

use crate::handlers;

/// Source of the `/status` snapshot.
pub trait StatusProvider: Send + Sync {
    fn status(&self) -> Status;
}

impl StatusProvider for Connection {
    fn status(&self) -> Status {
        Connection::status(self)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<OutboundDispatcher>,
    pub webhook: Arc<dyn WebhookStore>,
    pub status: Arc<dyn StatusProvider>,
    /// Multipart uploads are spooled here for the lifetime of one request.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState) -> Router {
    let limit = state.max_upload_bytes;
    Router::new()
        .route("/set-webhook", post(handlers::webhook::set_webhook))
        .route("/webhook", get(handlers::webhook::get_webhook))
        .route("/send-text", post(handlers::text::send_text))
        .route("/send-image", post(handlers::media::send_image))
        .route("/send-audio", post(handlers::media::send_audio))
        .route("/send-file", post(handlers::media::send_file))
        .route("/status", get(handlers::status::status))
        .route("/health", get(handlers::status::health))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Serve until `shutdown` fires, then drain in-flight requests.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "control API listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
