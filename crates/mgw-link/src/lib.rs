//! Protocol bridge adapter (WebSocket).
//!
//! This crate implements the `mgw-core` network ports over a JSON-framed
//! WebSocket to a bridge process that speaks the multi-device protocol.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub mod frames;

use frames::{BridgeFrame, ClientFrame, VersionResponse, WirePayload};
use mgw_core::{
    auth::AuthSession,
    domain::Recipient,
    errors::Error,
    link::{
        CloseReason, LinkEvent, LinkSession, NetworkConnector, NetworkLink, OutboundPayload,
        ProtocolVersion,
    },
    Result,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type AckTx = oneshot::Sender<Result<()>>;

const EVENT_BUFFER: usize = 256;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub url: String,
    pub version_url: Option<String>,
    pub send_timeout: Duration,
}

/// Opens one bridge WebSocket per connect cycle.
#[derive(Clone, Debug)]
pub struct BridgeConnector {
    cfg: BridgeConfig,
    http: reqwest::Client,
}

impl BridgeConnector {
    pub fn new(cfg: BridgeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("bridge http client: {e}")))?;
        Ok(Self { cfg, http })
    }
}

#[async_trait]
impl NetworkConnector for BridgeConnector {
    async fn negotiate_version(&self) -> Result<ProtocolVersion> {
        let Some(url) = &self.cfg.version_url else {
            return Ok(ProtocolVersion::BUILTIN);
        };

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::External(format!("version request error: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "version endpoint returned {}",
                resp.status()
            )));
        }
        let v: VersionResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("version json error: {e}")))?;
        Ok(v.version)
    }

    async fn connect(
        &self,
        version: ProtocolVersion,
        session: Option<AuthSession>,
    ) -> Result<LinkSession> {
        let (mut ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.cfg.url.as_str()))
            .await
            .map_err(|_| Error::External("bridge connect timed out".to_string()))?
            .map_err(|e| Error::External(format!("bridge connect error: {e}")))?;

        let hello = serde_json::to_string(&ClientFrame::Hello { version, session })?;
        ws.send(Message::Text(hello.into()))
            .await
            .map_err(|e| Error::External(format!("bridge hello error: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);
        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(EVENT_BUFFER);
        tokio::spawn(bridge_loop(ws, cmd_rx, event_tx));

        let link = Arc::new(BridgeLink {
            cmd_tx,
            send_timeout: self.cfg.send_timeout,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        Ok(LinkSession {
            link,
            events: event_rx,
        })
    }
}

enum Command {
    Send {
        id: u64,
        frame: ClientFrame,
        ack: AckTx,
    },
    Close,
}

/// Live bridge connection; sends are acknowledged by id.
pub struct BridgeLink {
    cmd_tx: mpsc::Sender<Command>,
    send_timeout: Duration,
    next_id: AtomicU64,
    closed: AtomicBool,
}

#[async_trait]
impl NetworkLink for BridgeLink {
    async fn send(&self, to: &Recipient, payload: OutboundPayload) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = ClientFrame::Send {
            id,
            to: to.to_string(),
            payload: WirePayload::from(payload),
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                id,
                frame,
                ack: ack_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match tokio::time::timeout(self.send_timeout, ack_rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::External(format!(
                "no ack from bridge within {}ms",
                self.send_timeout.as_millis()
            ))),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.cmd_tx.send(Command::Close).await;
        }
    }
}

async fn bridge_loop(ws: WsStream, mut cmd_rx: mpsc::Receiver<Command>, events: mpsc::Sender<LinkEvent>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, AckTx> = HashMap::new();

    let reason = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send { id, frame, ack }) => {
                        let text = match serde_json::to_string(&frame) {
                            Ok(t) => t,
                            Err(e) => {
                                let _ = ack.send(Err(e.into()));
                                continue;
                            }
                        };
                        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                            let _ = ack.send(Err(Error::External(format!("bridge write error: {e}"))));
                            break CloseReason::Other(format!("bridge write error: {e}"));
                        }
                        pending.insert(id, ack);
                    }
                    Some(Command::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break CloseReason::Other("closed by gateway".to_string());
                    }
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => break CloseReason::Other(format!("bridge read error: {e}")),
                    None => break CloseReason::Other("bridge socket ended".to_string()),
                };
                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => break CloseReason::Other("bridge closed the socket".to_string()),
                    _ => continue,
                };
                let frame: BridgeFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring malformed bridge frame");
                        continue;
                    }
                };

                let event = match frame {
                    BridgeFrame::Ack { id, ok, error } => {
                        if let Some(ack) = pending.remove(&id) {
                            let res = if ok {
                                Ok(())
                            } else {
                                Err(Error::External(error.unwrap_or_else(|| "send rejected by bridge".to_string())))
                            };
                            let _ = ack.send(res);
                        }
                        continue;
                    }
                    BridgeFrame::Close { logged_out: true, .. } => break CloseReason::LoggedOut,
                    BridgeFrame::Close { reason, .. } => break CloseReason::Other(reason),
                    BridgeFrame::Qr { code } => LinkEvent::Pairing { code },
                    BridgeFrame::Open { user } => LinkEvent::Open { identity: user },
                    BridgeFrame::Creds { files } => LinkEvent::CredsUpdate(files),
                    BridgeFrame::Message { envelope } => LinkEvent::Message(envelope),
                };
                if events.send(event).await.is_err() {
                    break CloseReason::Other("link abandoned".to_string());
                }
            }
        }
    };

    // Outstanding sends fail as not connected once their ack senders drop.
    pending.clear();
    tracing::debug!(reason = %reason, "bridge link finished");
    let _ = events.send(LinkEvent::Closed(reason)).await;
}
