//! State machine owning the single live link to the messaging network.
//!
//! `Disconnected -> Connecting -> Connected -> Reconnecting -> Connected ...`,
//! with `LoggedOut` as a terminal state. The handle slot is replaced whole under
//! a lock: senders clone the current `Arc` and either use the old link (and fail
//! cleanly once it is closed) or the new one.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{AuthSession, AuthStore},
    domain::{ConnState, Identity, InboundEnvelope, Status},
    errors::Error,
    link::{CloseReason, LinkEvent, LinkSession, NetworkConnector, NetworkLink, ProtocolVersion},
    retry::ReconnectPolicy,
    Result,
};

#[derive(Clone)]
struct LiveHandle {
    link: Arc<dyn NetworkLink>,
    identity: Identity,
}

struct Slot {
    state: ConnState,
    live: Option<LiveHandle>,
    qr: Option<String>,
    since: String,
}

enum CycleOutcome {
    ConnectFailed(Error),
    Closed { reason: CloseReason, opened: bool },
    Shutdown,
}

pub struct Connection {
    connector: Arc<dyn NetworkConnector>,
    auth: AuthStore,
    policy: ReconnectPolicy,
    inbound: mpsc::Sender<InboundEnvelope>,
    slot: RwLock<Slot>,
    state_tx: watch::Sender<ConnState>,
}

impl Connection {
    pub fn new(
        connector: Arc<dyn NetworkConnector>,
        auth: AuthStore,
        policy: ReconnectPolicy,
        inbound: mpsc::Sender<InboundEnvelope>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnState::Disconnected);
        Self {
            connector,
            auth,
            policy,
            inbound,
            slot: RwLock::new(Slot {
                state: ConnState::Disconnected,
                live: None,
                qr: None,
                since: now(),
            }),
            state_tx,
        }
    }

    pub fn state(&self) -> ConnState {
        self.read_slot().state
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnState> {
        self.state_tx.subscribe()
    }

    /// The live link, or the reason there is none.
    pub fn current_link(&self) -> Result<Arc<dyn NetworkLink>> {
        let slot = self.read_slot();
        match (&slot.live, slot.state) {
            (Some(live), ConnState::Connected) => Ok(live.link.clone()),
            (_, ConnState::LoggedOut) => Err(Error::LoggedOut),
            _ => Err(Error::NotConnected),
        }
    }

    pub fn status(&self) -> Status {
        let slot = self.read_slot();
        let connected = slot.state == ConnState::Connected && slot.live.is_some();
        Status {
            connected,
            user: if connected {
                slot.live.as_ref().map(|l| l.identity.clone())
            } else {
                None
            },
            state: slot.state,
            qr: slot.qr.clone(),
            since: slot.since.clone(),
        }
    }

    /// Drive the connection until logout, an exhausted retry budget, or shutdown.
    ///
    /// Returns the state the machine settled in.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> ConnState {
        let mut session = match self.auth.load().await {
            Ok(Some(s)) => {
                tracing::info!(docs = s.len(), "loaded persisted auth session");
                Some(s)
            }
            Ok(None) => {
                tracing::info!("no persisted auth session; pairing required");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load auth session; starting unpaired");
                None
            }
        };

        let mut attempt: u32 = 0;
        let mut next_state = ConnState::Connecting;

        loop {
            self.transition(next_state);

            let outcome = self.run_cycle(&mut session, &shutdown).await;
            let reason = match outcome {
                CycleOutcome::Shutdown => {
                    self.transition(ConnState::Disconnected);
                    tracing::info!("connection stopped for shutdown");
                    return ConnState::Disconnected;
                }
                CycleOutcome::Closed { reason, .. } if reason.is_logged_out() => {
                    self.transition(ConnState::LoggedOut);
                    tracing::warn!("session logged out; re-pairing required, not reconnecting");
                    if let Err(e) = self.auth.clear().await {
                        tracing::error!(error = %e, "failed to clear auth session after logout");
                    }
                    return ConnState::LoggedOut;
                }
                CycleOutcome::Closed { reason, opened } => {
                    if opened {
                        attempt = 0;
                    }
                    reason.to_string()
                }
                CycleOutcome::ConnectFailed(e) => e.to_string(),
            };

            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                self.transition(ConnState::Disconnected);
                tracing::error!(attempts = attempt - 1, reason = %reason, "reconnect budget exhausted; giving up");
                return ConnState::Disconnected;
            };

            self.transition(ConnState::Reconnecting);
            tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, reason = %reason, "connection closed; reconnecting");
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        self.transition(ConnState::Disconnected);
                        return ConnState::Disconnected;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            next_state = ConnState::Reconnecting;
        }
    }

    async fn run_cycle(
        &self,
        session: &mut Option<AuthSession>,
        shutdown: &CancellationToken,
    ) -> CycleOutcome {
        let opening = async {
            let version = match self.connector.negotiate_version().await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, fallback = %ProtocolVersion::BUILTIN, "version negotiation failed");
                    ProtocolVersion::BUILTIN
                }
            };
            tracing::info!(%version, paired = session.is_some(), "opening link");
            self.connector.connect(version, session.clone()).await
        };
        let opened_link = tokio::select! {
            _ = shutdown.cancelled() => return CycleOutcome::Shutdown,
            res = opening => res,
        };
        let LinkSession { link, mut events } = match opened_link {
            Ok(s) => s,
            Err(e) => return CycleOutcome::ConnectFailed(e),
        };

        let mut opened = false;
        let outcome = loop {
            let ev = tokio::select! {
                _ = shutdown.cancelled() => break CycleOutcome::Shutdown,
                ev = events.recv() => ev,
            };
            let Some(ev) = ev else {
                break CycleOutcome::Closed {
                    reason: CloseReason::Other("link event stream ended".to_string()),
                    opened,
                };
            };

            match ev {
                LinkEvent::Pairing { code } => {
                    tracing::info!(code = %code, "pairing code received; link the device to continue");
                    self.write_slot().qr = Some(code);
                }
                LinkEvent::Open { identity } => {
                    opened = true;
                    tracing::info!(user = %identity.id, "connected");
                    self.publish(link.clone(), identity);
                }
                LinkEvent::CredsUpdate(mut update) => {
                    for name in update.drop_unstorable() {
                        tracing::warn!(doc = ?name, "ignoring auth document with an unusable name");
                    }
                    let current = session.get_or_insert_with(AuthSession::new);
                    current.merge(update);
                    if let Err(e) = self.auth.save(current).await {
                        tracing::error!(error = %e, "failed to persist auth session");
                    }
                }
                LinkEvent::Message(envelope) => {
                    if self.inbound.send(envelope).await.is_err() {
                        tracing::debug!("inbound relay is gone; dropping message");
                    }
                }
                LinkEvent::Closed(reason) => break CycleOutcome::Closed { reason, opened },
            }
        };

        self.unpublish();
        link.close().await;
        outcome
    }

    fn publish(&self, link: Arc<dyn NetworkLink>, identity: Identity) {
        {
            let mut slot = self.write_slot();
            slot.live = Some(LiveHandle { link, identity });
            slot.state = ConnState::Connected;
            slot.qr = None;
            slot.since = now();
        }
        self.state_tx.send_replace(ConnState::Connected);
    }

    fn unpublish(&self) {
        self.write_slot().live = None;
    }

    fn transition(&self, state: ConnState) {
        {
            let mut slot = self.write_slot();
            if state != ConnState::Connected {
                slot.live = None;
            }
            if slot.state != state {
                slot.state = state;
                slot.since = now();
            }
        }
        self.state_tx.send_replace(state);
    }

    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}
