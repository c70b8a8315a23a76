//! In-process fakes for the network ports.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::{
    auth::AuthSession,
    domain::{ConnState, Recipient},
    errors::Error,
    link::{LinkEvent, LinkSession, NetworkConnector, NetworkLink, OutboundPayload, ProtocolVersion},
    Result,
};

/// Link that records every send.
#[derive(Default)]
pub struct FakeLink {
    sent: Mutex<Vec<(Recipient, OutboundPayload)>>,
    fail_with: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl FakeLink {
    pub fn sent(&self) -> Vec<(Recipient, OutboundPayload)> {
        self.sent.lock().unwrap().clone()
    }

    /// Make subsequent sends fail with the given message.
    pub fn fail_sends(&self, msg: &str) {
        *self.fail_with.lock().unwrap() = Some(msg.to_string());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkLink for FakeLink {
    async fn send(&self, to: &Recipient, payload: OutboundPayload) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        if let Some(msg) = self.fail_with.lock().unwrap().clone() {
            return Err(Error::External(msg));
        }
        self.sent.lock().unwrap().push((to.clone(), payload));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// One `connect` call observed by [`FakeConnector`]; the test drives the link
/// through `events`.
pub struct ConnectCall {
    pub version: ProtocolVersion,
    pub session: Option<AuthSession>,
    pub link: Arc<FakeLink>,
    pub events: mpsc::Sender<LinkEvent>,
}

pub struct FakeConnector {
    calls: mpsc::UnboundedSender<ConnectCall>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            calls: tx,
            failures_remaining: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        });
        (connector, rx)
    }

    /// Refuse the next `n` connects.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkConnector for FakeConnector {
    async fn connect(
        &self,
        version: ProtocolVersion,
        session: Option<AuthSession>,
    ) -> Result<LinkSession> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::External("connection refused".to_string()));
        }

        let link = Arc::new(FakeLink::default());
        let (tx, rx) = mpsc::channel(64);
        let _ = self.calls.send(ConnectCall {
            version,
            session,
            link: link.clone(),
            events: tx,
        });
        Ok(LinkSession { link, events: rx })
    }
}

/// Wait (bounded) until the state machine reports `want`.
pub async fn wait_for_state(rx: &mut watch::Receiver<ConnState>, want: ConnState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"))
        .unwrap_or_else(|_| panic!("state channel closed waiting for {want:?}"));
}
