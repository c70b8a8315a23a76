//! Hexagonal ports for the external messaging network.
//!
//! The WebSocket bridge adapter lives in `mgw-link`; tests use in-process fakes.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    auth::AuthSession,
    domain::{Identity, InboundEnvelope, Recipient},
    Result,
};

/// Multi-device protocol version announced when opening a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion(pub [u32; 3]);

impl ProtocolVersion {
    /// Used when negotiation is unavailable or fails.
    pub const BUILTIN: Self = Self([2, 3000, 1_015_901_307]);
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Document,
}

/// Payload handed to the live link for one send.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundPayload {
    Text {
        body: String,
    },
    Image {
        data: Vec<u8>,
        mimetype: String,
        caption: Option<String>,
    },
    Audio {
        data: Vec<u8>,
        mimetype: String,
    },
    Document {
        data: Vec<u8>,
        mimetype: String,
        file_name: String,
        caption: Option<String>,
    },
}

impl OutboundPayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
            Self::Audio { .. } => MessageKind::Audio,
            Self::Document { .. } => MessageKind::Document,
        }
    }
}

/// Why the network closed the link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The session was revoked; re-pairing is required.
    LoggedOut,
    Other(String),
}

impl CloseReason {
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::Other(r) => f.write_str(r),
        }
    }
}

/// Lifecycle and data events emitted by a live link.
#[derive(Clone, Debug)]
pub enum LinkEvent {
    /// Pairing code to show while no session exists.
    Pairing { code: String },
    /// Link is ready to send and receive.
    Open { identity: Identity },
    /// Partial credential update; `null` documents are deletions.
    CredsUpdate(AuthSession),
    /// Raw inbound message envelope.
    Message(InboundEnvelope),
    Closed(CloseReason),
}

/// One open connection to the network.
#[async_trait]
pub trait NetworkLink: Send + Sync {
    async fn send(&self, to: &Recipient, payload: OutboundPayload) -> Result<()>;

    /// Best-effort shutdown; further sends fail.
    async fn close(&self);
}

/// A freshly opened link plus its event stream.
pub struct LinkSession {
    pub link: Arc<dyn NetworkLink>,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Factory for links; one call per connect cycle.
#[async_trait]
pub trait NetworkConnector: Send + Sync {
    async fn negotiate_version(&self) -> Result<ProtocolVersion> {
        Ok(ProtocolVersion::BUILTIN)
    }

    async fn connect(
        &self,
        version: ProtocolVersion,
        session: Option<AuthSession>,
    ) -> Result<LinkSession>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_displays_dotted() {
        assert_eq!(ProtocolVersion([2, 3000, 7]).to_string(), "2.3000.7");
    }

    #[test]
    fn payload_kind_matches_variant() {
        let p = OutboundPayload::Audio {
            data: vec![1, 2],
            mimetype: "audio/mp4".into(),
        };
        assert_eq!(p.kind(), MessageKind::Audio);
        assert!(CloseReason::LoggedOut.is_logged_out());
        assert!(!CloseReason::Other("stream errored".into()).is_logged_out());
    }
}
