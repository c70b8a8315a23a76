//! JSON frames exchanged with the protocol bridge, tagged by `type`.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mgw_core::{
    auth::AuthSession,
    domain::Identity,
    link::{OutboundPayload, ProtocolVersion},
};

/// Gateway -> bridge.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello {
        version: ProtocolVersion,
        session: Option<AuthSession>,
    },
    Send {
        id: u64,
        to: String,
        payload: WirePayload,
    },
}

/// Outbound payload as it travels on the wire; media is base64.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WirePayload {
    Text {
        text: String,
    },
    Image {
        data: String,
        mimetype: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Audio {
        data: String,
        mimetype: String,
    },
    Document {
        data: String,
        mimetype: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

impl From<OutboundPayload> for WirePayload {
    fn from(p: OutboundPayload) -> Self {
        let b64 = |d: Vec<u8>| base64::engine::general_purpose::STANDARD.encode(d);
        match p {
            OutboundPayload::Text { body } => Self::Text { text: body },
            OutboundPayload::Image {
                data,
                mimetype,
                caption,
            } => Self::Image {
                data: b64(data),
                mimetype,
                caption,
            },
            OutboundPayload::Audio { data, mimetype } => Self::Audio {
                data: b64(data),
                mimetype,
            },
            OutboundPayload::Document {
                data,
                mimetype,
                file_name,
                caption,
            } => Self::Document {
                data: b64(data),
                mimetype,
                file_name,
                caption,
            },
        }
    }
}

/// Bridge -> gateway.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    Qr {
        code: String,
    },
    Open {
        user: Identity,
    },
    Creds {
        files: AuthSession,
    },
    Message {
        envelope: Value,
    },
    Ack {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Close {
        #[serde(default)]
        reason: String,
        #[serde(default, rename = "loggedOut")]
        logged_out: bool,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionResponse {
    pub version: ProtocolVersion,
}
