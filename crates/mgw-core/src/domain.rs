use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Raw message object emitted by the network, relayed verbatim.
pub type InboundEnvelope = serde_json::Value;

/// Suffix for individual chats on the external network.
pub const USER_SUFFIX: &str = "@s.whatsapp.net";

/// Normalized address of a chat on the external network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipient(String);

impl Recipient {
    /// Accepts a full address (`123@g.us`) verbatim or a phone number in any
    /// common notation, which is reduced to digits and given the user suffix.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::validation("to is required"));
        }
        if raw.contains('@') {
            return Ok(Self(raw.to_string()));
        }

        let mut digits = String::with_capacity(raw.len());
        for c in raw.chars() {
            match c {
                '0'..='9' => digits.push(c),
                '+' | ' ' | '-' | '(' | ')' | '.' => {}
                _ => {
                    return Err(Error::validation(format!(
                        "to is not a phone number or address: {raw}"
                    )))
                }
            }
        }
        if digits.is_empty() {
            return Err(Error::validation("to is required"));
        }
        Ok(Self(format!("{digits}{USER_SUFFIX}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account identity reported by the network once a session is open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Lifecycle of the single connection to the external network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    LoggedOut,
}

impl ConnState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::LoggedOut => "logged_out",
        }
    }
}

/// Snapshot reported by `GET /status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Identity>,
    pub state: ConnState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    /// RFC 3339 timestamp of the last state change.
    pub since: String,
}
