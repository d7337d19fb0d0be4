//! Message envelopes and rendered frames.
//!
//! An [`Envelope`] is what application code hands to the dispatcher. Its
//! payload is a closed enum, so every envelope built in-process is guaranteed
//! to render. A [`RawEnvelope`] is the wire form arriving from outside the
//! process; its `kind` tag is only checked when the dispatcher resolves it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::HubError;

/// Reserved channel whose membership drives presence.
pub const HEARTBEAT_CHANNEL: &str = "heartbeat";

/// Channel that receives a presence frame whenever heartbeat membership changes.
pub const GATEWAY_CHANNEL: &str = "gateway";

/// Discriminator for the payload kinds the dispatcher knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Text,
    Json,
    Presence,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 3] = [PayloadKind::Text, PayloadKind::Json, PayloadKind::Presence];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Text => "text",
            PayloadKind::Json => "json",
            PayloadKind::Presence => "presence",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PayloadKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| HubError::UnsupportedKind { kind: s.to_string() })
    }
}

/// A heartbeat identity going online or offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub key: String,
    pub online: bool,
}

/// Event payload. Serializes as the bare `data` value of a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
    Presence(PresenceUpdate),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Text(_) => PayloadKind::Text,
            Payload::Json(_) => PayloadKind::Json,
            Payload::Presence(_) => PayloadKind::Presence,
        }
    }
}

/// One event addressed to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel: String,
    pub operation: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(
        channel: impl Into<String>,
        operation: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            channel: channel.into(),
            operation: operation.into(),
            payload,
        }
    }

    pub fn text(
        channel: impl Into<String>,
        operation: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(channel, operation, Payload::Text(text.into()))
    }

    pub fn json(
        channel: impl Into<String>,
        operation: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self::new(channel, operation, Payload::Json(value))
    }

    /// Presence notice for the gateway channel. The frame's `data` is
    /// `{"key": key, "online": online}`, so the key is read from `data.key`.
    pub fn presence(key: &str, online: bool) -> Self {
        Self::new(
            GATEWAY_CHANNEL,
            if online { "online" } else { "offline" },
            Payload::Presence(PresenceUpdate {
                key: key.to_string(),
                online,
            }),
        )
    }

    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }

    /// Render the envelope into the text frame pushed to subscriber queues.
    pub fn render(&self) -> Result<Frame, HubError> {
        let wire = WireFrame {
            channel: &self.channel,
            operation: &self.operation,
            kind: self.kind(),
            data: &self.payload,
            sent_at: chrono::Utc::now().timestamp_millis(),
        };
        Ok(Frame::from(serde_json::to_string(&wire)?))
    }
}

#[derive(Serialize)]
struct WireFrame<'a> {
    channel: &'a str,
    operation: &'a str,
    kind: PayloadKind,
    data: &'a Payload,
    sent_at: i64,
}

/// Untyped envelope as published from outside the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub channel: String,
    #[serde(default)]
    pub operation: String,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RawEnvelope {
    /// Check the kind tag and payload shape, producing a typed envelope.
    pub fn resolve(self) -> Result<Envelope, HubError> {
        let kind: PayloadKind = self.kind.parse()?;
        let payload = match (kind, self.payload) {
            (PayloadKind::Text, serde_json::Value::String(text)) => Payload::Text(text),
            (PayloadKind::Text, other) => {
                return Err(HubError::InvalidPayload {
                    kind: self.kind,
                    reason: format!("expected a string, got {}", json_type_name(&other)),
                });
            }
            (PayloadKind::Json, value) => Payload::Json(value),
            (PayloadKind::Presence, value) => {
                let update: PresenceUpdate =
                    serde_json::from_value(value).map_err(|e| HubError::InvalidPayload {
                        kind: self.kind.clone(),
                        reason: e.to_string(),
                    })?;
                Payload::Presence(update)
            }
        };
        Ok(Envelope {
            channel: self.channel,
            operation: self.operation,
            payload,
        })
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Rendered JSON text, shared between every subscriber of one broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Arc<str>);

impl Frame {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame(Arc::from(text))
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame(Arc::from(text))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
