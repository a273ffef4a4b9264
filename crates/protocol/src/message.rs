//! Inbound messages (server → client).

use std::{collections::BTreeMap, fmt};

use {
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::{Map, Value},
};

// ── Decode errors ───────────────────────────────────────────────────────────

/// Failure to decode an inbound frame.
///
/// Both variants are protocol violations: an unrecognized type tag is not
/// an error and [`decode`] reports it with no message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not a JSON object with the common routing fields.
    #[error("malformed message envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The type tag is known but the body does not match it.
    #[error("malformed '{kind}' message: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

// ── Envelope ────────────────────────────────────────────────────────────────

/// Routing fields shared by every inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag.
    pub janus: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default)]
    pub session_id: u64,
    /// Handle id of the plugin instance that emitted the message.
    #[serde(default)]
    pub sender: u64,
}

impl Envelope {
    /// Transaction id, with the empty string treated as absent.
    pub fn transaction(&self) -> Option<&str> {
        self.transaction.as_deref().filter(|t| !t.is_empty())
    }
}

// ── Payloads ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// Plugin-specific payload, passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SuccessData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugindata: Option<PluginData>,
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub sender: u64,
}

impl SuccessMsg {
    /// Id of the resource created by `create` / `attach`.
    pub fn created_id(&self) -> Option<u64> {
        self.data.as_ref().and_then(|d| d.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i64,
    #[serde(default)]
    pub reason: String,
}

impl fmt::Display for ErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub error: ErrorData,
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub sender: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub session_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMsg {
    #[serde(default)]
    pub plugindata: PluginData,
    /// SDP offer/answer attached by the plugin, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsep: Option<Value>,
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub sender: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version_string: String,
    #[serde(default)]
    pub version: i64,
}

/// Server capability snapshot returned by `info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoMsg {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub version_string: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub data_channels: bool,
    #[serde(default)]
    pub ipv6: bool,
    #[serde(default, rename = "local-ip")]
    pub local_ip: String,
    #[serde(default, rename = "ice-tcp")]
    pub ice_tcp: bool,
    #[serde(default)]
    pub transports: BTreeMap<String, PluginInfo>,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginInfo>,
    /// Fields this client has no typed slot for.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedMsg {
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub sender: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebRtcUpMsg {
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub sender: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMsg {
    #[serde(default, rename = "type")]
    pub media_type: String,
    #[serde(default)]
    pub receiving: bool,
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub sender: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangupMsg {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub sender: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowLinkMsg {
    #[serde(default)]
    pub uplink: bool,
    #[serde(default)]
    pub lost: i64,
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub sender: u64,
}

/// The gateway reaped the session for lack of keepalives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutMsg {
    #[serde(default)]
    pub session_id: u64,
}

// ── Message union ───────────────────────────────────────────────────────────

/// A fully decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Success(SuccessMsg),
    Error(ErrorMsg),
    Ack(AckMsg),
    Event(EventMsg),
    Info(Box<InfoMsg>),
    Detached(DetachedMsg),
    WebRtcUp(WebRtcUpMsg),
    Media(MediaMsg),
    Hangup(HangupMsg),
    SlowLink(SlowLinkMsg),
    Timeout(TimeoutMsg),
}

impl Message {
    /// Resolve the typed message for `tag`. Unknown tags yield `Ok(None)`.
    pub fn from_tag(tag: &str, raw: &str) -> Result<Option<Self>, DecodeError> {
        let message = match tag {
            "success" => Self::Success(parse("success", raw)?),
            "error" => Self::Error(parse("error", raw)?),
            "ack" => Self::Ack(parse("ack", raw)?),
            "event" => Self::Event(parse("event", raw)?),
            "server_info" | "info" => Self::Info(Box::new(parse("server_info", raw)?)),
            "detached" => Self::Detached(parse("detached", raw)?),
            "webrtcup" => Self::WebRtcUp(parse("webrtcup", raw)?),
            "media" => Self::Media(parse("media", raw)?),
            "hangup" => Self::Hangup(parse("hangup", raw)?),
            "slowlink" => Self::SlowLink(parse("slowlink", raw)?),
            "timeout" => Self::Timeout(parse("timeout", raw)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// Wire type tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Error(_) => "error",
            Self::Ack(_) => "ack",
            Self::Event(_) => "event",
            Self::Info(_) => "server_info",
            Self::Detached(_) => "detached",
            Self::WebRtcUp(_) => "webrtcup",
            Self::Media(_) => "media",
            Self::Hangup(_) => "hangup",
            Self::SlowLink(_) => "slowlink",
            Self::Timeout(_) => "timeout",
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }
}

fn parse<T: DeserializeOwned>(kind: &'static str, raw: &str) -> Result<T, DecodeError> {
    serde_json::from_str(raw).map_err(|source| DecodeError::Payload { kind, source })
}

/// Two-phase decode of one inbound frame.
///
/// The envelope is returned even when the type tag is not one this client
/// knows; the message is `None` in that case.
pub fn decode(raw: &str) -> Result<(Envelope, Option<Message>), DecodeError> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(DecodeError::Envelope)?;
    let message = Message::from_tag(&envelope.janus, raw)?;
    Ok((envelope, message))
}
