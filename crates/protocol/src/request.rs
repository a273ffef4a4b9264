use std::fmt;

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Request kinds understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Info,
    Create,
    Attach,
    Keepalive,
    Destroy,
    Message,
    Trickle,
    Detach,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Create => "create",
            Self::Attach => "attach",
            Self::Keepalive => "keepalive",
            Self::Destroy => "destroy",
            Self::Message => "message",
            Self::Trickle => "trickle",
            Self::Detach => "detach",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outgoing request envelope.
///
/// `transaction` and `apisecret` are filled in by the client right before
/// the frame is written; `session_id` / `handle_id` by the hierarchy node
/// the request is sent through. Method-specific fields (`plugin`, `body`,
/// `jsep`, `candidate`, `candidates`) live in `fields` and are flattened
/// into the top-level object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub janus: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apisecret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<u64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Request {
    pub fn new(method: Method) -> Self {
        Self {
            janus: method,
            transaction: None,
            apisecret: None,
            session_id: None,
            handle_id: None,
            fields: Map::new(),
        }
    }

    /// Add a method-specific field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Add a field only when a value is present.
    pub fn with_opt(self, key: &str, value: Option<Value>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn method(&self) -> Method {
        self.janus
    }
}
