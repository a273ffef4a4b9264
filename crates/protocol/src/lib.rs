//! Janus gateway JSON API: request envelopes, inbound messages and protocol defaults.
//!
//! Every frame on the connection is a JSON object whose `janus` field names
//! either the request method (client → server) or the message type
//! (server → client). Inbound frames are decoded in two phases: the
//! [`Envelope`] carries the routing fields, then [`Message`] is resolved
//! from the type tag.

pub mod message;
pub mod request;

pub use {
    message::{
        AckMsg, DecodeError, DetachedMsg, Envelope, ErrorData, ErrorMsg, EventMsg, HangupMsg,
        InfoMsg, MediaMsg, Message, PluginData, PluginInfo, SlowLinkMsg, SuccessData, SuccessMsg,
        TimeoutMsg, WebRtcUpMsg, decode,
    },
    request::{Method, Request},
};

/// WebSocket subprotocol the gateway expects during the handshake.
pub const SUBPROTOCOL: &str = "janus-protocol";

/// How long a request waits for its reply.
pub const REQUEST_TIMEOUT_MS: u64 = 1_000;

/// How long the dispatcher waits on a full event queue before dropping.
pub const DELIVERY_TIMEOUT_MS: u64 = 1_000;

/// Transport-level ping interval.
pub const PING_INTERVAL_SECS: u64 = 30;

/// Session keepalive interval. The gateway reaps sessions idle for 60s.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 20;

/// How long event-continued or abandoned transactions stay registered.
pub const TRANSACTION_RETENTION_SECS: u64 = 300;

/// Upper bound on tombstones kept for evicted transactions.
pub const RETIRED_TRANSACTIONS_MAX: usize = 1_024;

/// Queue depth of a session event stream.
pub const SESSION_EVENT_CAPACITY: usize = 2;

/// Queue depth of a handle event stream.
pub const HANDLE_EVENT_CAPACITY: usize = 8;

/// Queue depth of a single transaction's reply channel.
pub const TRANSACTION_CAPACITY: usize = 4;
