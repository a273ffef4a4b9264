//! Async client for the Janus WebRTC gateway.
//!
//! One [`Gateway`] multiplexes every request and event over a single
//! WebSocket. Requests are tagged with a fresh transaction id and resolved
//! by the receive loop; unsolicited events are routed to the owning
//! [`Session`] or [`Handle`] event stream.
//!
//! ```no_run
//! # async fn run() -> janus_client::Result<()> {
//! use janus_client::{Gateway, GatewayOptions};
//!
//! let (gateway, mut connection) =
//!     Gateway::connect("ws://127.0.0.1:8188", GatewayOptions::default()).await?;
//! let session = gateway.create().await?;
//! let handle = session.attach("janus.plugin.echotest").await?;
//! let event = handle.message(serde_json::json!({"audio": true}), None).await?;
//! println!("{:?}", event.plugindata);
//! session.destroy().await?;
//! gateway.close().await?;
//! connection.wait().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod dispatch;
mod error;
mod events;
mod gateway;
mod handle;
mod keepalive;
pub mod memory;
mod session;
mod transactions;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use {
    connection::Connection,
    error::{Error, Result},
    gateway::{AckPolicy, Gateway, GatewayOptions},
    handle::Handle,
    janus_protocol as protocol,
    keepalive::KeepAlive,
    session::Session,
    transport::{Transport, WebSocketTransport},
};
