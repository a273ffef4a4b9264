//! In-process transport pair for driving the client without a network.
//!
//! The [`MemoryPeer`] plays the gateway: it reads what the client sends and
//! pushes frames back.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::sync::{Mutex, mpsc},
    tokio_util::sync::CancellationToken,
};

use crate::{
    error::{Error, Result},
    transport::Transport,
};

/// Client side of an in-memory connection.
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: CancellationToken,
    pings: Arc<AtomicU64>,
}

/// Gateway side of an in-memory connection.
pub struct MemoryPeer {
    requests: mpsc::UnboundedReceiver<String>,
    sender: PeerSender,
    closed: CancellationToken,
    pings: Arc<AtomicU64>,
}

/// Cloneable handle for pushing frames to the client.
#[derive(Clone)]
pub struct PeerSender {
    tx: mpsc::UnboundedSender<String>,
}

/// Create a connected transport/peer pair.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (to_peer, requests) = mpsc::unbounded_channel();
    let (to_client, inbound) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();
    let pings = Arc::new(AtomicU64::new(0));

    let transport = MemoryTransport {
        outbound: to_peer,
        inbound: Mutex::new(inbound),
        closed: closed.clone(),
        pings: Arc::clone(&pings),
    };
    let peer = MemoryPeer {
        requests,
        sender: PeerSender { tx: to_client },
        closed,
        pings,
    };
    (transport, peer)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, text: String) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::TransportClosed);
        }
        self.outbound.send(text).map_err(|_| Error::TransportClosed)
    }

    async fn recv(&self) -> Result<Option<String>> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Ok(None),
            frame = inbound.recv() => Ok(frame),
        }
    }

    async fn ping(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::TransportClosed);
        }
        self.pings.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

impl MemoryPeer {
    /// Next raw frame written by the client.
    pub async fn recv(&mut self) -> Option<String> {
        self.requests.recv().await
    }

    /// Next frame written by the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let raw = self.recv().await?;
        serde_json::from_str(&raw).ok()
    }

    pub fn sender(&self) -> PeerSender {
        self.sender.clone()
    }

    pub fn send(&self, text: impl Into<String>) -> bool {
        self.sender.send(text)
    }

    pub fn send_json(&self, value: &Value) -> bool {
        self.sender.send_json(value)
    }

    /// Number of transport pings the client has sent.
    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    /// Sever the connection; the client's next read sees a clean close and
    /// further writes fail.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

impl PeerSender {
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).is_ok()
    }

    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }
}
