//! Bounded hand-off of inbound messages to their consumers.

use std::{fmt, time::Duration};

use {
    janus_protocol::Message,
    tokio::sync::{Mutex, mpsc, mpsc::error::TrySendError},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

/// Where a message is headed, for diagnostics.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Transaction(String),
    Session(u64),
    Handle { session: u64, handle: u64 },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction(id) => write!(f, "transaction {id}"),
            Self::Session(id) => write!(f, "session {id}"),
            Self::Handle { session, handle } => write!(f, "handle {session}/{handle}"),
        }
    }
}

/// Hand `message` to `sender` without ever blocking the caller.
///
/// The message is queued immediately when there is room, which keeps
/// transport order for consumers that keep up. A full queue is retried on a
/// detached task for at most `wait`, after which the message is dropped.
pub(crate) fn deliver(
    target: Target,
    sender: mpsc::Sender<Message>,
    message: Message,
    wait: Duration,
) {
    match sender.try_send(message) {
        Ok(()) => {},
        Err(TrySendError::Closed(message)) => {
            debug!(%target, kind = message.kind(), "no receiver, dropping message");
        },
        Err(TrySendError::Full(message)) => {
            tokio::spawn(async move {
                if let Err(e) = sender.send_timeout(message, wait).await {
                    warn!(%target, error = %e, "no reader, discarded message");
                }
            });
        },
    }
}

/// Event stream owned by a session or handle.
///
/// The stream ends when `closed` fires, which happens on teardown of the
/// owner or of anything above it in the hierarchy.
pub(crate) struct EventQueue {
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
    closed: CancellationToken,
}

impl EventQueue {
    pub fn new(capacity: usize, closed: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            closed,
        }
    }

    pub fn push(&self, target: Target, message: Message, wait: Duration) {
        if self.closed.is_cancelled() {
            debug!(%target, kind = message.kind(), "event stream closed, dropping message");
            return;
        }
        deliver(target, self.tx.clone(), message, wait);
    }

    /// Next queued event; `None` once the stream is closed and drained.
    pub async fn next(&self) -> Option<Message> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            message = rx.recv() => message,
            () = self.closed.cancelled() => rx.try_recv().ok(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
