use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use {
    janus_protocol::{Message, Method, Request, SESSION_EVENT_CAPACITY},
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use crate::{
    error::{Error, Result},
    events::{EventQueue, Target},
    gateway::{AckPolicy, Gateway, GatewayInner},
    handle::Handle,
    keepalive::{self, KeepAlive},
};

pub(crate) struct SessionInner {
    pub id: u64,
    gateway: Weak<GatewayInner>,
    handles: Mutex<HashMap<u64, Handle>>,
    events: EventQueue,
    /// Child of the gateway shutdown token; fires on destroy.
    pub closed: CancellationToken,
}

impl SessionInner {
    fn handles(&self) -> MutexGuard<'_, HashMap<u64, Handle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A gateway session, the container for plugin handles.
///
/// Cloning yields another reference to the same session.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(id: u64, gateway: &Arc<GatewayInner>) -> Self {
        let closed = gateway.shutdown.child_token();
        Self {
            inner: Arc::new(SessionInner {
                id,
                gateway: Arc::downgrade(gateway),
                handles: Mutex::new(HashMap::new()),
                events: EventQueue::new(SESSION_EVENT_CAPACITY, closed.clone()),
                closed,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    fn gateway(&self) -> Result<Gateway> {
        self.inner
            .gateway
            .upgrade()
            .map(Gateway::from_inner)
            .ok_or(Error::ConnectionClosed)
    }

    /// Send a request scoped to this session.
    pub async fn send(
        &self,
        mut request: Request,
        policy: AckPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        request.session_id = Some(self.inner.id);
        self.gateway()?.request(request, policy, cancel).await
    }

    /// Attach to `plugin`, e.g. `janus.plugin.echotest`.
    pub async fn attach(&self, plugin: &str) -> Result<Handle> {
        let method = Method::Attach;
        let request = Request::new(method).with("plugin", plugin);
        let reply = match self.send(request, AckPolicy::Terminal, None).await? {
            Message::Success(success) => success,
            other => return Err(Error::Unexpected { method, kind: other.kind() }),
        };
        let id = reply.created_id().ok_or(Error::MissingId { method })?;

        let handle = Handle::new(id, plugin, &self.inner);
        self.inner.handles().insert(id, handle.clone());
        info!(session_id = self.inner.id, handle_id = id, plugin, "handle attached");
        Ok(handle)
    }

    /// Reset the server's idle timer for this session.
    pub async fn keepalive(&self) -> Result<()> {
        let method = Method::Keepalive;
        match self.send(Request::new(method), AckPolicy::Terminal, None).await? {
            Message::Ack(_) | Message::Success(_) => Ok(()),
            other => Err(Error::Unexpected { method, kind: other.kind() }),
        }
    }

    /// Destroy the session on the server, then forget it locally.
    ///
    /// On success the session's and its handles' event streams end. An
    /// error reply leaves everything in place.
    pub async fn destroy(&self) -> Result<()> {
        let method = Method::Destroy;
        match self.send(Request::new(method), AckPolicy::Terminal, None).await? {
            Message::Success(_) | Message::Ack(_) => {},
            other => return Err(Error::Unexpected { method, kind: other.kind() }),
        }

        if let Ok(gateway) = self.gateway() {
            gateway.inner.lock().sessions.remove(&self.inner.id);
        }
        self.inner.handles().clear();
        self.inner.closed.cancel();
        info!(session_id = self.inner.id, "session destroyed");
        Ok(())
    }

    pub fn handle(&self, id: u64) -> Option<Handle> {
        self.inner.handles().get(&id).cloned()
    }

    /// Ids of the attached handles, in ascending order.
    pub fn handles(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.inner.handles().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Next session-level event (e.g. `timeout`). `None` once the session
    /// is destroyed or the connection is gone.
    pub async fn next_event(&self) -> Option<Message> {
        self.inner.events.next().await
    }

    /// Send `keepalive` every `keepalive_interval` until the returned guard
    /// is stopped or dropped, the session is destroyed, or a keepalive fails.
    pub fn start_keepalive(&self) -> Result<KeepAlive> {
        let interval = self.gateway()?.options().keepalive_interval;
        Ok(self.start_keepalive_every(interval))
    }

    pub fn start_keepalive_every(&self, interval: Duration) -> KeepAlive {
        let stop = self.inner.closed.child_token();
        let task = tokio::spawn(keepalive::keepalive_loop(self.clone(), interval, stop.clone()));
        KeepAlive::new(stop, task)
    }

    pub(crate) fn forget_handle(&self, id: u64) {
        self.inner.handles().remove(&id);
    }

    pub(crate) fn push_event(&self, message: Message, wait: Duration) {
        self.inner
            .events
            .push(Target::Session(self.inner.id), message, wait);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("handles", &self.handles())
            .finish()
    }
}
