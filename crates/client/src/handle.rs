use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use {
    janus_protocol::{EventMsg, HANDLE_EVENT_CAPACITY, Message, Method, Request, SuccessMsg},
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use crate::{
    error::{Error, Result},
    events::{EventQueue, Target},
    gateway::AckPolicy,
    session::{Session, SessionInner},
};

pub(crate) struct HandleInner {
    id: u64,
    plugin: String,
    session_id: u64,
    session: Weak<SessionInner>,
    events: EventQueue,
    closed: CancellationToken,
}

/// A plugin handle attached to a session.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    pub(crate) fn new(id: u64, plugin: &str, session: &Arc<SessionInner>) -> Self {
        let closed = session.closed.child_token();
        Self {
            inner: Arc::new(HandleInner {
                id,
                plugin: plugin.to_owned(),
                session_id: session.id,
                session: Arc::downgrade(session),
                events: EventQueue::new(HANDLE_EVENT_CAPACITY, closed.clone()),
                closed,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn plugin(&self) -> &str {
        &self.inner.plugin
    }

    pub fn session_id(&self) -> u64 {
        self.inner.session_id
    }

    fn session(&self) -> Result<Session> {
        self.inner
            .session
            .upgrade()
            .map(Session::from_inner)
            .ok_or(Error::SessionGone(self.inner.session_id))
    }

    /// Send a request scoped to this handle.
    pub async fn send(
        &self,
        mut request: Request,
        policy: AckPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        request.handle_id = Some(self.inner.id);
        self.session()?.send(request, policy, cancel).await
    }

    /// Synchronous plugin request, answered directly with `success`.
    pub async fn request(&self, body: Value) -> Result<SuccessMsg> {
        let method = Method::Message;
        let request = Request::new(method).with("body", body);
        match self.send(request, AckPolicy::Terminal, None).await? {
            Message::Success(success) => Ok(success),
            other => Err(Error::Unexpected { method, kind: other.kind() }),
        }
    }

    /// Asynchronous plugin message. The gateway acks first; the call
    /// returns the plugin's `event` reply.
    pub async fn message(&self, body: Value, jsep: Option<Value>) -> Result<EventMsg> {
        let method = Method::Message;
        let request = Request::new(method).with("body", body).with_opt("jsep", jsep);
        match self.send(request, AckPolicy::Provisional, None).await? {
            Message::Event(event) => Ok(event),
            other => Err(Error::Unexpected { method, kind: other.kind() }),
        }
    }

    /// Send one ICE candidate. A `{"completed": true}` candidate ends gathering.
    pub async fn trickle(&self, candidate: Value) -> Result<()> {
        self.send_trickle(Request::new(Method::Trickle).with("candidate", candidate))
            .await
    }

    /// Send a batch of ICE candidates in one request.
    pub async fn trickle_many(&self, candidates: Vec<Value>) -> Result<()> {
        self.send_trickle(Request::new(Method::Trickle).with("candidates", candidates))
            .await
    }

    async fn send_trickle(&self, request: Request) -> Result<()> {
        let method = Method::Trickle;
        match self.send(request, AckPolicy::Terminal, None).await? {
            Message::Ack(_) | Message::Success(_) => Ok(()),
            other => Err(Error::Unexpected { method, kind: other.kind() }),
        }
    }

    /// Detach from the plugin, then forget the handle locally.
    pub async fn detach(&self) -> Result<()> {
        let method = Method::Detach;
        match self.send(Request::new(method), AckPolicy::Terminal, None).await? {
            Message::Success(_) | Message::Ack(_) => {},
            other => return Err(Error::Unexpected { method, kind: other.kind() }),
        }

        if let Ok(session) = self.session() {
            session.forget_handle(self.inner.id);
        }
        self.inner.closed.cancel();
        info!(session_id = self.inner.session_id, handle_id = self.inner.id, "handle detached");
        Ok(())
    }

    /// Next plugin event or lifecycle notification (`webrtcup`, `media`,
    /// `hangup`, ...). `None` once detached or the session is gone.
    pub async fn next_event(&self) -> Option<Message> {
        self.inner.events.next().await
    }

    pub fn is_detached(&self) -> bool {
        self.inner.events.is_closed()
    }

    pub(crate) fn push_event(&self, message: Message, wait: Duration) {
        let target = Target::Handle {
            session: self.inner.session_id,
            handle: self.inner.id,
        };
        self.inner.events.push(target, message, wait);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("plugin", &self.inner.plugin)
            .field("session_id", &self.inner.session_id)
            .finish()
    }
}
