//! Gateway: the connection root and the request/response primitive.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use {
    janus_config::GatewayConfig,
    janus_protocol::{
        DELIVERY_TIMEOUT_MS, InfoMsg, KEEPALIVE_INTERVAL_SECS, Message, Method,
        PING_INTERVAL_SECS, REQUEST_TIMEOUT_MS, Request, TRANSACTION_RETENTION_SECS,
    },
    secrecy::{ExposeSecret, Secret},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{Level, debug, info, trace},
    uuid::Uuid,
};

use crate::{
    connection::Connection,
    error::{Error, Result},
    session::Session,
    transactions::TransactionRegistry,
    transport::{Transport, WebSocketTransport},
};

/// Tunables for one gateway connection.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Shared secret added to every outgoing request.
    pub api_secret: Option<Secret<String>>,
    pub request_timeout: Duration,
    /// How long a full event queue is waited on before the event is dropped.
    pub delivery_timeout: Duration,
    pub ping_interval: Duration,
    pub keepalive_interval: Duration,
    /// How long event-continued or abandoned transactions stay routable.
    pub transaction_retention: Duration,
    /// Log every JSON message pretty-printed at `info` level.
    pub log_messages: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            api_secret: None,
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            delivery_timeout: Duration::from_millis(DELIVERY_TIMEOUT_MS),
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
            keepalive_interval: Duration::from_secs(KEEPALIVE_INTERVAL_SECS),
            transaction_retention: Duration::from_secs(TRANSACTION_RETENTION_SECS),
            log_messages: false,
        }
    }
}

impl From<&GatewayConfig> for GatewayOptions {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            api_secret: config.api_secret.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            delivery_timeout: Duration::from_millis(config.delivery_timeout_ms),
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
            transaction_retention: Duration::from_secs(config.transaction_retention_secs),
            log_messages: config.log_messages,
        }
    }
}

/// How the request primitive treats an `ack` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// The first reply of any kind answers the request.
    Terminal,
    /// `ack` only confirms receipt; keep waiting for the real answer.
    Provisional,
}

/// State shared by the dispatcher and request callers, under one lock.
pub(crate) struct GatewayState {
    pub transactions: TransactionRegistry,
    pub sessions: HashMap<u64, Session>,
}

pub(crate) struct GatewayInner {
    pub transport: Arc<dyn Transport>,
    state: Mutex<GatewayState>,
    pub options: GatewayOptions,
    /// Fires when the connection is torn down, for any reason.
    pub shutdown: CancellationToken,
}

impl GatewayInner {
    pub fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `request` and wait for its correlated reply.
    pub async fn request(
        &self,
        mut request: Request,
        policy: AckPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        let method = request.method();
        if self.shutdown.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        let id = Uuid::new_v4().to_string();
        let replies = self.lock().transactions.register(&id)?;
        let mut pending = PendingTransaction {
            inner: self,
            id,
            sent: false,
            finished: false,
        };

        request.transaction = Some(pending.id.clone());
        self.log_outgoing(&request);
        if let Some(secret) = &self.options.api_secret {
            request.apisecret = Some(secret.expose_secret().clone());
        }
        let text = serde_json::to_string(&request)?;
        self.transport.send(text).await?;
        pending.sent = true;

        let reply = self.await_reply(method, policy, cancel, replies).await?;
        pending.finish(&reply);
        match reply {
            Message::Error(error) => {
                debug!(%method, code = error.error.code, reason = %error.error.reason, "request failed");
                Err(error.into())
            },
            other => Ok(other),
        }
    }

    async fn await_reply(
        &self,
        method: Method,
        policy: AckPolicy,
        cancel: Option<&CancellationToken>,
        mut replies: mpsc::Receiver<Message>,
    ) -> Result<Message> {
        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);
        loop {
            let reply = tokio::select! {
                biased;
                reply = replies.recv() => reply.ok_or(Error::ConnectionClosed)?,
                () = cancel.cancelled() => return Err(Error::Cancelled { method }),
                () = self.shutdown.cancelled() => return Err(Error::ConnectionClosed),
                () = tokio::time::sleep(self.options.request_timeout) => {
                    return Err(Error::Timeout { method });
                },
            };
            match reply {
                Message::Ack(_) if policy == AckPolicy::Provisional => {
                    trace!(%method, "provisional ack, still waiting");
                },
                reply => return Ok(reply),
            }
        }
    }

    fn log_outgoing(&self, request: &Request) {
        if !self.options.log_messages && !tracing::enabled!(Level::TRACE) {
            return;
        }
        if let Ok(text) = serde_json::to_string(request) {
            self.log_message("tx", &text);
        }
    }

    pub fn log_message(&self, direction: &'static str, raw: &str) {
        if !self.options.log_messages {
            trace!(direction, raw);
            return;
        }
        let pretty = serde_json::from_str::<serde_json::Value>(raw)
            .and_then(|value| serde_json::to_string_pretty(&value));
        match pretty {
            Ok(pretty) => info!(direction, "\n{pretty}"),
            Err(_) => info!(direction, raw),
        }
    }
}

/// Keeps the registry consistent however the waiting caller exits.
struct PendingTransaction<'a> {
    inner: &'a GatewayInner,
    id: String,
    sent: bool,
    finished: bool,
}

impl PendingTransaction<'_> {
    fn finish(&mut self, reply: &Message) {
        let mut state = self.inner.lock();
        match reply {
            // Further frames may follow an ack; keep the id routable.
            Message::Ack(_) => state.transactions.abandon(&self.id),
            _ => state.transactions.complete(&self.id),
        }
        self.finished = true;
    }
}

impl Drop for PendingTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.inner.lock();
        if self.sent {
            debug!(transaction = %self.id, "abandoning transaction");
            state.transactions.abandon(&self.id);
        } else {
            state.transactions.remove(&self.id);
        }
    }
}

/// A connection to a Janus gateway.
///
/// Cheap to clone; every clone drives the same connection. Background work
/// runs in the [`Connection`] returned alongside it.
#[derive(Clone)]
pub struct Gateway {
    pub(crate) inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Dial `url` over WebSocket and start the background loops.
    pub async fn connect(url: &str, options: GatewayOptions) -> Result<(Self, Connection)> {
        let transport = WebSocketTransport::connect(url).await?;
        info!(url, "connected to gateway");
        Ok(Self::with_transport(Arc::new(transport), options))
    }

    /// Drive an already-open transport. Must be called inside a Tokio runtime.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        options: GatewayOptions,
    ) -> (Self, Connection) {
        let inner = Arc::new(GatewayInner {
            transport,
            state: Mutex::new(GatewayState {
                transactions: TransactionRegistry::new(options.transaction_retention),
                sessions: HashMap::new(),
            }),
            options,
            shutdown: CancellationToken::new(),
        });
        let connection = Connection::start(Arc::clone(&inner));
        (Self { inner }, connection)
    }

    pub(crate) fn from_inner(inner: Arc<GatewayInner>) -> Self {
        Self { inner }
    }

    /// Generic request/response exchange.
    ///
    /// `error` replies come back as [`Error::Server`]. Dropping the returned
    /// future abandons the transaction: a late reply is discarded.
    pub async fn request(
        &self,
        request: Request,
        policy: AckPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        self.inner.request(request, policy, cancel).await
    }

    /// Server name, version and plugin inventory.
    pub async fn info(&self) -> Result<InfoMsg> {
        let method = Method::Info;
        match self.request(Request::new(method), AckPolicy::Terminal, None).await? {
            Message::Info(info) => Ok(*info),
            other => Err(Error::Unexpected { method, kind: other.kind() }),
        }
    }

    /// Create a new session.
    pub async fn create(&self) -> Result<Session> {
        let method = Method::Create;
        let reply = match self.request(Request::new(method), AckPolicy::Terminal, None).await? {
            Message::Success(success) => success,
            other => return Err(Error::Unexpected { method, kind: other.kind() }),
        };
        let id = reply.created_id().ok_or(Error::MissingId { method })?;

        let session = Session::new(id, &self.inner);
        self.inner.lock().sessions.insert(id, session.clone());
        info!(session_id = id, "session created");
        Ok(session)
    }

    pub fn session(&self, id: u64) -> Option<Session> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    /// Ids of the live sessions, in ascending order.
    pub fn sessions(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.inner.lock().sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.inner.options
    }

    /// Tear the connection down. Pending requests fail with
    /// [`Error::ConnectionClosed`] and every event stream ends.
    pub async fn close(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        self.inner.transport.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transactions = self.inner.lock().transactions.len();
        f.debug_struct("Gateway")
            .field("sessions", &self.sessions())
            .field("transactions", &transactions)
            .field("closed", &self.is_closed())
            .finish()
    }
}
