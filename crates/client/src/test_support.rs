//! A scripted gateway on the far end of a memory transport.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    janus_protocol::{Message, Method},
    serde_json::{Value, json},
    tokio_util::sync::CancellationToken,
};

use crate::{
    Connection, Gateway, GatewayOptions,
    memory::{self, MemoryPeer, PeerSender},
};

const PLUGINS: [&str; 2] = ["janus.plugin.echotest", "janus.plugin.videoroom"];

#[derive(Default)]
struct FakeState {
    requests: Vec<Value>,
    sessions: HashSet<u64>,
    /// handle id -> (session id, plugin)
    handles: HashMap<u64, (u64, String)>,
    next_id: u64,
    acks_per_message: usize,
    acks_sent: usize,
    reply_delay: Duration,
}

pub(crate) struct FakeJanus {
    state: Arc<Mutex<FakeState>>,
    sender: PeerSender,
    stop: CancellationToken,
}

impl FakeJanus {
    pub fn start(options: GatewayOptions) -> (Gateway, Connection, Self) {
        let (transport, peer) = memory::pair();
        let (gateway, connection) = Gateway::with_transport(Arc::new(transport), options);

        let state = Arc::new(Mutex::new(FakeState {
            next_id: 1_000,
            acks_per_message: 1,
            ..FakeState::default()
        }));
        let fake = Self {
            state: Arc::clone(&state),
            sender: peer.sender(),
            stop: CancellationToken::new(),
        };
        tokio::spawn(respond(peer, state, fake.stop.clone()));
        (gateway, connection, fake)
    }

    /// Push an unsolicited frame to the client.
    pub fn push(&self, frame: Value) {
        assert!(self.sender.send_json(&frame));
    }

    /// Hang up on the client.
    pub fn close(&self) {
        self.stop.cancel();
    }

    pub fn last_request(&self, method: Method) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .requests
            .iter()
            .rev()
            .find(|r| r["janus"] == method.as_str())
            .cloned()
    }

    pub fn last_transaction(&self, method: Method) -> Option<String> {
        self.last_request(method)
            .and_then(|r| r["transaction"].as_str().map(str::to_owned))
    }

    pub fn count(&self, method: Method) -> usize {
        let state = self.state.lock().unwrap();
        state
            .requests
            .iter()
            .filter(|r| r["janus"] == method.as_str())
            .count()
    }

    /// Make the server forget a session, as if it had timed out.
    pub fn forget_session(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        state.sessions.remove(&id);
        state.handles.retain(|_, (session, _)| *session != id);
    }

    /// Number of acks sent ahead of each plugin event.
    pub fn set_acks(&self, n: usize) {
        self.state.lock().unwrap().acks_per_message = n;
    }

    pub fn acks_sent(&self) -> usize {
        self.state.lock().unwrap().acks_sent
    }

    /// Pause before every reply frame.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.state.lock().unwrap().reply_delay = delay;
    }
}

impl Drop for FakeJanus {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Await the next event from a stream, failing the test if none arrives.
pub(crate) async fn next_event(next: impl Future<Output = Option<Message>>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), next)
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

async fn respond(mut peer: MemoryPeer, state: Arc<Mutex<FakeState>>, stop: CancellationToken) {
    loop {
        let request = tokio::select! {
            () = stop.cancelled() => break,
            request = peer.recv_json() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let (replies, delay) = {
            let mut state = state.lock().unwrap();
            state.requests.push(request.clone());
            (reply_to(&mut state, &request), state.reply_delay)
        };
        for reply in replies {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            peer.send_json(&reply);
        }
    }
    peer.close();
}

fn error(transaction: &Value, code: i64, reason: &str) -> Value {
    json!({
        "janus": "error",
        "transaction": transaction,
        "error": {"code": code, "reason": reason},
    })
}

fn reply_to(state: &mut FakeState, request: &Value) -> Vec<Value> {
    let tx = &request["transaction"];
    let session_id = request["session_id"].as_u64().unwrap_or(0);
    let handle_id = request["handle_id"].as_u64().unwrap_or(0);
    let method = request["janus"].as_str().unwrap_or_default();

    match method {
        "info" => {
            let plugins: serde_json::Map<String, Value> = PLUGINS
                .iter()
                .map(|p| ((*p).to_owned(), json!({"name": p, "version": 1, "version_string": "0.0.1"})))
                .collect();
            return vec![json!({
                "janus": "server_info",
                "transaction": tx,
                "name": "Janus WebRTC Server",
                "version": 1400,
                "version_string": "1.4.0",
                "author": "Meetecho s.r.l.",
                "data_channels": true,
                "ipv6": false,
                "local-ip": "127.0.0.1",
                "ice-tcp": false,
                "transports": {},
                "plugins": plugins,
            })];
        },
        "create" => {
            state.next_id += 1;
            let id = state.next_id;
            state.sessions.insert(id);
            return vec![json!({"janus": "success", "transaction": tx, "data": {"id": id}})];
        },
        _ => {},
    }

    if !state.sessions.contains(&session_id) {
        return vec![error(tx, 458, &format!("No such session {session_id}"))];
    }

    match method {
        "keepalive" => vec![json!({"janus": "ack", "transaction": tx, "session_id": session_id})],
        "destroy" => {
            state.sessions.remove(&session_id);
            state.handles.retain(|_, (session, _)| *session != session_id);
            vec![json!({"janus": "success", "transaction": tx, "session_id": session_id})]
        },
        "attach" => {
            let plugin = request["plugin"].as_str().unwrap_or_default();
            if !PLUGINS.contains(&plugin) {
                return vec![error(tx, 460, &format!("No such plugin '{plugin}'"))];
            }
            state.next_id += 1;
            let id = state.next_id;
            state.handles.insert(id, (session_id, plugin.to_owned()));
            vec![json!({"janus": "success", "transaction": tx, "session_id": session_id, "data": {"id": id}})]
        },
        _ => {
            let Some((_, plugin)) = state
                .handles
                .get(&handle_id)
                .filter(|(session, _)| *session == session_id)
                .cloned()
            else {
                return vec![error(tx, 459, &format!("No such handle {handle_id} in session {session_id}"))];
            };
            handle_request(state, request, method, session_id, handle_id, &plugin)
        },
    }
}

fn handle_request(
    state: &mut FakeState,
    request: &Value,
    method: &str,
    session_id: u64,
    handle_id: u64,
    plugin: &str,
) -> Vec<Value> {
    let tx = &request["transaction"];
    match method {
        "detach" => {
            state.handles.remove(&handle_id);
            vec![json!({"janus": "success", "transaction": tx, "session_id": session_id})]
        },
        "trickle" => vec![json!({"janus": "ack", "transaction": tx, "session_id": session_id})],
        "message" if request["body"]["request"] == "list" => vec![json!({
            "janus": "success",
            "transaction": tx,
            "session_id": session_id,
            "sender": handle_id,
            "plugindata": {"plugin": plugin, "data": request["body"]},
        })],
        "message" => {
            let mut replies: Vec<Value> = (0..state.acks_per_message)
                .map(|_| json!({"janus": "ack", "transaction": tx, "session_id": session_id}))
                .collect();
            state.acks_sent += state.acks_per_message;

            let mut event = json!({
                "janus": "event",
                "transaction": tx,
                "session_id": session_id,
                "sender": handle_id,
                "plugindata": {
                    "plugin": plugin,
                    "data": {"echotest": "event", "request": request["body"]["request"], "result": "ok"},
                },
            });
            if request.get("jsep").is_some() {
                event["jsep"] = json!({"type": "answer", "sdp": "v=0"});
            }
            replies.push(event);
            replies
        },
        other => vec![error(tx, 453, &format!("Unknown request '{other}'"))],
    }
}
