//! Receive loop: reads every inbound frame and routes it.

use std::sync::Arc;

use {
    janus_protocol::{Envelope, Message, decode},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    events::{Target, deliver},
    gateway::GatewayInner,
    transactions::Route,
};

impl GatewayInner {
    /// Read and dispatch until the peer closes, a fatal fault occurs or the
    /// connection is shut down. On exit every event stream is closed.
    pub(crate) async fn receive_loop(self: Arc<Self>) -> Result<()> {
        let result = self.read_messages().await;
        match &result {
            Ok(()) => info!("receive loop finished"),
            Err(e) => warn!(error = %e, "receive loop failed"),
        }
        self.shutdown.cancel();
        result
    }

    async fn read_messages(&self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Ok(()),
                frame = self.transport.recv() => frame?,
            };
            let Some(raw) = frame else {
                debug!("gateway closed the connection");
                return Ok(());
            };
            self.dispatch(&raw)?;
        }
    }

    /// Route one inbound frame. Errors are fatal to the connection.
    pub(crate) fn dispatch(&self, raw: &str) -> Result<()> {
        self.log_message("rx", raw);

        let (envelope, message) = decode(raw)?;
        let Some(message) = message else {
            warn!(kind = %envelope.janus, "skipping message of unknown type");
            return Ok(());
        };

        let Some(id) = envelope.transaction() else {
            self.push_event(&envelope, message);
            return Ok(());
        };

        let route = self.lock().transactions.route(id, message.is_event());
        match route {
            Route::Reply(sender) => deliver(
                Target::Transaction(id.to_owned()),
                sender,
                message,
                self.options.delivery_timeout,
            ),
            Route::Push => self.push_event(&envelope, message),
            Route::Discard => {
                debug!(transaction = id, kind = message.kind(), "discarding late reply");
            },
            Route::Unknown => return Err(Error::UnknownTransaction(id.to_owned())),
        }
        Ok(())
    }

    /// Deliver an unsolicited message to the handle named by `sender`, or to
    /// the session itself when no handle is named.
    fn push_event(&self, envelope: &Envelope, message: Message) {
        let wait = self.options.delivery_timeout;
        let session = self.lock().sessions.get(&envelope.session_id).cloned();
        let Some(session) = session else {
            debug!(
                session_id = envelope.session_id,
                kind = message.kind(),
                "no session for event, dropping"
            );
            return;
        };

        if envelope.sender == 0 {
            session.push_event(message, wait);
            return;
        }
        match session.handle(envelope.sender) {
            Some(handle) => handle.push_event(message, wait),
            None => debug!(
                session_id = envelope.session_id,
                handle_id = envelope.sender,
                kind = message.kind(),
                "no handle for event, dropping"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            Gateway, GatewayOptions, memory,
            test_support::{FakeJanus, next_event},
        },
        janus_protocol::{DecodeError, Method},
        rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom},
        serde_json::json,
    };

    #[tokio::test]
    async fn unknown_type_is_skipped() {
        let (gateway, _conn, fake) = FakeJanus::start(GatewayOptions::default());
        fake.push(json!({"janus": "mystery", "session_id": 1}));
        assert!(gateway.info().await.is_ok());
        assert!(!gateway.is_closed());
    }

    #[tokio::test]
    async fn malformed_envelope_is_fatal() {
        let (transport, peer) = memory::pair();
        let (gateway, mut conn) =
            Gateway::with_transport(Arc::new(transport), GatewayOptions::default());
        peer.send(r#"{"janus": 7}"#);

        assert!(matches!(
            conn.wait().await,
            Err(Error::Decode(DecodeError::Envelope(_)))
        ));
        assert!(gateway.is_closed());
    }

    #[tokio::test]
    async fn malformed_payload_of_known_type_is_fatal() {
        let (transport, peer) = memory::pair();
        let (_gateway, mut conn) =
            Gateway::with_transport(Arc::new(transport), GatewayOptions::default());
        peer.send(r#"{"janus": "error", "error": "nope"}"#);

        assert!(matches!(
            conn.wait().await,
            Err(Error::Decode(DecodeError::Payload { kind: "error", .. }))
        ));
    }

    #[tokio::test]
    async fn reply_for_unknown_transaction_is_fatal() {
        let (transport, peer) = memory::pair();
        let (gateway, mut conn) =
            Gateway::with_transport(Arc::new(transport), GatewayOptions::default());
        peer.send_json(&json!({"janus": "success", "transaction": "nope", "data": {"id": 1}}));

        assert!(matches!(conn.wait().await, Err(Error::UnknownTransaction(id)) if id == "nope"));
        assert!(matches!(gateway.info().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn events_for_unknown_targets_are_dropped() {
        let (gateway, _conn, fake) = FakeJanus::start(GatewayOptions::default());
        let session = gateway.create().await.unwrap();
        let handle = session.attach("janus.plugin.echotest").await.unwrap();

        fake.push(json!({"janus": "webrtcup", "session_id": 999, "sender": handle.id()}));
        fake.push(json!({"janus": "hangup", "session_id": session.id(), "sender": 999}));
        fake.push(json!({"janus": "media", "session_id": session.id(), "sender": handle.id(), "type": "audio", "receiving": true}));

        let Message::Media(media) = next_event(handle.next_event()).await else {
            panic!("expected media event");
        };
        assert_eq!(media.media_type, "audio");
        assert!(!gateway.is_closed());
    }

    #[tokio::test]
    async fn session_level_push_reaches_the_session() {
        let (gateway, _conn, fake) = FakeJanus::start(GatewayOptions::default());
        let session = gateway.create().await.unwrap();

        fake.push(json!({"janus": "timeout", "session_id": session.id()}));
        let event = next_event(session.next_event()).await;
        assert!(matches!(event, Message::Timeout(t) if t.session_id == session.id()));
    }

    #[tokio::test]
    async fn pushes_reusing_a_continued_transaction_reach_the_handle() {
        let (gateway, _conn, fake) = FakeJanus::start(GatewayOptions::default());
        let session = gateway.create().await.unwrap();
        let handle = session.attach("janus.plugin.echotest").await.unwrap();

        let event = handle.message(json!({"request": "start"}), None).await.unwrap();
        let transaction = fake.last_transaction(Method::Message).unwrap();
        assert_eq!(event.plugindata.plugin, "janus.plugin.echotest");

        fake.push(json!({
            "janus": "event",
            "transaction": transaction,
            "session_id": session.id(),
            "sender": handle.id(),
            "plugindata": {"plugin": "janus.plugin.echotest", "data": {"result": "done"}},
        }));
        let Message::Event(push) = next_event(handle.next_event()).await else {
            panic!("expected event push");
        };
        assert_eq!(push.plugindata.data["result"], "done");
        assert!(!gateway.is_closed());
    }

    #[tokio::test]
    async fn closing_the_connection_ends_event_streams() {
        let (gateway, mut conn, fake) = FakeJanus::start(GatewayOptions::default());
        let session = gateway.create().await.unwrap();
        let handle = session.attach("janus.plugin.echotest").await.unwrap();

        fake.close();
        tokio_test::assert_ok!(conn.wait().await);
        assert!(session.next_event().await.is_none());
        assert!(handle.next_event().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_pushes_never_cross_handles() {
        const ROUNDS: usize = 10_000;

        let options = GatewayOptions {
            delivery_timeout: std::time::Duration::from_secs(30),
            ..GatewayOptions::default()
        };
        let (gateway, _conn, fake) = FakeJanus::start(options);
        let mut handles = Vec::new();
        for _ in 0..2 {
            let session = gateway.create().await.unwrap();
            for _ in 0..2 {
                handles.push(session.attach("janus.plugin.echotest").await.unwrap());
            }
        }

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut schedule: Vec<usize> = (0..ROUNDS).map(|i| i % handles.len()).collect();
        schedule.shuffle(&mut rng);

        let readers: Vec<_> = handles
            .iter()
            .enumerate()
            .map(|(index, handle)| {
                let handle = handle.clone();
                let expected: Vec<u64> = schedule
                    .iter()
                    .enumerate()
                    .filter(|&(_, &target)| target == index)
                    .map(|(seq, _)| seq as u64)
                    .collect();
                tokio::spawn(async move {
                    let mut seen = Vec::with_capacity(expected.len());
                    while seen.len() < expected.len() {
                        let Some(Message::Event(event)) = handle.next_event().await else {
                            panic!("stream ended early");
                        };
                        assert_eq!(event.sender, handle.id());
                        assert_eq!(event.session_id, handle.session_id());
                        assert_eq!(event.plugindata.data["handle"], handle.id());
                        seen.push(event.plugindata.data["seq"].as_u64().unwrap());
                    }
                    // A full queue hands off on a separate task, so only the
                    // set of events is guaranteed, not their order.
                    seen.sort_unstable();
                    assert_eq!(seen, expected);
                })
            })
            .collect();

        for (seq, &target) in schedule.iter().enumerate() {
            let handle = &handles[target];
            let transaction = if rng.random_range(0..4) == 0 { json!("") } else { json!(null) };
            fake.push(json!({
                "janus": "event",
                "transaction": transaction,
                "session_id": handle.session_id(),
                "sender": handle.id(),
                "plugindata": {"plugin": "janus.plugin.echotest", "data": {"handle": handle.id(), "seq": seq}},
            }));
        }

        for reader in readers {
            reader.await.unwrap();
        }
    }
}
