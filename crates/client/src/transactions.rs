//! Transaction registry: correlates outgoing requests with inbound replies.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use {
    janus_protocol::{Message, RETIRED_TRANSACTIONS_MAX, TRANSACTION_CAPACITY},
    tokio::sync::mpsc,
    tracing::debug,
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// A caller is waiting for the reply.
    Pending,
    /// Resolved by an `event` reply; later frames with this id are pushes.
    Continuation,
    /// The caller gave up (timeout, cancellation, dropped future).
    Abandoned,
}

struct Entry {
    sender: mpsc::Sender<Message>,
    state: State,
    touched_at: Instant,
}

/// What to do with an inbound frame that carries a transaction id.
#[derive(Debug)]
pub(crate) enum Route {
    /// Deliver to the waiting caller.
    Reply(mpsc::Sender<Message>),
    /// Treat as an unsolicited push for the originating handle.
    Push,
    /// Late reply nobody is waiting for; drop it.
    Discard,
    /// The id was never issued by this client.
    Unknown,
}

/// Pending transactions keyed by id.
///
/// `Pending` entries are removed by their caller once a terminal reply has
/// been consumed. `Continuation` and `Abandoned` entries have no caller
/// left to remove them, so they are evicted once older than the retention
/// window. Evicted ids leave a tombstone, bounded in number, so a straggler
/// frame is still routed deterministically instead of looking unmatched.
pub(crate) struct TransactionRegistry {
    entries: HashMap<String, Entry>,
    retired: HashMap<String, bool>,
    retired_order: VecDeque<String>,
    retention: Duration,
    max_retired: usize,
}

impl TransactionRegistry {
    pub fn new(retention: Duration) -> Self {
        Self::with_limits(retention, RETIRED_TRANSACTIONS_MAX)
    }

    pub fn with_limits(retention: Duration, max_retired: usize) -> Self {
        Self {
            entries: HashMap::new(),
            retired: HashMap::new(),
            retired_order: VecDeque::new(),
            retention,
            max_retired,
        }
    }

    /// Register `id` and return the channel its replies arrive on.
    pub fn register(&mut self, id: &str) -> Result<mpsc::Receiver<Message>> {
        self.evict_expired();
        if self.entries.contains_key(id) || self.retired.contains_key(id) {
            return Err(Error::DuplicateTransaction(id.to_string()));
        }

        let (sender, receiver) = mpsc::channel(TRANSACTION_CAPACITY);
        self.entries.insert(id.to_string(), Entry {
            sender,
            state: State::Pending,
            touched_at: Instant::now(),
        });
        Ok(receiver)
    }

    /// Delivery channel for `id`, if it is still registered.
    pub fn lookup(&self, id: &str) -> Option<mpsc::Sender<Message>> {
        self.entries.get(id).map(|e| e.sender.clone())
    }

    /// Whether `id` was already resolved by an event reply.
    pub fn is_consumed(&self, id: &str) -> bool {
        match self.entries.get(id) {
            Some(entry) => entry.state == State::Continuation,
            None => self.retired.get(id).copied().unwrap_or(false),
        }
    }

    /// Keep `id` registered so later pushes that reuse it are routed as events.
    pub fn mark_consumed(&mut self, id: &str) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.state = State::Continuation;
            entry.touched_at = Instant::now();
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// The caller consumed a terminal reply.
    pub fn complete(&mut self, id: &str) {
        if self
            .entries
            .get(id)
            .is_some_and(|e| e.state == State::Pending)
        {
            self.entries.remove(id);
        }
    }

    /// The caller stopped waiting before a terminal reply arrived.
    pub fn abandon(&mut self, id: &str) {
        if let Some(entry) = self.entries.get_mut(id)
            && entry.state == State::Pending
        {
            entry.state = State::Abandoned;
            entry.touched_at = Instant::now();
        }
    }

    /// Decide where an inbound frame carrying `id` goes.
    pub fn route(&mut self, id: &str, is_event: bool) -> Route {
        if self.is_consumed(id) {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.touched_at = Instant::now();
            }
            return Route::Push;
        }

        let Some(state) = self.entries.get(id).map(|e| e.state) else {
            return if self.retired.contains_key(id) {
                Route::Discard
            } else {
                Route::Unknown
            };
        };

        if is_event {
            self.mark_consumed(id);
        }
        match state {
            State::Abandoned if is_event => Route::Push,
            State::Abandoned => Route::Discard,
            _ => self.lookup(id).map_or(Route::Unknown, Route::Reply),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn evict_expired(&mut self) {
        let retention = self.retention;
        let expired: Vec<(String, bool)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state != State::Pending && e.touched_at.elapsed() >= retention)
            .map(|(id, e)| (id.clone(), e.state == State::Continuation))
            .collect();

        for (id, push) in expired {
            self.entries.remove(&id);
            debug!(transaction = %id, push, "evicting retained transaction");
            self.retire(id, push);
        }
    }

    fn retire(&mut self, id: String, push: bool) {
        if self.max_retired == 0 {
            return;
        }
        while self.retired_order.len() >= self.max_retired {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
        self.retired.insert(id.clone(), push);
        self.retired_order.push_back(id);
    }
}

#[cfg(test)]
mod tests {
    use {super::*, janus_protocol::AckMsg};

    fn registry() -> TransactionRegistry {
        TransactionRegistry::new(Duration::from_secs(300))
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut reg = registry();
        let _rx = reg.register("a").unwrap();
        assert!(matches!(
            reg.register("a"),
            Err(Error::DuplicateTransaction(id)) if id == "a"
        ));
        let _rx = reg.register("b").unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn lookups_never_collide() {
        let mut reg = registry();
        let ids: Vec<String> = (0..100).map(|_| uuid::Uuid::new_v4().to_string()).collect();
        let mut receivers: Vec<_> = ids.iter().map(|id| reg.register(id).unwrap()).collect();

        for (i, id) in ids.iter().enumerate() {
            let tx = reg.lookup(id).unwrap();
            tx.try_send(Message::Ack(AckMsg {
                hint: Some(i.to_string()),
                session_id: 0,
            }))
            .unwrap();
        }
        for (i, rx) in receivers.iter_mut().enumerate() {
            let Ok(Message::Ack(ack)) = rx.try_recv() else {
                panic!("missing reply for {i}");
            };
            assert_eq!(ack.hint, Some(i.to_string()));
        }
    }

    #[test]
    fn terminal_reply_is_removed_on_completion() {
        let mut reg = registry();
        let _rx = reg.register("t").unwrap();
        assert!(matches!(reg.route("t", false), Route::Reply(_)));
        assert!(!reg.is_consumed("t"));
        reg.complete("t");
        assert!(reg.lookup("t").is_none());
        assert!(matches!(reg.route("t", false), Route::Unknown));
    }

    #[test]
    fn event_reply_keeps_transaction_for_pushes() {
        let mut reg = registry();
        let _rx = reg.register("t").unwrap();
        assert!(matches!(reg.route("t", true), Route::Reply(_)));
        assert!(reg.is_consumed("t"));

        reg.complete("t");
        assert!(reg.lookup("t").is_some());
        assert!(matches!(reg.route("t", true), Route::Push));
        assert!(matches!(reg.route("t", false), Route::Push));
    }

    #[test]
    fn mark_consumed_turns_replies_into_pushes() {
        let mut reg = registry();
        let _rx = reg.register("t").unwrap();
        reg.mark_consumed("t");
        assert!(matches!(reg.route("t", false), Route::Push));
    }

    #[test]
    fn abandoned_transaction_discards_late_replies() {
        let mut reg = registry();
        let rx = reg.register("t").unwrap();
        drop(rx);
        reg.abandon("t");

        assert!(matches!(reg.route("t", false), Route::Discard));
        // A late event still belongs to the handle.
        assert!(matches!(reg.route("t", true), Route::Push));
        assert!(reg.is_consumed("t"));
    }

    #[test]
    fn abandon_does_not_downgrade_continuation() {
        let mut reg = registry();
        let _rx = reg.register("t").unwrap();
        let _ = reg.route("t", true);
        reg.abandon("t");
        assert!(matches!(reg.route("t", false), Route::Push));
    }

    #[test]
    fn expired_entries_leave_tombstones() {
        let mut reg = TransactionRegistry::with_limits(Duration::ZERO, 8);
        let _a = reg.register("cont").unwrap();
        let _ = reg.route("cont", true);
        let _b = reg.register("gone").unwrap();
        reg.abandon("gone");
        let _c = reg.register("live").unwrap();

        // Every registration sweeps whatever is no longer pending.
        let _d = reg.register("next").unwrap();
        assert_eq!(reg.len(), 2);
        assert!(reg.lookup("cont").is_none());
        assert!(matches!(reg.route("cont", true), Route::Push));
        assert!(matches!(reg.route("gone", false), Route::Discard));
        assert!(matches!(reg.route("live", false), Route::Reply(_)));
        assert!(matches!(reg.register("cont"), Err(Error::DuplicateTransaction(_))));
    }

    #[test]
    fn tombstones_are_bounded() {
        let mut reg = TransactionRegistry::with_limits(Duration::ZERO, 2);
        for id in ["a", "b", "c"] {
            let _rx = reg.register(id).unwrap();
            reg.abandon(id);
        }
        let _rx = reg.register("d").unwrap();
        // "a" was retired first and pushed out by "c".
        assert!(matches!(reg.route("a", false), Route::Unknown));
        assert!(matches!(reg.route("b", false), Route::Discard));
        assert!(matches!(reg.route("c", false), Route::Discard));
    }

    #[test]
    fn pending_entries_never_expire() {
        let mut reg = TransactionRegistry::with_limits(Duration::ZERO, 8);
        let _a = reg.register("waiting").unwrap();
        let _b = reg.register("other").unwrap();
        assert!(reg.lookup("waiting").is_some());
        assert!(matches!(reg.route("waiting", false), Route::Reply(_)));
    }
}
