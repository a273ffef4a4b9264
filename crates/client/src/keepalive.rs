//! Periodic liveness traffic: transport pings and session keepalives.

use std::{sync::Arc, time::Duration};

use {
    tokio::{
        task::JoinHandle,
        time::{self, Instant, MissedTickBehavior},
    },
    tokio_util::sync::{CancellationToken, DropGuard},
    tracing::{debug, trace, warn},
};

use crate::{error::Result, session::Session, transport::Transport};

fn ticker(period: Duration) -> time::Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Ping the transport every `period` until `shutdown` fires. A failed ping
/// ends the loop with that error.
pub(crate) async fn ping_loop(
    transport: Arc<dyn Transport>,
    period: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {},
        }
        if let Err(e) = transport.ping().await {
            warn!(error = %e, "transport ping failed");
            return Err(e);
        }
        trace!("ping sent");
    }
}

pub(crate) async fn keepalive_loop(
    session: Session,
    period: Duration,
    stop: CancellationToken,
) -> Result<()> {
    let session_id = session.id();
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => {
                debug!(session_id, "keepalive stopped");
                return Ok(());
            },
            _ = ticker.tick() => {},
        }
        if let Err(e) = session.keepalive().await {
            warn!(session_id, error = %e, "session keepalive failed");
            return Err(e);
        }
        trace!(session_id, "keepalive sent");
    }
}

/// A running session keepalive loop. Dropping it stops the loop.
pub struct KeepAlive {
    stop: CancellationToken,
    task: JoinHandle<Result<()>>,
    _guard: DropGuard,
}

impl KeepAlive {
    pub(crate) fn new(stop: CancellationToken, task: JoinHandle<Result<()>>) -> Self {
        Self {
            _guard: stop.clone().drop_guard(),
            stop,
            task,
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) -> Result<()> {
        self.stop.cancel();
        self.join().await
    }

    /// Wait for the loop to exit on its own, returning the error that ended it.
    pub async fn join(self) -> Result<()> {
        let Self { task, _guard, .. } = self;
        task.await?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
