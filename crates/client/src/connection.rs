//! Supervision of the per-connection background loops.

use std::{future::Future, sync::Arc};

use {
    tokio::task::JoinSet,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    gateway::GatewayInner,
    keepalive,
};

/// The receive loop and the transport ping loop of one gateway connection.
///
/// Both loops share one cancellation scope: whichever finishes first, for
/// any reason, cancels the other. Dropping the `Connection` tears both down.
pub struct Connection {
    tasks: JoinSet<Result<()>>,
    shutdown: CancellationToken,
    /// First loop error, kept until a `wait` call returns it.
    failure: Option<Error>,
}

impl Connection {
    pub(crate) fn start(inner: Arc<GatewayInner>) -> Self {
        let shutdown = inner.shutdown.clone();
        let mut tasks = JoinSet::new();

        tasks.spawn(supervised(shutdown.clone(), Arc::clone(&inner).receive_loop()));
        tasks.spawn(supervised(
            shutdown.clone(),
            keepalive::ping_loop(
                Arc::clone(&inner.transport),
                inner.options.ping_interval,
                shutdown.clone(),
            ),
        ));

        Self {
            tasks,
            shutdown,
            failure: None,
        }
    }

    /// Wait until both loops have exited. Returns the first error raised,
    /// or `Ok` when the connection closed cleanly.
    ///
    /// Cancel safe: an error joined by a dropped `wait` is returned by the
    /// next call.
    pub async fn wait(&mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            self.shutdown.cancel();
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(Error::from(e)),
            };
            if let Err(e) = result {
                if self.failure.is_none() {
                    self.failure = Some(e);
                } else {
                    debug!(error = %e, "suppressing secondary connection error");
                }
            }
        }
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cancel both loops. Call [`Connection::wait`] to join them.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            debug!("connection dropped while its loops were running");
        }
        self.shutdown.cancel();
    }
}

/// Run `task`, then cancel its siblings however it ended.
async fn supervised(
    shutdown: CancellationToken,
    task: impl Future<Output = Result<()>>,
) -> Result<()> {
    let _cancel_siblings = shutdown.drop_guard();
    task.await
}
