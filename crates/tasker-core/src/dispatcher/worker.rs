use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::Dispatcher;
use crate::error::TaskerError;

/// Worker group handle.
/// - `request_shutdown()` stops new leases
/// - `shutdown_and_join()` waits out the grace period, then cancels the rest
pub struct WorkerGroup {
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    hard_cancel: CancellationToken,
    workers: JoinSet<()>,
}

impl WorkerGroup {
    pub(super) fn spawn(dispatcher: Arc<Dispatcher>) -> Self {
        let shutdown = CancellationToken::new();
        let hard_cancel = CancellationToken::new();

        let mut workers = JoinSet::new();
        for worker_id in 0..dispatcher.config.concurrency {
            let d = Arc::clone(&dispatcher);
            let shutdown = shutdown.clone();
            let hard_cancel = hard_cancel.clone();
            workers.spawn(async move {
                worker_loop(worker_id, d, shutdown, hard_cancel).await;
            });
        }

        Self {
            dispatcher,
            shutdown,
            hard_cancel,
            workers,
        }
    }

    /// Stop taking new leases. In-flight handlers keep running.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stop leasing, wait up to the grace period, cancel whatever is still
    /// running, then close the broker.
    pub async fn shutdown_and_join(mut self) -> Result<(), TaskerError> {
        self.request_shutdown();
        let grace = self.dispatcher.config.shutdown_grace;

        let drained = tokio::time::timeout(grace, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                ?grace,
                remaining = self.workers.len(),
                "grace period elapsed, cancelling in-flight tasks"
            );
            self.hard_cancel.cancel();
            while let Some(joined) = self.workers.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "worker terminated abnormally");
                }
            }
        }

        self.dispatcher.broker.close().await?;
        tracing::info!("dispatcher stopped");
        Ok(())
    }
}

async fn worker_loop(
    worker_id: usize,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    hard_cancel: CancellationToken,
) {
    tracing::debug!(worker_id, "worker started");
    let poll_interval = dispatcher.config.poll_interval;

    while !shutdown.is_cancelled() {
        // never select! over the lease call: dropping it midway strands a lease
        let idle = match dispatcher.process_next(&hard_cancel).await {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "lease failed");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}
