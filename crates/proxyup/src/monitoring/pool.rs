use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Workers per batch
pub const MAX_CONCURRENT_WORKERS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    /// Items whose handler ran to completion, successfully or not
    pub processed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl BatchReport {
    /// Items never picked up because the batch was cancelled
    pub fn abandoned(&self) -> usize {
        self.total - self.processed
    }
}

/// Drain `items` through `workers` concurrent handlers.
///
/// Once `token` is cancelled no new item is started, but an item already in
/// a worker's hands runs to the end. Handler errors and panics are logged and
/// counted; they never stop the batch. Returns after every worker has exited.
pub async fn run_batch<T, F, Fut>(
    token: &CancellationToken,
    items: Vec<T>,
    workers: usize,
    handler: F,
) -> BatchReport
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return BatchReport { cancelled: token.is_cancelled(), ..Default::default() };
    }

    let (tx, rx) = mpsc::channel::<T>(total);
    let rx = Arc::new(Mutex::new(rx));
    let handler = Arc::new(handler);
    let processed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for worker in 0..workers.clamp(1, total) {
        let rx = rx.clone();
        let handler = handler.clone();
        let token = token.clone();
        let processed = processed.clone();
        let failed = failed.clone();

        set.spawn(async move {
            loop {
                let item = {
                    let mut rx = rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        item = rx.recv() => item,
                    }
                };
                let Some(item) = item else { break };

                match AssertUnwindSafe((*handler)(item)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        warn!(worker, "Check failed: {err:#}");
                    }
                    Err(_) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        error!(worker, "Check panicked");
                    }
                }
                processed.fetch_add(1, Ordering::Relaxed);
            }
            debug!(worker, "Worker exiting");
        });
    }

    for item in items {
        if token.is_cancelled() {
            debug!("Batch cancelled, no longer enqueueing");
            break;
        }
        if tx.send(item).await.is_err() {
            break;
        }
    }
    drop(tx);

    while let Some(joined) = set.join_next().await {
        if let Err(err) = joined {
            error!("Worker task failed: {err}");
        }
    }

    BatchReport {
        total,
        processed: processed.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
        cancelled: token.is_cancelled(),
    }
}
