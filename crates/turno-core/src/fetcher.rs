//! Per-queue fetch loop feeding a worker pool.
//!
//! A slot is reserved before the blocking dequeue is issued, so a payload is
//! never held in process memory waiting for capacity. Backend failures back
//! off exponentially from 1s to 30s; an empty queue just loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::Store;
use crate::worker::WorkerPool;

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// How long a quiesced fetcher parks between shutdown checks.
const QUIET_PAUSE: Duration = Duration::from_millis(100);

pub(crate) struct Fetcher {
    queue: String,
    inflight_key: String,
    store: Arc<dyn Store>,
    pool: Arc<WorkerPool>,
    quiet: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl Fetcher {
    pub(crate) fn new(
        queue: String,
        inflight_key: String,
        store: Arc<dyn Store>,
        pool: Arc<WorkerPool>,
        quiet: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            inflight_key,
            store,
            pool,
            quiet,
            shutdown,
        }
    }

    pub(crate) async fn run(self) {
        info!(queue = %self.queue, "fetcher started");
        let mut backoff = BACKOFF_INITIAL;
        while !self.shutdown.is_cancelled() {
            if self.quiet.load(Ordering::Relaxed) {
                // Quiesced: no new dequeues; running handlers drain on their own.
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(QUIET_PAUSE) => continue,
                }
            }

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.pool.acquire_slot() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self
                .store
                .dequeue_message(&self.queue, &self.inflight_key, DEQUEUE_TIMEOUT)
                .await
            {
                Ok(payload) => {
                    backoff = BACKOFF_INITIAL;
                    self.pool.spawn(payload, permit);
                }
                Err(StoreError::Empty) => {
                    backoff = BACKOFF_INITIAL;
                    drop(permit);
                }
                Err(e) => {
                    drop(permit);
                    warn!(
                        queue = %self.queue,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "dequeue failed, backing off"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
        info!(queue = %self.queue, "fetcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::store::MemoryStore;
    use crate::worker::RunningSet;
    use std::sync::atomic::AtomicUsize;

    fn spawn_fetcher(
        store: Arc<MemoryStore>,
        chain: crate::middleware::JobFn,
        concurrency: usize,
        quiet: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let pool = Arc::new(WorkerPool::new(
            "q".to_string(),
            chain,
            store.clone(),
            "inflight".to_string(),
            concurrency,
            Arc::new(RunningSet::default()),
            tracing::Span::none(),
        ));
        let fetcher = Fetcher::new(
            "q".to_string(),
            "inflight".to_string(),
            store,
            pool,
            quiet,
            shutdown,
        );
        tokio::spawn(fetcher.run())
    }

    #[tokio::test]
    async fn fetches_and_processes_until_cancelled() {
        let store = Arc::new(MemoryStore::new(""));
        let seen = Arc::new(AtomicUsize::new(0));
        let chain = {
            let seen = seen.clone();
            handler_fn(move |_msg| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        for i in 0..3 {
            store
                .enqueue_message_now("q", &format!(r#"{{"class":"C","queue":"q","i":{i}}}"#))
                .await
                .unwrap();
        }

        let shutdown = CancellationToken::new();
        let handle = spawn_fetcher(
            store.clone(),
            chain,
            2,
            Arc::new(AtomicBool::new(false)),
            shutdown.clone(),
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn quiet_fetcher_stops_admitting_work() {
        let store = Arc::new(MemoryStore::new(""));
        let seen = Arc::new(AtomicUsize::new(0));
        let chain = {
            let seen = seen.clone();
            handler_fn(move |_msg| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let quiet = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();
        let handle = spawn_fetcher(store.clone(), chain, 1, quiet, shutdown.clone());

        store
            .enqueue_message_now("q", r#"{"class":"C","queue":"q"}"#)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(store.queue_entries("q").len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
