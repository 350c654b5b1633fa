//! Bounded concurrent execution of the wrapped job chain for one queue.
//!
//! Slots are semaphore permits: the fetcher acquires one before dequeuing,
//! and the permit travels into the spawned task so draining the pool is
//! "re-acquire every permit". A slot survives anything a job can throw at
//! it — panics are recovered inside the chain's terminal adapter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::{error, warn, Instrument, Span};

use crate::message::{now_epoch_seconds, Msg};
use crate::middleware::JobFn;
use crate::stats::JobOutcome;
use crate::store::Store;

pub(crate) struct WorkerPool {
    queue: String,
    chain: JobFn,
    store: Arc<dyn Store>,
    inflight_key: String,
    slots: Arc<Semaphore>,
    concurrency: usize,
    running: Arc<RunningSet>,
    /// Process span job tasks run inside; `tokio::spawn` severs the caller's
    /// span context, so it is re-attached here.
    span: Span,
}

impl WorkerPool {
    pub(crate) fn new(
        queue: String,
        chain: JobFn,
        store: Arc<dyn Store>,
        inflight_key: String,
        concurrency: usize,
        running: Arc<RunningSet>,
        span: Span,
    ) -> Self {
        Self {
            queue,
            chain,
            store,
            inflight_key,
            slots: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            running,
            span,
        }
    }

    /// Wait for a free worker slot.
    pub(crate) async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.slots.clone().acquire_owned().await
    }

    /// Hand a dequeued payload to a worker slot. The permit is released when
    /// the job (and its in-flight ack) completes.
    pub(crate) fn spawn(&self, payload: String, permit: OwnedSemaphorePermit) {
        let queue = self.queue.clone();
        let chain = self.chain.clone();
        let store = self.store.clone();
        let inflight_key = self.inflight_key.clone();
        let running = self.running.clone();
        let span = self.span.clone();
        tokio::spawn(
            async move {
                let _permit = permit;
                process_one(&queue, &chain, &store, &inflight_key, &running, payload).await;
            }
            .instrument(span),
        );
    }

    /// Wait until every slot is free (no job running), up to `timeout`.
    /// Returns whether the pool fully drained.
    pub(crate) async fn drain(&self, timeout: Duration) -> bool {
        let acquire_all = self
            .slots
            .clone()
            .acquire_many_owned(self.concurrency as u32);
        matches!(tokio::time::timeout(timeout, acquire_all).await, Ok(Ok(_)))
    }
}

async fn process_one(
    queue: &str,
    chain: &JobFn,
    store: &Arc<dyn Store>,
    inflight_key: &str,
    running: &Arc<RunningSet>,
    payload: String,
) {
    match Msg::from_json(&payload) {
        Err(e) => {
            // Undecodable payloads cannot be retried; discard after counting.
            error!(%queue, error = %e, raw = %payload, "discarding undecodable payload");
            if let Err(e) = store.increment_stats(JobOutcome::Failed).await {
                warn!(%queue, error = %e, "failed to count discarded payload");
            }
        }
        Ok(msg) => {
            let tid = running.insert(queue, &payload);
            chain(msg).await.ok();
            running.remove(&tid);
        }
    }
    if let Err(e) = store.ack_inflight(inflight_key, &payload).await {
        warn!(%queue, error = %e, "failed to remove payload from in-flight list");
    }
}

/// Jobs currently executing in this process, snapshotted by the heartbeat.
#[derive(Default)]
pub(crate) struct RunningSet {
    jobs: Mutex<HashMap<String, RunningJob>>,
    next_tid: AtomicU64,
}

struct RunningJob {
    queue: String,
    payload: String,
    run_at: f64,
}

impl RunningSet {
    fn insert(&self, queue: &str, payload: &str) -> String {
        let tid = format!("{:x}", self.next_tid.fetch_add(1, Ordering::Relaxed));
        let job = RunningJob {
            queue: queue.to_string(),
            payload: payload.to_string(),
            run_at: now_epoch_seconds(),
        };
        self.lock().insert(tid.clone(), job);
        tid
    }

    fn remove(&self, tid: &str) {
        self.lock().remove(tid);
    }

    /// (tid, serialized record) pairs for the heartbeat's work hash.
    pub(crate) fn snapshot(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .map(|(tid, job)| {
                let record = serde_json::json!({
                    "queue": job.queue,
                    "payload": job.payload,
                    "run_at": job.run_at,
                });
                (tid.clone(), record.to_string())
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunningJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::store::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    fn pool_over(
        store: Arc<MemoryStore>,
        chain: JobFn,
        concurrency: usize,
    ) -> (WorkerPool, Arc<RunningSet>) {
        let running = Arc::new(RunningSet::default());
        let pool = WorkerPool::new(
            "q".to_string(),
            chain,
            store,
            "inflight".to_string(),
            concurrency,
            running.clone(),
            Span::none(),
        );
        (pool, running)
    }

    async fn seed_and_dequeue(store: &MemoryStore, payload: &str) -> String {
        store.enqueue_message_now("q", payload).await.unwrap();
        store
            .dequeue_message("q", "inflight", Duration::from_millis(10))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn processes_and_acks_a_payload() {
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
        let (pool, _) = pool_over(store.clone(), chain, 1);

        let payload = seed_and_dequeue(&store, r#"{"class":"C","queue":"q"}"#).await;
        let permit = pool.acquire_slot().await.unwrap();
        pool.spawn(payload, permit);

        assert!(pool.drain(Duration::from_secs(1)).await);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(store.list_entries("inflight").is_empty());
    }

    #[tokio::test]
    async fn undecodable_payload_is_discarded_and_counted() {
        let store = Arc::new(MemoryStore::new(""));
        let chain = handler_fn(|_msg| async { Ok(()) });
        let (pool, _) = pool_over(store.clone(), chain, 1);

        let payload = seed_and_dequeue(&store, "{garbage").await;
        let permit = pool.acquire_slot().await.unwrap();
        pool.spawn(payload, permit);

        assert!(pool.drain(Duration::from_secs(1)).await);
        let snapshot = store.get_stats(&[]).await.unwrap();
        assert_eq!(snapshot.failed, 1);
        assert!(store.list_entries("inflight").is_empty());
        assert!(store.retry_entries().is_empty());
    }

    #[tokio::test]
    async fn slot_survives_a_panicking_handler() {
        let store = Arc::new(MemoryStore::new(""));
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = {
            let calls = calls.clone();
            handler_fn(move |_msg| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first call explodes");
                    }
                    Ok(())
                }
            })
        };
        let (pool, _) = pool_over(store.clone(), chain, 1);

        for _ in 0..2 {
            let payload = seed_and_dequeue(&store, r#"{"class":"C","queue":"q"}"#).await;
            let permit = pool.acquire_slot().await.unwrap();
            pool.spawn(payload, permit);
            assert!(pool.drain(Duration::from_secs(1)).await);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.list_entries("inflight").is_empty());
    }

    #[tokio::test]
    async fn drain_times_out_while_a_job_runs() {
        let store = Arc::new(MemoryStore::new(""));
        let chain = handler_fn(|_msg| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });
        let (pool, running) = pool_over(store.clone(), chain, 1);

        let payload = seed_and_dequeue(&store, r#"{"class":"Slow","queue":"q"}"#).await;
        let permit = pool.acquire_slot().await.unwrap();
        pool.spawn(payload, permit);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(running.snapshot().len(), 1);
        assert!(!pool.drain(Duration::from_millis(10)).await);
        assert!(pool.drain(Duration::from_secs(1)).await);
        assert!(running.snapshot().is_empty());
    }

    #[test]
    fn running_snapshot_serializes_queue_payload_run_at() {
        let running = RunningSet::default();
        let tid = running.insert("mail", r#"{"class":"C"}"#);
        let snapshot = running.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, tid);
        let record: serde_json::Value = serde_json::from_str(&snapshot[0].1).unwrap();
        assert_eq!(record["queue"], "mail");
        assert_eq!(record["payload"], r#"{"class":"C"}"#);
        assert!(record["run_at"].as_f64().unwrap() > 0.0);

        running.remove(&tid);
        assert!(running.snapshot().is_empty());
    }
}
