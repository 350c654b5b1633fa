//! The manager wires everything together: it owns the store, the registered
//! queue/handler pairs, the scheduled poller, the heartbeat, and one fetcher
//! plus worker pool per queue.
//!
//! Lifecycle: `run` recovers the previous run's in-flight lists, starts every
//! loop, and blocks until the passed-in token trips; it then quiesces
//! (fetchers stop admitting, poller and heartbeat keep going), waits up to
//! the shutdown timeout for running handlers, and stops. Handlers still
//! running at the deadline leave their in-flight entries behind for the next
//! start to recover.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::config::Options;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::heartbeat::{self, Heartbeat, ProcessInfo};
use crate::message::{now_epoch_seconds, Msg};
use crate::middleware::{compose, handler_fn, HandlerError, JobFn, Middleware};
use crate::middlewares::{self, RetriesExhaustedHandler};
use crate::producer::Producer;
use crate::scheduled::ScheduledPoller;
use crate::stats::StatsSnapshot;
use crate::store::{Keys, RedisStore, Store};
use crate::worker::{RunningSet, WorkerPool};

struct WorkerSpec {
    queue: String,
    concurrency: usize,
    chain: JobFn,
}

pub struct Manager {
    opts: Options,
    store: Arc<dyn Store>,
    keys: Keys,
    workers: Vec<WorkerSpec>,
    quiet: Arc<AtomicBool>,
    running: Arc<RunningSet>,
    exhausted: Arc<Mutex<Vec<RetriesExhaustedHandler>>>,
    /// Per-boot identity published in the heartbeat.
    identity: String,
    /// Stable identity (`<hostname>:<process_id>`) keying in-flight lists;
    /// identical across restarts so recovery can find them.
    process_identity: String,
    started_at: f64,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager").finish_non_exhaustive()
    }
}

impl Manager {
    /// Validate options and connect to the backend.
    pub async fn new(opts: Options) -> Result<Self> {
        opts.validate()?;
        let store: Arc<dyn Store> = Arc::new(RedisStore::connect(&opts).await?);
        Self::with_store(opts, store)
    }

    /// Build over an explicit store implementation. This is the entry point
    /// for tests and for embedders managing their own connections.
    pub fn with_store(opts: Options, store: Arc<dyn Store>) -> Result<Self> {
        opts.validate()?;
        let keys = Keys::new(&opts.namespace);
        let identity = heartbeat::identity();
        let process_identity = heartbeat::process_identity(&opts.process_id);
        Ok(Self {
            store,
            keys,
            workers: Vec::new(),
            quiet: Arc::new(AtomicBool::new(false)),
            running: Arc::new(RunningSet::default()),
            exhausted: Arc::new(Mutex::new(Vec::new())),
            identity,
            process_identity,
            started_at: now_epoch_seconds(),
            opts,
        })
    }

    /// A producer sharing this manager's store.
    pub fn producer(&self) -> Producer {
        Producer::new(self.store.clone())
    }

    /// Register a handler for `queue` with the default middleware stack.
    pub fn add_worker<F, Fut>(&mut self, queue: &str, concurrency: usize, handler: F)
    where
        F: Fn(Msg) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        let stack = middlewares::default_stack(self.store.clone(), self.exhausted.clone());
        self.add_worker_with_middlewares(queue, concurrency, handler, stack);
    }

    /// Register a handler with an explicit middleware stack. The chain is
    /// composed here, once; it cannot change after registration.
    pub fn add_worker_with_middlewares<F, Fut>(
        &mut self,
        queue: &str,
        concurrency: usize,
        handler: F,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) where
        F: Fn(Msg) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        let chain = compose(&middlewares, handler_fn(handler));
        self.workers.push(WorkerSpec {
            queue: queue.to_string(),
            concurrency: concurrency.max(1),
            chain,
        });
    }

    /// Register a callback for messages that exhaust their retry budget.
    pub fn add_retries_exhausted_handler(&mut self, handler: RetriesExhaustedHandler) {
        self.exhausted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// Stop admitting new work while letting running handlers, the poller,
    /// and the heartbeat continue. Observers see `quiet: true` on the next
    /// beat.
    pub fn quiet(&self) {
        if !self.quiet.swap(true, Ordering::SeqCst) {
            info!(identity = %self.identity, "manager quiescing");
        }
    }

    /// Counters snapshot for the registered queues.
    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let queues: Vec<String> = self.workers.iter().map(|w| w.queue.clone()).collect();
        Ok(self.store.get_stats(&queues).await?)
    }

    /// The heartbeat identity of this manager instance.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The in-flight list key this process uses for `queue`.
    pub fn inflight_key(&self, queue: &str) -> String {
        self.keys.inflight(&self.process_identity, queue)
    }

    /// Run until `shutdown` trips, then quiesce and stop.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(identity = %self.identity, "manager starting");

        // Register queues and recover in-flight lists from a previous run
        // with the same process identity.
        for spec in &self.workers {
            self.store.create_queue(&spec.queue).await?;
            let inflight_key = self.inflight_key(&spec.queue);
            match self.store.requeue_inflight(&inflight_key, &spec.queue).await {
                Ok(0) => {}
                Ok(recovered) => {
                    info!(queue = %spec.queue, recovered, "requeued in-flight messages from previous run");
                }
                Err(e) => warn!(queue = %spec.queue, error = %e, "in-flight recovery failed"),
            }
        }

        let fetcher_token = CancellationToken::new();
        let aux_token = CancellationToken::new();
        let span = crate::telemetry::process_span(&self.identity, &self.opts.tag);

        let mut pools = Vec::with_capacity(self.workers.len());
        let mut fetcher_handles = Vec::with_capacity(self.workers.len());
        for spec in &self.workers {
            let inflight_key = self.inflight_key(&spec.queue);
            let pool = Arc::new(WorkerPool::new(
                spec.queue.clone(),
                spec.chain.clone(),
                self.store.clone(),
                inflight_key.clone(),
                spec.concurrency,
                self.running.clone(),
                span.clone(),
            ));
            let fetcher = Fetcher::new(
                spec.queue.clone(),
                inflight_key,
                self.store.clone(),
                pool.clone(),
                self.quiet.clone(),
                fetcher_token.clone(),
            );
            pools.push(pool);
            fetcher_handles.push(tokio::spawn(fetcher.run().instrument(span.clone())));
        }

        let poller = ScheduledPoller::new(
            self.store.clone(),
            self.keys.namespace().to_string(),
            self.opts.poll_interval(),
            aux_token.clone(),
        );
        let poller_handle = tokio::spawn(poller.run().instrument(span.clone()));

        let info = ProcessInfo {
            hostname: heartbeat::hostname(),
            pid: std::process::id(),
            started_at: self.started_at,
            queues: self.workers.iter().map(|w| w.queue.clone()).collect(),
            concurrency: self.workers.iter().map(|w| w.concurrency).sum(),
            tag: self.opts.tag.clone(),
            labels: self.opts.labels.clone(),
            identity: self.identity.clone(),
        };
        let heartbeat = Heartbeat::new(
            self.store.clone(),
            info,
            self.quiet.clone(),
            self.running.clone(),
            aux_token.clone(),
        );
        let heartbeat_handle = tokio::spawn(heartbeat.run().instrument(span.clone()));

        info!(identity = %self.identity, queues = self.workers.len(), "manager running");
        shutdown.cancelled().await;

        // Quiesce, then give running handlers the grace period.
        self.quiet();
        fetcher_token.cancel();
        for handle in fetcher_handles {
            let _ = handle.await;
        }

        let deadline = Instant::now() + self.opts.shutdown_timeout();
        let mut drained = true;
        for pool in &pools {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !pool.drain(remaining).await {
                drained = false;
            }
        }
        if !drained {
            warn!(
                identity = %self.identity,
                "handlers still running at shutdown deadline; their in-flight entries will be recovered on next start"
            );
        }

        aux_token.cancel();
        let _ = poller_handle.await;
        let _ = heartbeat_handle.await;
        info!(identity = %self.identity, "manager stopped");
        Ok(())
    }
}
