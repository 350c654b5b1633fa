pub mod keys;
mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::heartbeat::HeartbeatRecord;
use crate::stats::{JobOutcome, StatsSnapshot};

pub use self::redis::RedisStore;
pub use keys::Keys;
pub use memory::MemoryStore;

/// Maximum number of entries kept in the dead set.
pub const DEAD_SET_LIMIT: u64 = 10_000;

/// Maximum age of a dead-set entry, in seconds (180 days).
pub const DEAD_SET_MAX_AGE_SECS: f64 = 180.0 * 24.0 * 3600.0;

/// Backend façade. Implementations must be thread-safe; every method that
/// touches multiple keys is atomic against the backend.
///
/// All methods return [`StoreResult`] — infrastructure errors plus the two
/// sentinels [`crate::StoreError::Empty`] (blocking dequeue timeout) and
/// [`crate::StoreError::NoneDue`] (no scheduled entry ready). Domain
/// decisions live above this trait.
#[async_trait]
pub trait Store: Send + Sync {
    /// Register a queue in the known-queues set. Idempotent.
    async fn create_queue(&self, queue: &str) -> StoreResult<()>;

    /// Route a payload: `at > 0` puts it in the scheduled set scored at `at`;
    /// otherwise it goes to the queue's tail, registering the queue in the
    /// known-queues set in the same atomic step.
    async fn enqueue_message(&self, queue: &str, at: f64, payload: &str) -> StoreResult<()>;

    /// Push a payload to the queue's tail.
    async fn enqueue_message_now(&self, queue: &str, payload: &str) -> StoreResult<()>;

    /// Add a payload to the scheduled set, scored at `at`.
    async fn enqueue_scheduled_message(&self, at: f64, payload: &str) -> StoreResult<()>;

    /// Add a payload to the retry set, scored at `at`.
    async fn enqueue_retried_message(&self, at: f64, payload: &str) -> StoreResult<()>;

    /// Add a payload to the dead set scored at `now`, trimming the set to
    /// [`DEAD_SET_LIMIT`] entries and [`DEAD_SET_MAX_AGE_SECS`] age in the
    /// same atomic step.
    async fn enqueue_dead_message(&self, now: f64, payload: &str) -> StoreResult<()>;

    /// Blocking move of the queue's head into the per-process in-flight list.
    /// Fails with `Empty` when nothing arrives within `timeout`.
    async fn dequeue_message(
        &self,
        queue: &str,
        inflight_key: &str,
        timeout: Duration,
    ) -> StoreResult<String>;

    /// Atomically remove and return one scheduled entry with score ≤ `now`.
    /// Fails with `NoneDue` when there is none.
    async fn dequeue_scheduled_message(&self, now: f64) -> StoreResult<String>;

    /// Atomically remove and return one retry entry with score ≤ `now`.
    /// Fails with `NoneDue` when there is none.
    async fn dequeue_retried_message(&self, now: f64) -> StoreResult<String>;

    /// Remove one occurrence of this exact payload from the in-flight list.
    async fn ack_inflight(&self, inflight_key: &str, payload: &str) -> StoreResult<()>;

    /// Push a payload to the queue's tail only if no uniqueness guard exists
    /// for `digest`; sets the guard with `ttl` in the same atomic step.
    /// Returns whether the payload was enqueued.
    async fn enqueue_unique_message(
        &self,
        queue: &str,
        payload: &str,
        digest: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Publish this process's liveness record and busy-slot snapshot.
    async fn publish_heartbeat(&self, record: &HeartbeatRecord) -> StoreResult<()>;

    /// Remove the liveness record and unregister from the processes set.
    async fn remove_heartbeat(&self, identity: &str) -> StoreResult<()>;

    /// Increment the lifetime and day-bucketed counter for `outcome`.
    async fn increment_stats(&self, outcome: JobOutcome) -> StoreResult<()>;

    /// Read the counters snapshot for the given queues.
    async fn get_stats(&self, queues: &[String]) -> StoreResult<StatsSnapshot>;

    /// Return every message in the in-flight list to the head of `queue`,
    /// preserving their original order. Returns how many were moved. Called
    /// on startup to recover from a crashed predecessor.
    async fn requeue_inflight(&self, inflight_key: &str, queue: &str) -> StoreResult<usize>;
}
