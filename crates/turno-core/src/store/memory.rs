//! In-process store with the same semantics as the Redis-backed one.
//!
//! Used by the test suites and by embedders' tests: everything above the
//! [`Store`] trait can be exercised without a running backend. The inspection
//! helpers at the bottom expose wire-level state (queue contents, set scores)
//! for assertions.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{StoreError, StoreResult};
use crate::heartbeat::HeartbeatRecord;
use crate::stats::{today, JobOutcome, StatsSnapshot};

use super::keys::Keys;
use super::{Store, DEAD_SET_LIMIT, DEAD_SET_MAX_AGE_SECS};

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    /// Score-ordered sets, kept sorted ascending; ties keep insertion order.
    zsets: HashMap<String, Vec<(f64, String)>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    counters: HashMap<String, u64>,
    unique_until: HashMap<String, Instant>,
}

impl Inner {
    fn zadd(&mut self, key: &str, score: f64, member: String) {
        let entries = self.zsets.entry(key.to_string()).or_default();
        let pos = entries.partition_point(|(s, _)| *s <= score);
        entries.insert(pos, (score, member));
    }

    /// Remove and return the earliest entry with score ≤ `now`.
    fn zpop_due(&mut self, key: &str, now: f64) -> Option<String> {
        let entries = self.zsets.get_mut(key)?;
        if entries.first().is_some_and(|(score, _)| *score <= now) {
            Some(entries.remove(0).1)
        } else {
            None
        }
    }

    fn push_tail(&mut self, queue_key: String, payload: String) {
        self.lists.entry(queue_key).or_default().push_back(payload);
    }
}

pub struct MemoryStore {
    keys: Keys,
    inner: Mutex<Inner>,
    arrival: Notify,
}

impl MemoryStore {
    pub fn new(namespace: &str) -> Self {
        Self {
            keys: Keys::new(namespace),
            inner: Mutex::new(Inner::default()),
            arrival: Notify::new(),
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_pop(&self, queue: &str, inflight_key: &str) -> Option<String> {
        let mut inner = self.lock();
        let payload = inner.lists.get_mut(&self.keys.queue(queue))?.pop_front()?;
        inner
            .lists
            .entry(inflight_key.to_string())
            .or_default()
            .push_back(payload.clone());
        Some(payload)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_queue(&self, queue: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        inner
            .sets
            .entry(self.keys.queues())
            .or_default()
            .insert(queue.to_string());
        Ok(())
    }

    async fn enqueue_message(&self, queue: &str, at: f64, payload: &str) -> StoreResult<()> {
        if at > 0.0 {
            return self.enqueue_scheduled_message(at, payload).await;
        }
        {
            let mut inner = self.lock();
            inner
                .sets
                .entry(self.keys.queues())
                .or_default()
                .insert(queue.to_string());
            inner.push_tail(self.keys.queue(queue), payload.to_string());
        }
        self.arrival.notify_waiters();
        Ok(())
    }

    async fn enqueue_message_now(&self, queue: &str, payload: &str) -> StoreResult<()> {
        self.lock()
            .push_tail(self.keys.queue(queue), payload.to_string());
        self.arrival.notify_waiters();
        Ok(())
    }

    async fn enqueue_scheduled_message(&self, at: f64, payload: &str) -> StoreResult<()> {
        self.lock()
            .zadd(&self.keys.schedule(), at, payload.to_string());
        Ok(())
    }

    async fn enqueue_retried_message(&self, at: f64, payload: &str) -> StoreResult<()> {
        self.lock().zadd(&self.keys.retry(), at, payload.to_string());
        Ok(())
    }

    async fn enqueue_dead_message(&self, now: f64, payload: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let key = self.keys.dead();
        inner.zadd(&key, now, payload.to_string());
        if let Some(entries) = inner.zsets.get_mut(&key) {
            let horizon = now - DEAD_SET_MAX_AGE_SECS;
            entries.retain(|(score, _)| *score >= horizon);
            while entries.len() as u64 > DEAD_SET_LIMIT {
                entries.remove(0);
            }
        }
        Ok(())
    }

    async fn dequeue_message(
        &self,
        queue: &str,
        inflight_key: &str,
        timeout: Duration,
    ) -> StoreResult<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrival.notified();
            if let Some(payload) = self.try_pop(queue, inflight_key) {
                return Ok(payload);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::Empty);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Err(StoreError::Empty),
            }
        }
    }

    async fn dequeue_scheduled_message(&self, now: f64) -> StoreResult<String> {
        self.lock()
            .zpop_due(&self.keys.schedule(), now)
            .ok_or(StoreError::NoneDue)
    }

    async fn dequeue_retried_message(&self, now: f64) -> StoreResult<String> {
        self.lock()
            .zpop_due(&self.keys.retry(), now)
            .ok_or(StoreError::NoneDue)
    }

    async fn ack_inflight(&self, inflight_key: &str, payload: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(list) = inner.lists.get_mut(inflight_key) {
            if let Some(pos) = list.iter().position(|p| p == payload) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    async fn enqueue_unique_message(
        &self,
        queue: &str,
        payload: &str,
        digest: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = Instant::now();
        {
            let mut inner = self.lock();
            let key = self.keys.unique(queue, digest);
            if inner.unique_until.get(&key).is_some_and(|t| *t > now) {
                return Ok(false);
            }
            inner.unique_until.insert(key, now + ttl);
            inner
                .sets
                .entry(self.keys.queues())
                .or_default()
                .insert(queue.to_string());
            inner.push_tail(self.keys.queue(queue), payload.to_string());
        }
        self.arrival.notify_waiters();
        Ok(true)
    }

    async fn publish_heartbeat(&self, record: &HeartbeatRecord) -> StoreResult<()> {
        let mut inner = self.lock();
        let mut fields = HashMap::new();
        fields.insert("beat".to_string(), record.beat.to_string());
        fields.insert("quiet".to_string(), record.quiet.to_string());
        fields.insert("info".to_string(), record.info.clone());
        inner
            .hashes
            .insert(self.keys.process(&record.identity), fields);
        inner
            .sets
            .entry(self.keys.processes())
            .or_default()
            .insert(record.identity.clone());
        let work = record.work.iter().cloned().collect();
        inner.hashes.insert(self.keys.work(&record.identity), work);
        Ok(())
    }

    async fn remove_heartbeat(&self, identity: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.hashes.remove(&self.keys.process(identity));
        inner.hashes.remove(&self.keys.work(identity));
        if let Some(set) = inner.sets.get_mut(&self.keys.processes()) {
            set.remove(identity);
        }
        Ok(())
    }

    async fn increment_stats(&self, outcome: JobOutcome) -> StoreResult<()> {
        let mut inner = self.lock();
        let name = outcome.counter();
        *inner.counters.entry(self.keys.stat(name)).or_default() += 1;
        *inner
            .counters
            .entry(self.keys.stat_day(name, &today()))
            .or_default() += 1;
        Ok(())
    }

    async fn get_stats(&self, queues: &[String]) -> StoreResult<StatsSnapshot> {
        let inner = self.lock();
        let day = today();
        let counter = |key: String| inner.counters.get(&key).copied().unwrap_or(0);
        let zcard = |key: String| inner.zsets.get(&key).map_or(0, |z| z.len() as u64);

        let mut snapshot = StatsSnapshot {
            processed: counter(self.keys.stat("processed")),
            failed: counter(self.keys.stat("failed")),
            processed_today: counter(self.keys.stat_day("processed", &day)),
            failed_today: counter(self.keys.stat_day("failed", &day)),
            dead: zcard(self.keys.dead()),
            retry: zcard(self.keys.retry()),
            scheduled: zcard(self.keys.schedule()),
            queues: Default::default(),
        };

        for queue in queues {
            let enqueued = inner
                .lists
                .get(&self.keys.queue(queue))
                .map_or(0, |l| l.len() as u64);
            let suffix = format!(":{queue}:inprogress");
            let in_flight = inner
                .lists
                .iter()
                .filter(|(key, _)| key.ends_with(&suffix))
                .map(|(_, list)| list.len() as u64)
                .sum();
            snapshot
                .queues
                .insert(queue.clone(), crate::stats::QueueStats { enqueued, in_flight });
        }
        Ok(snapshot)
    }

    async fn requeue_inflight(&self, inflight_key: &str, queue: &str) -> StoreResult<usize> {
        let moved = {
            let mut inner = self.lock();
            let Some(mut inflight) = inner.lists.remove(inflight_key) else {
                return Ok(0);
            };
            let moved = inflight.len();
            let queue_key = self.keys.queue(queue);
            let target = inner.lists.entry(queue_key).or_default();
            // Newest-first so the oldest dequeued message ends up at the head.
            while let Some(payload) = inflight.pop_back() {
                target.push_front(payload);
            }
            moved
        };
        if moved > 0 {
            self.arrival.notify_waiters();
        }
        Ok(moved)
    }
}

/// Wire-level inspection, for tests.
impl MemoryStore {
    pub fn queue_entries(&self, queue: &str) -> Vec<String> {
        self.list_entries(&self.keys.queue(queue))
    }

    pub fn list_entries(&self, key: &str) -> Vec<String> {
        self.lock()
            .lists
            .get(key)
            .map_or_else(Vec::new, |l| l.iter().cloned().collect())
    }

    pub fn scheduled_entries(&self) -> Vec<(f64, String)> {
        self.zset_entries(&self.keys.schedule())
    }

    pub fn retry_entries(&self) -> Vec<(f64, String)> {
        self.zset_entries(&self.keys.retry())
    }

    pub fn dead_entries(&self) -> Vec<(f64, String)> {
        self.zset_entries(&self.keys.dead())
    }

    pub fn known_queues(&self) -> Vec<String> {
        self.lock()
            .sets
            .get(&self.keys.queues())
            .map_or_else(Vec::new, |s| s.iter().cloned().collect())
    }

    pub fn process_identities(&self) -> Vec<String> {
        self.lock()
            .sets
            .get(&self.keys.processes())
            .map_or_else(Vec::new, |s| s.iter().cloned().collect())
    }

    pub fn process_record(&self, identity: &str) -> Option<HashMap<String, String>> {
        self.lock().hashes.get(&self.keys.process(identity)).cloned()
    }

    pub fn work_snapshot(&self, identity: &str) -> Option<HashMap<String, String>> {
        self.lock().hashes.get(&self.keys.work(identity)).cloned()
    }

    fn zset_entries(&self, key: &str) -> Vec<(f64, String)> {
        self.lock().zsets.get(key).cloned().unwrap_or_default()
    }
}
