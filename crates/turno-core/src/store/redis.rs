//! Redis-backed store.
//!
//! Single-key operations go through [`redis::AsyncCommands`]; multi-key
//! writes use `MULTI`/`EXEC` pipelines; the operations whose atomicity
//! depends on a read (the score-guarded set pop, the uniqueness
//! check-and-set, the in-flight drain) run as server-side Lua scripts.
//!
//! Wire layout: queues are lists written with `LPUSH` and consumed from the
//! opposite end with `BRPOPLPUSH`, which doubles as the atomic move into the
//! per-process in-flight list.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::config::Options;
use crate::error::{StoreError, StoreResult};
use crate::heartbeat::HeartbeatRecord;
use crate::stats::{today, JobOutcome, StatsSnapshot};

use super::keys::Keys;
use super::{Store, DEAD_SET_LIMIT, DEAD_SET_MAX_AGE_SECS};

/// Pop the earliest member with score ≤ ARGV[1] from the set at KEYS[1].
const POP_DUE: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if due[1] == nil then
  return false
end
redis.call('ZREM', KEYS[1], due[1])
return due[1]
";

/// Enqueue KEYS[3] ← ARGV[3] only if the uniqueness guard KEYS[1] is absent;
/// set the guard with TTL ARGV[1] and register the queue ARGV[2] in KEYS[2].
const UNIQUE_ENQUEUE: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('SET', KEYS[1], 1, 'EX', ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
redis.call('LPUSH', KEYS[3], ARGV[3])
return 1
";

/// Add ARGV[2] to the dead set scored at ARGV[1], then trim by age
/// (everything strictly below ARGV[3]) and by size (down to ARGV[4]).
const DEAD_ADD: &str = r"
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[3])
local excess = redis.call('ZCARD', KEYS[1]) - tonumber(ARGV[4])
if excess > 0 then
  redis.call('ZREMRANGEBYRANK', KEYS[1], 0, excess - 1)
end
return 1
";

/// Drain the in-flight list KEYS[1] back onto the head of queue KEYS[2],
/// preserving the original dequeue order. Returns the number moved.
const REQUEUE_INFLIGHT: &str = r"
local moved = 0
while true do
  local payload = redis.call('LPOP', KEYS[1])
  if not payload then
    break
  end
  redis.call('RPUSH', KEYS[2], payload)
  moved = moved + 1
end
return moved
";

struct Scripts {
    pop_due: Script,
    unique_enqueue: Script,
    dead_add: Script,
    requeue_inflight: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            pop_due: Script::new(POP_DUE),
            unique_enqueue: Script::new(UNIQUE_ENQUEUE),
            dead_add: Script::new(DEAD_ADD),
            requeue_inflight: Script::new(REQUEUE_INFLIGHT),
        }
    }
}

pub struct RedisStore {
    keys: Keys,
    /// Round-robin pool of multiplexed connections. Blocking dequeues park a
    /// whole connection for up to their timeout, so one connection per
    /// fetcher slot keeps them from starving the rest of the runtime.
    connections: Vec<ConnectionManager>,
    next: AtomicUsize,
    scripts: Scripts,
}

impl RedisStore {
    /// Connect according to the manager options: direct or via Sentinel
    /// master resolution, with `pool_size` multiplexed connections.
    pub async fn connect(opts: &Options) -> StoreResult<Self> {
        let addr = if opts.sentinel_addrs.is_empty() {
            opts.server_addr.clone()
        } else {
            resolve_master(&opts.sentinel_addrs, &opts.master_name).await?
        };
        let client = redis::Client::open(opts.url_for(&addr))?;
        let mut connections = Vec::with_capacity(opts.pool_size.max(1));
        for _ in 0..opts.pool_size.max(1) {
            connections.push(ConnectionManager::new(client.clone()).await?);
        }
        Ok(Self {
            keys: Keys::new(&opts.namespace),
            connections,
            next: AtomicUsize::new(0),
            scripts: Scripts::new(),
        })
    }

    /// Build a store over existing connections, for embedders that manage
    /// their own pool.
    pub fn from_connections(connections: Vec<ConnectionManager>, namespace: &str) -> Self {
        assert!(!connections.is_empty(), "at least one connection required");
        Self {
            keys: Keys::new(namespace),
            connections,
            next: AtomicUsize::new(0),
            scripts: Scripts::new(),
        }
    }

    fn conn(&self) -> ConnectionManager {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx].clone()
    }
}

/// Ask each sentinel in turn for the current master address.
async fn resolve_master(sentinels: &[String], master_name: &str) -> StoreResult<String> {
    for addr in sentinels {
        let Ok(client) = redis::Client::open(format!("redis://{addr}")) else {
            continue;
        };
        let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
            continue;
        };
        let reply: Result<(String, String), _> = redis::cmd("SENTINEL")
            .arg("get-master-addr-by-name")
            .arg(master_name)
            .query_async(&mut conn)
            .await;
        if let Ok((host, port)) = reply {
            return Ok(format!("{host}:{port}"));
        }
    }
    Err(StoreError::Redis(format!(
        "no sentinel answered for master `{master_name}`"
    )))
}

#[async_trait]
impl Store for RedisStore {
    async fn create_queue(&self, queue: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.sadd::<_, _, ()>(self.keys.queues(), queue).await?;
        Ok(())
    }

    async fn enqueue_message(&self, queue: &str, at: f64, payload: &str) -> StoreResult<()> {
        if at > 0.0 {
            return self.enqueue_scheduled_message(at, payload).await;
        }
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .sadd(self.keys.queues(), queue)
            .ignore()
            .lpush(self.keys.queue(queue), payload)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn enqueue_message_now(&self, queue: &str, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.lpush::<_, _, ()>(self.keys.queue(queue), payload)
            .await?;
        Ok(())
    }

    async fn enqueue_scheduled_message(&self, at: f64, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(self.keys.schedule(), payload, at)
            .await?;
        Ok(())
    }

    async fn enqueue_retried_message(&self, at: f64, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(self.keys.retry(), payload, at)
            .await?;
        Ok(())
    }

    async fn enqueue_dead_message(&self, now: f64, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        self.scripts
            .dead_add
            .key(self.keys.dead())
            .arg(now)
            .arg(payload)
            .arg(now - DEAD_SET_MAX_AGE_SECS)
            .arg(DEAD_SET_LIMIT)
            .invoke_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue_message(
        &self,
        queue: &str,
        inflight_key: &str,
        timeout: Duration,
    ) -> StoreResult<String> {
        let mut conn = self.conn();
        let timeout_secs = timeout.as_secs().max(1) as usize;
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(self.keys.queue(queue))
            .arg(inflight_key)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;
        payload.ok_or(StoreError::Empty)
    }

    async fn dequeue_scheduled_message(&self, now: f64) -> StoreResult<String> {
        self.pop_due(self.keys.schedule(), now).await
    }

    async fn dequeue_retried_message(&self, now: f64) -> StoreResult<String> {
        self.pop_due(self.keys.retry(), now).await
    }

    async fn ack_inflight(&self, inflight_key: &str, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.lrem::<_, _, ()>(inflight_key, 1, payload).await?;
        Ok(())
    }

    async fn enqueue_unique_message(
        &self,
        queue: &str,
        payload: &str,
        digest: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn();
        let enqueued: i64 = self
            .scripts
            .unique_enqueue
            .key(self.keys.unique(queue, digest))
            .key(self.keys.queues())
            .key(self.keys.queue(queue))
            .arg(ttl.as_secs().max(1))
            .arg(queue)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(enqueued == 1)
    }

    async fn publish_heartbeat(&self, record: &HeartbeatRecord) -> StoreResult<()> {
        let process_key = self.keys.process(&record.identity);
        let work_key = self.keys.work(&record.identity);
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&process_key, "beat", record.beat)
            .ignore()
            .hset(&process_key, "quiet", record.quiet.to_string())
            .ignore()
            .hset(&process_key, "info", &record.info)
            .ignore()
            .expire(&process_key, 60)
            .ignore()
            .sadd(self.keys.processes(), &record.identity)
            .ignore()
            .del(&work_key)
            .ignore();
        if !record.work.is_empty() {
            pipe.hset_multiple(&work_key, &record.work)
                .ignore()
                .expire(&work_key, 60)
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn remove_heartbeat(&self, identity: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .del(self.keys.process(identity))
            .ignore()
            .del(self.keys.work(identity))
            .ignore()
            .srem(self.keys.processes(), identity)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn increment_stats(&self, outcome: JobOutcome) -> StoreResult<()> {
        let name = outcome.counter();
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .incr(self.keys.stat(name), 1)
            .ignore()
            .incr(self.keys.stat_day(name, &today()), 1)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_stats(&self, queues: &[String]) -> StoreResult<StatsSnapshot> {
        let mut conn = self.conn();
        let day = today();
        type Counters = (Option<u64>, Option<u64>, Option<u64>, Option<u64>);
        let (processed, failed, processed_today, failed_today): Counters = redis::pipe()
            .get(self.keys.stat("processed"))
            .get(self.keys.stat("failed"))
            .get(self.keys.stat_day("processed", &day))
            .get(self.keys.stat_day("failed", &day))
            .query_async(&mut conn)
            .await?;
        let (dead, retry, scheduled): (u64, u64, u64) = redis::pipe()
            .zcard(self.keys.dead())
            .zcard(self.keys.retry())
            .zcard(self.keys.schedule())
            .query_async(&mut conn)
            .await?;

        let mut snapshot = StatsSnapshot {
            processed: processed.unwrap_or(0),
            failed: failed.unwrap_or(0),
            processed_today: processed_today.unwrap_or(0),
            failed_today: failed_today.unwrap_or(0),
            dead,
            retry,
            scheduled,
            queues: Default::default(),
        };

        for queue in queues {
            let enqueued: u64 = conn.llen(self.keys.queue(queue)).await?;
            let pattern = format!("{}*:{queue}:inprogress", self.keys.namespace());
            let inflight_keys: Vec<String> = {
                let mut iter = conn.scan_match::<_, String>(&pattern).await?;
                let mut found = Vec::new();
                while let Some(key) = iter.next_item().await {
                    found.push(key);
                }
                found
            };
            let mut in_flight = 0u64;
            for key in inflight_keys {
                in_flight += conn.llen::<_, u64>(key).await?;
            }
            snapshot.queues.insert(
                queue.clone(),
                crate::stats::QueueStats {
                    enqueued,
                    in_flight,
                },
            );
        }
        Ok(snapshot)
    }

    async fn requeue_inflight(&self, inflight_key: &str, queue: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        let moved: i64 = self
            .scripts
            .requeue_inflight
            .key(inflight_key)
            .key(self.keys.queue(queue))
            .invoke_async(&mut conn)
            .await?;
        Ok(moved as usize)
    }
}

impl RedisStore {
    async fn pop_due(&self, key: String, now: f64) -> StoreResult<String> {
        let mut conn = self.conn();
        let payload: Option<String> = self
            .scripts
            .pop_due
            .key(key)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        payload.ok_or(StoreError::NoneDue)
    }
}
