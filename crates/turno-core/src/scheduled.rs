//! Promotion of due scheduled and retry entries back to their live queues.
//!
//! One loop per manager. Each tick drains everything whose score has come
//! due; enqueueing happens strictly after a successful dequeue, so a crash
//! between the two loses at most the entry being moved (the compatibility
//! constraint of the wire convention).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::message::{now_epoch_seconds, Msg};
use crate::store::Store;

enum SetKind {
    Scheduled,
    Retried,
}

pub(crate) struct ScheduledPoller {
    store: Arc<dyn Store>,
    /// Normalized namespace prefix, stripped from the `queue` field of
    /// promoted messages (other producers may write it prefixed).
    namespace: String,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl ScheduledPoller {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        namespace: String,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            namespace,
            poll_interval,
            shutdown,
        }
    }

    pub(crate) async fn run(self) {
        info!("scheduled poller started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(jittered(self.poll_interval)) => {}
            }
            let now = now_epoch_seconds();
            self.drain(&SetKind::Scheduled, now).await;
            self.drain(&SetKind::Retried, now).await;
        }
        info!("scheduled poller stopped");
    }

    async fn drain(&self, kind: &SetKind, now: f64) {
        loop {
            let dequeued = match kind {
                SetKind::Scheduled => self.store.dequeue_scheduled_message(now).await,
                SetKind::Retried => self.store.dequeue_retried_message(now).await,
            };
            let raw = match dequeued {
                Ok(raw) => raw,
                Err(StoreError::NoneDue) => break,
                Err(e) => {
                    warn!(error = %e, "scheduled drain failed, deferring to next tick");
                    break;
                }
            };
            let mut msg = match Msg::from_json(&raw) {
                Ok(msg) => msg,
                Err(e) => {
                    // No queue to route to; nothing to do but drop it.
                    error!(error = %e, raw = %raw, "discarding undecodable scheduled payload");
                    continue;
                }
            };
            let queue = msg
                .queue()
                .strip_prefix(&self.namespace)
                .unwrap_or(msg.queue())
                .to_string();
            msg.set("enqueued_at", now_epoch_seconds());
            debug!(jid = %msg.jid(), %queue, "promoting due message");
            if let Err(e) = self.store.enqueue_message_now(&queue, &msg.to_json()).await {
                error!(jid = %msg.jid(), %queue, error = %e, "failed to promote due message");
                break;
            }
        }
    }
}

/// Tick duration jittered ±50% so a fleet of pollers spreads its load.
fn jittered(interval: Duration) -> Duration {
    interval.mul_f64(0.5 + rand::rng().random_range(0.0..1.0))
}
