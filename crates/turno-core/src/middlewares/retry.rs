use std::sync::{Arc, Mutex};

use rand::Rng;
use tracing::{debug, error, info};

use crate::error::ProcessError;
use crate::message::{now_epoch_seconds, Msg};
use crate::middleware::{JobFn, Middleware};
use crate::store::Store;

/// Callback invoked after a message exhausts its retry budget and lands in
/// the dead set: `(queue, message, final error)`.
pub type RetriesExhaustedHandler = Box<dyn Fn(&str, &Msg, &ProcessError) + Send + Sync>;

/// Decides schedule-vs-bury after the inner chain fails, then re-raises the
/// original error so the stats middleware still counts the failure.
///
/// Messages without a retry budget (`retry` absent or `false`) are reported
/// and dropped; the retry counter is never touched for them.
pub struct RetryMiddleware {
    store: Arc<dyn Store>,
    exhausted: Arc<Mutex<Vec<RetriesExhaustedHandler>>>,
}

impl RetryMiddleware {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            exhausted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn with_exhausted_handlers(
        store: Arc<dyn Store>,
        exhausted: Arc<Mutex<Vec<RetriesExhaustedHandler>>>,
    ) -> Self {
        Self { store, exhausted }
    }
}

impl Middleware for RetryMiddleware {
    fn wrap(&self, next: JobFn) -> JobFn {
        let store = self.store.clone();
        let exhausted = self.exhausted.clone();
        Arc::new(move |msg: Msg| {
            let next = next.clone();
            let store = store.clone();
            let exhausted = exhausted.clone();
            Box::pin(async move {
                let Err(err) = next(msg.clone()).await else {
                    return Ok(());
                };
                // Only failures of the job itself are the retry policy's
                // business; infrastructure errors pass through untouched.
                if !err.is_job_failure() {
                    return Err(err);
                }
                let Some(max) = msg.retry().max_retries() else {
                    return Err(err);
                };

                let n = msg.retry_count();
                let now = now_epoch_seconds();
                if n >= max {
                    info!(
                        jid = %msg.jid(),
                        queue = %msg.queue(),
                        retry_count = n,
                        "retries exhausted, burying message"
                    );
                    if let Err(store_err) = store.enqueue_dead_message(now, &msg.to_json()).await {
                        error!(jid = %msg.jid(), error = %store_err, "failed to bury message");
                    }
                    let handlers = exhausted.lock().unwrap_or_else(|e| e.into_inner());
                    for handler in handlers.iter() {
                        handler(msg.queue(), &msg, &err);
                    }
                } else {
                    let mut retried = msg;
                    retried.set("error_class", err.kind());
                    retried.set("error_message", err.to_string());
                    if retried.get("retry_count").is_none() {
                        retried.set("failed_at", now);
                    } else {
                        retried.set("retried_at", now);
                    }
                    retried.set("retry_count", n + 1);
                    let delay = retry_delay(n);
                    debug!(
                        jid = %retried.jid(),
                        queue = %retried.queue(),
                        retry_count = n + 1,
                        delay_secs = delay,
                        "scheduling retry"
                    );
                    if let Err(store_err) = store
                        .enqueue_retried_message(now + delay, &retried.to_json())
                        .await
                    {
                        error!(jid = %retried.jid(), error = %store_err, "failed to schedule retry");
                    }
                }
                Err(err)
            })
        })
    }
}

/// Backoff before the next attempt, given the number of failures so far:
/// `n⁴ + 15` seconds plus up to 30 seconds of uniform jitter.
fn retry_delay(retry_count: u32) -> f64 {
    f64::from(retry_count).powi(4) + 15.0 + rand::rng().random_range(0.0..30.0)
}
