use std::sync::Arc;

use tracing::warn;

use crate::middleware::{JobFn, Middleware};
use crate::stats::JobOutcome;
use crate::store::Store;

/// Counts each processing attempt exactly once: `processed` on success,
/// `failed` on error, independent of whether a retry was scheduled. Counter
/// write failures are absorbed so they never change the job's outcome.
pub struct StatsMiddleware {
    store: Arc<dyn Store>,
}

impl StatsMiddleware {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl Middleware for StatsMiddleware {
    fn wrap(&self, next: JobFn) -> JobFn {
        let store = self.store.clone();
        Arc::new(move |msg| {
            let next = next.clone();
            let store = store.clone();
            Box::pin(async move {
                let result = next(msg).await;
                let outcome = if result.is_ok() {
                    JobOutcome::Processed
                } else {
                    JobOutcome::Failed
                };
                if let Err(e) = store.increment_stats(outcome).await {
                    warn!(error = %e, "failed to update stats counters");
                }
                result
            })
        })
    }
}
