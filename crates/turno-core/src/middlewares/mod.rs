//! Built-in middlewares.
//!
//! The default stack is logging → retry → stats (outermost first): logs span
//! the entire processing, and stats count the post-retry-decision outcome.

mod logging;
mod retry;
mod stats;

use std::sync::{Arc, Mutex};

pub use logging::LogMiddleware;
pub use retry::{RetriesExhaustedHandler, RetryMiddleware};
pub use stats::StatsMiddleware;

use crate::middleware::Middleware;
use crate::store::Store;

/// The default middleware stack over a store.
pub fn default_middlewares(store: Arc<dyn Store>) -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(LogMiddleware),
        Arc::new(RetryMiddleware::new(store.clone())),
        Arc::new(StatsMiddleware::new(store)),
    ]
}

/// Default stack wired to the manager's shared retries-exhausted handlers.
pub(crate) fn default_stack(
    store: Arc<dyn Store>,
    exhausted: Arc<Mutex<Vec<RetriesExhaustedHandler>>>,
) -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(LogMiddleware),
        Arc::new(RetryMiddleware::with_exhausted_handlers(
            store.clone(),
            exhausted,
        )),
        Arc::new(StatsMiddleware::new(store)),
    ]
}
