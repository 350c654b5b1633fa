use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::middleware::{JobFn, Middleware};

/// Logs the span of each processing attempt. Sits outermost in the default
/// stack so its timing covers retry scheduling and stats updates too.
pub struct LogMiddleware;

impl Middleware for LogMiddleware {
    fn wrap(&self, next: JobFn) -> JobFn {
        Arc::new(move |msg| {
            let next = next.clone();
            Box::pin(async move {
                let jid = msg.jid().to_string();
                let queue = msg.queue().to_string();
                let class = msg.class().to_string();
                let start = Instant::now();
                debug!(%jid, %queue, %class, "job started");
                let result = next(msg).await;
                let elapsed_ms = start.elapsed().as_millis() as u64;
                match &result {
                    Ok(()) => info!(%jid, %queue, %class, elapsed_ms, "job done"),
                    Err(e) => {
                        error!(%jid, %queue, %class, elapsed_ms, kind = e.kind(), error = %e, "job failed")
                    }
                }
                result
            })
        })
    }
}
