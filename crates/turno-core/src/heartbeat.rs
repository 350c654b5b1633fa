//! Process liveness publishing.
//!
//! The heartbeat moves through Starting → Running → Quiet → Stopped with the
//! manager lifecycle: an initial publish on start, a refresh every
//! [`BEAT_INTERVAL`] (with `quiet = true` once the manager is quiescing), and
//! removal of the record on stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::message::now_epoch_seconds;
use crate::store::Store;
use crate::worker::RunningSet;

pub(crate) const BEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Static process description published under the heartbeat's `info` subkey.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub hostname: String,
    pub pid: u32,
    pub started_at: f64,
    pub queues: Vec<String>,
    pub concurrency: usize,
    pub tag: String,
    pub labels: Vec<String>,
    pub identity: String,
}

/// One heartbeat publication, as handed to the store.
#[derive(Debug, Clone)]
pub struct HeartbeatRecord {
    pub identity: String,
    pub beat: f64,
    pub quiet: bool,
    /// Serialized [`ProcessInfo`].
    pub info: String,
    /// Busy-slot snapshot: (tid, serialized running-job record).
    pub work: Vec<(String, String)>,
}

pub(crate) struct Heartbeat {
    store: Arc<dyn Store>,
    identity: String,
    info: ProcessInfo,
    quiet: Arc<AtomicBool>,
    running: Arc<RunningSet>,
    shutdown: CancellationToken,
}

impl Heartbeat {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        info: ProcessInfo,
        quiet: Arc<AtomicBool>,
        running: Arc<RunningSet>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            identity: info.identity.clone(),
            info,
            quiet,
            running,
            shutdown,
        }
    }

    pub(crate) async fn run(self) {
        info!(identity = %self.identity, "heartbeat started");
        self.beat().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(BEAT_INTERVAL) => self.beat().await,
            }
        }
        if let Err(e) = self.store.remove_heartbeat(&self.identity).await {
            warn!(identity = %self.identity, error = %e, "failed to remove heartbeat record");
        }
        info!(identity = %self.identity, "heartbeat stopped");
    }

    async fn beat(&self) {
        let record = HeartbeatRecord {
            identity: self.identity.clone(),
            beat: now_epoch_seconds(),
            quiet: self.quiet.load(Ordering::Relaxed),
            info: serde_json::to_string(&self.info).unwrap_or_default(),
            work: self.running.snapshot(),
        };
        // Publish failures are absorbed here; the next tick retries.
        if let Err(e) = self.store.publish_heartbeat(&record).await {
            warn!(identity = %self.identity, error = %e, "heartbeat publish failed");
        }
    }
}

pub(crate) fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Per-boot identity: `<hostname>:<pid>:<8-hex-random>`, stable for the
/// process lifetime.
pub(crate) fn identity() -> String {
    let nonce: [u8; 4] = rand::rng().random();
    format!("{}:{}:{}", hostname(), std::process::id(), hex::encode(nonce))
}

/// Stable identity used for in-flight list keys: `<hostname>:<process_id>`.
/// Survives restarts so recovery can find the previous run's lists.
pub(crate) fn process_identity(process_id: &str) -> String {
    format!("{}:{process_id}", hostname())
}
