#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use turno_core::{Manager, MemoryStore, Options};

/// Options tuned for tests: fast poller ticks, short shutdown grace.
pub fn test_options() -> Options {
    Options {
        process_id: "e2e-worker".into(),
        poll_interval_ms: 50,
        shutdown_timeout_ms: 2_000,
        ..Default::default()
    }
}

/// A manager over a fresh in-memory store.
pub fn memory_manager() -> (Manager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(""));
    let manager =
        Manager::with_store(test_options(), store.clone()).expect("valid test options");
    (manager, store)
}

/// A manager running in the background until [`RunningManager::stop`].
pub struct RunningManager {
    pub manager: Arc<Manager>,
    pub shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

pub fn start(manager: Manager) -> RunningManager {
    let manager = Arc::new(manager);
    let shutdown = CancellationToken::new();
    let handle = {
        let manager = manager.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            manager.run(shutdown).await.expect("manager run failed");
        })
    };
    RunningManager {
        manager,
        shutdown,
        handle,
    }
}

impl RunningManager {
    /// Trip the shutdown token and wait for the quiesce → stop sequence.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.expect("manager task panicked");
    }
}

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !cond() {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

pub fn epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as f64
        / 1e9
}
