use std::collections::BTreeMap;

use serde::Serialize;

/// Outcome of one processing attempt, as counted by the stats middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Processed,
    Failed,
}

impl JobOutcome {
    /// Counter name this outcome increments (`stat:<name>`).
    pub(crate) fn counter(self) -> &'static str {
        match self {
            JobOutcome::Processed => "processed",
            JobOutcome::Failed => "failed",
        }
    }
}

/// Per-queue portion of the metrics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Messages waiting in the live queue.
    pub enqueued: u64,
    /// Messages in in-flight lists for this queue, across all processes.
    pub in_flight: u64,
}

/// Read-only counters snapshot exposed to the embedding process. All values
/// come from the backend; there are no in-process counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub processed_today: u64,
    pub failed_today: u64,
    pub dead: u64,
    pub retry: u64,
    pub scheduled: u64,
    pub queues: BTreeMap<String, QueueStats>,
}

/// Day bucket used by the daily stats counters.
pub(crate) fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
