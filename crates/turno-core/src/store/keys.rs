//! Key naming for the Redis-compatible layout.
//!
//! Every key the runtime touches is built here so the namespace prefix is
//! applied in exactly one place. A non-empty namespace is normalized to end
//! with `:`, matching what existing producers and consumers of this
//! convention write.

/// Namespace-aware key builder. Cheap to clone; owned by every component
/// that addresses the backend directly.
#[derive(Debug, Clone)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: &str) -> Self {
        let namespace = if namespace.is_empty() || namespace.ends_with(':') {
            namespace.to_string()
        } else {
            format!("{namespace}:")
        };
        Self { namespace }
    }

    /// The normalized prefix (empty, or ending in `:`).
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Live queue list: `<ns>queue:<name>`.
    pub fn queue(&self, name: &str) -> String {
        format!("{}queue:{name}", self.namespace)
    }

    /// Set of known queue names: `<ns>queues`.
    pub fn queues(&self) -> String {
        format!("{}queues", self.namespace)
    }

    /// One-shot scheduled jobs, scored by target epoch seconds.
    pub fn schedule(&self) -> String {
        format!("{}schedule", self.namespace)
    }

    /// Retry set, scored by next-attempt epoch seconds.
    pub fn retry(&self) -> String {
        format!("{}retry", self.namespace)
    }

    /// Dead set: bounded repository of messages with exhausted retries.
    pub fn dead(&self) -> String {
        format!("{}dead", self.namespace)
    }

    /// Per-(process, queue) in-flight list. `process` is the stable process
    /// identity (`<hostname>:<process_id>`), so a restarted process with the
    /// same configuration finds its predecessor's list.
    pub fn inflight(&self, process: &str, queue: &str) -> String {
        format!("{}{process}:{queue}:inprogress", self.namespace)
    }

    /// Heartbeat hash for one process: `<ns>processes:<identity>`.
    pub fn process(&self, identity: &str) -> String {
        format!("{}processes:{identity}", self.namespace)
    }

    /// Set of live process identities: `<ns>processes`.
    pub fn processes(&self) -> String {
        format!("{}processes", self.namespace)
    }

    /// Busy-slot snapshot hash published alongside the heartbeat.
    pub fn work(&self, identity: &str) -> String {
        format!("{}{identity}:work", self.namespace)
    }

    /// Lifetime stats counter: `<ns>stat:processed` / `<ns>stat:failed`.
    pub fn stat(&self, name: &str) -> String {
        format!("{}stat:{name}", self.namespace)
    }

    /// Day-bucketed stats counter: `<ns>stat:<name>:<yyyy-mm-dd>`.
    pub fn stat_day(&self, name: &str, day: &str) -> String {
        format!("{}stat:{name}:{day}", self.namespace)
    }

    /// Uniqueness guard for [`crate::producer::Producer::enqueue_unique`].
    pub fn unique(&self, queue: &str, digest: &str) -> String {
        format!("{}unique:{queue}:{digest}", self.namespace)
    }
}
