//! Write-side API: assemble envelopes and hand them to the store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{new_jid, now_epoch_seconds, Msg, RetryPolicy};
use crate::store::Store;

/// Per-enqueue knobs. The named [`Producer`] operations are thin fronts over
/// these.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Retry policy written into the envelope. Defaults to the standard
    /// 25-attempt budget.
    pub retry: RetryPolicy,
    /// Earliest processing time as epoch seconds; routes the message to the
    /// scheduled set instead of a live queue.
    pub at: Option<f64>,
}

/// Enqueues messages honoring the shared on-wire layout, so any consumer of
/// the convention (in any language) can process them.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn Store>,
}

impl Producer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Enqueue for immediate processing. Returns the new message's jid.
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: impl serde::Serialize,
    ) -> Result<String> {
        self.enqueue_with_options(queue, class, args, EnqueueOptions::default())
            .await
    }

    /// Enqueue for processing no earlier than `delay_seconds` from now.
    pub async fn enqueue_in(
        &self,
        queue: &str,
        class: &str,
        args: impl serde::Serialize,
        delay_seconds: f64,
    ) -> Result<String> {
        let opts = EnqueueOptions {
            at: Some(now_epoch_seconds() + delay_seconds),
            ..Default::default()
        };
        self.enqueue_with_options(queue, class, args, opts).await
    }

    /// Enqueue for processing no earlier than `at` (epoch seconds).
    pub async fn enqueue_at(
        &self,
        queue: &str,
        class: &str,
        args: impl serde::Serialize,
        at: f64,
    ) -> Result<String> {
        let opts = EnqueueOptions {
            at: Some(at),
            ..Default::default()
        };
        self.enqueue_with_options(queue, class, args, opts).await
    }

    pub async fn enqueue_with_options(
        &self,
        queue: &str,
        class: &str,
        args: impl serde::Serialize,
        opts: EnqueueOptions,
    ) -> Result<String> {
        let args = encode_args(args)?;
        let msg = build_message(queue, class, args, &opts);
        let jid = msg.jid().to_string();
        let at = opts.at.unwrap_or(0.0);
        self.store.enqueue_message(queue, at, &msg.to_json()).await?;
        debug!(%jid, %queue, %class, scheduled = at > 0.0, "message enqueued");
        Ok(jid)
    }

    /// Enqueue unless an identical `(class, args, queue)` was enqueued within
    /// the last `ttl`. Returns the jid and whether this call enqueued.
    pub async fn enqueue_unique(
        &self,
        queue: &str,
        class: &str,
        args: impl serde::Serialize,
        ttl: Duration,
    ) -> Result<(String, bool)> {
        let args = encode_args(args)?;
        let digest = unique_digest(class, &args, queue);
        let mut msg = build_message(queue, class, args, &EnqueueOptions::default());
        msg.set("unique_for", ttl.as_secs());
        let jid = msg.jid().to_string();
        let enqueued = self
            .store
            .enqueue_unique_message(queue, &msg.to_json(), &digest, ttl)
            .await?;
        debug!(%jid, %queue, %class, enqueued, "unique enqueue");
        Ok((jid, enqueued))
    }
}

fn encode_args(args: impl serde::Serialize) -> Result<Vec<Value>> {
    let value = serde_json::to_value(args).map_err(|e| Error::Encode(e.to_string()))?;
    match value {
        Value::Array(args) => Ok(args),
        other => Err(Error::Encode(format!(
            "args must serialize to a JSON array, got {}",
            type_of(&other)
        ))),
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn build_message(queue: &str, class: &str, args: Vec<Value>, opts: &EnqueueOptions) -> Msg {
    let now = now_epoch_seconds();
    let mut fields = Map::new();
    fields.insert("queue".to_string(), Value::from(queue));
    fields.insert("class".to_string(), Value::from(class));
    fields.insert("args".to_string(), Value::Array(args));
    fields.insert("jid".to_string(), Value::from(new_jid()));
    fields.insert("retry".to_string(), opts.retry.to_value());
    fields.insert("created_at".to_string(), Value::from(now));
    fields.insert("enqueued_at".to_string(), Value::from(now));
    if let Some(at) = opts.at {
        fields.insert("at".to_string(), Value::from(at));
    }
    Msg::from_fields(fields)
}

/// Uniqueness digest: `SHA-256(class ∥ NUL ∥ canonical(args) ∥ NUL ∥ queue)`,
/// hex-encoded. `canonical(args)` is the whitespace-free JSON serialization
/// with object keys in input order.
fn unique_digest(class: &str, args: &[Value], queue: &str) -> String {
    let canonical = Value::Array(args.to_vec()).to_string();
    let mut hasher = Sha256::new();
    hasher.update(class.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    hasher.update([0u8]);
    hasher.update(queue.as_bytes());
    hex::encode(hasher.finalize())
}
