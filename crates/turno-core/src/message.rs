use rand::Rng;
use serde_json::{Map, Value};

use crate::error::ProcessError;

/// Retry budget applied when a message carries `retry: true`.
pub const DEFAULT_MAX_RETRIES: u32 = 25;

/// Job envelope. A thin wrapper over the wire-format JSON object so that
/// unknown fields written by other producers survive a round trip untouched,
/// and numeric fields keep their original representation (integers stay
/// integers, floats stay floats).
#[derive(Debug, Clone, PartialEq)]
pub struct Msg {
    fields: Map<String, Value>,
}

/// The `retry` field of a message: absent/`false`, `true` (default budget),
/// or a bounded integer budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Do not retry on failure.
    Never,
    /// Retry with the default budget of [`DEFAULT_MAX_RETRIES`] attempts.
    #[default]
    Default,
    /// Retry at most this many times.
    Limit(u32),
}

impl RetryPolicy {
    /// Maximum number of retries, or `None` when retries are disabled.
    pub fn max_retries(&self) -> Option<u32> {
        match self {
            RetryPolicy::Never => None,
            RetryPolicy::Default => Some(DEFAULT_MAX_RETRIES),
            RetryPolicy::Limit(n) => Some(*n),
        }
    }

    /// Wire encoding of this policy for the `retry` field.
    pub(crate) fn to_value(self) -> Value {
        match self {
            RetryPolicy::Never => Value::Bool(false),
            RetryPolicy::Default => Value::Bool(true),
            RetryPolicy::Limit(n) => Value::from(n),
        }
    }
}

impl Msg {
    /// Parse a raw payload. Rejects anything that is not a JSON object with a
    /// string `class` field — such payloads cannot be routed to a handler.
    pub fn from_json(raw: &str) -> Result<Self, ProcessError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProcessError::Decode(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(ProcessError::Decode("payload is not a JSON object".into()));
        };
        if !fields.get("class").is_some_and(Value::is_string) {
            return Err(ProcessError::Decode("payload has no `class` field".into()));
        }
        Ok(Self { fields })
    }

    pub(crate) fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Serialize back to the wire format. Field order is insertion order.
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Unique job ID: 24 hex characters, assigned at enqueue time and
    /// preserved across retries.
    pub fn jid(&self) -> &str {
        self.str_field("jid")
    }

    /// Handler selector.
    pub fn class(&self) -> &str {
        self.str_field("class")
    }

    /// Destination queue, without namespace prefix.
    pub fn queue(&self) -> &str {
        self.str_field("queue")
    }

    /// Positional handler arguments, preserved verbatim from the wire.
    pub fn args(&self) -> &[Value] {
        self.fields
            .get("args")
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }

    /// Deserialize the `args` array into a caller-provided type (a tuple or a
    /// struct with a positional serde representation). This is the escape
    /// hatch for composite arguments the scalar decoder in [`crate::args`]
    /// refuses.
    pub fn typed_args<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Array(self.args().to_vec()))
    }

    pub fn retry(&self) -> RetryPolicy {
        match self.fields.get("retry") {
            Some(Value::Bool(true)) => RetryPolicy::Default,
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map_or(RetryPolicy::Never, RetryPolicy::Limit),
            _ => RetryPolicy::Never,
        }
    }

    /// Number of failed attempts recorded so far (0 before the first failure).
    pub fn retry_count(&self) -> u32 {
        self.fields
            .get("retry_count")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    }

    fn str_field(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

/// Generate a fresh jid: 12 random bytes, hex-encoded (24 characters).
pub fn new_jid() -> String {
    let bytes: [u8; 12] = rand::rng().random();
    hex::encode(bytes)
}

/// Current wall clock as fractional epoch seconds, the timestamp encoding
/// used everywhere on the wire.
pub(crate) fn now_epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as f64
        / 1e9
}
