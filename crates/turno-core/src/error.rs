/// Low-level store errors (backend connectivity, serialization), plus the two
/// sentinel conditions the runtime loops branch on.
/// This is the error type for the `Store` trait — store operations can only
/// fail with infrastructure errors or sentinels, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A blocking dequeue observed no message within its timeout.
    #[error("queue empty")]
    Empty,

    /// No scheduled entry has a score at or below the probe time.
    #[error("no entry due")]
    NoneDue,
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Outcome of a single processing attempt of one message. This is what flows
/// through the middleware chain; `kind()` is the wire-visible `error_class`
/// recorded by the retry middleware.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The payload was not valid JSON or lacked a `class` field.
    #[error("decode error: {0}")]
    Decode(String),

    /// The handler returned an error. Carries the handler's message verbatim.
    #[error("{0}")]
    Handler(String),

    /// The handler panicked. Carries the panic payload when it was a string.
    #[error("{0}")]
    Panic(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessError {
    /// Stable name for this error kind, recorded as `error_class` on retried
    /// messages and used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Decode(_) => "decode-error",
            ProcessError::Handler(_) => "handler-error",
            ProcessError::Panic(_) => "panic",
            ProcessError::Store(_) => "backend-error",
        }
    }

    /// Whether this is a failure of the job itself (as opposed to the
    /// infrastructure around it). Only these participate in retry scheduling.
    pub fn is_job_failure(&self) -> bool {
        matches!(self, ProcessError::Handler(_) | ProcessError::Panic(_))
    }
}

/// Errors surfaced to the embedding process through the public API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The producer could not serialize the caller's arguments.
    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, Error>;
