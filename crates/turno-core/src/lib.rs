pub mod args;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod message;
pub mod middleware;
pub mod middlewares;
pub mod producer;
pub mod stats;
pub mod store;
pub mod telemetry;

mod fetcher;
mod scheduled;
mod worker;

pub use args::{decode_args, ArgField, ArgKind, ArgValue, ArgsError};
pub use config::Options;
pub use error::{Error, ProcessError, Result, StoreError, StoreResult};
pub use manager::Manager;
pub use message::{new_jid, Msg, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use middleware::{HandlerError, JobFn, Middleware};
pub use middlewares::{
    default_middlewares, LogMiddleware, RetriesExhaustedHandler, RetryMiddleware, StatsMiddleware,
};
pub use producer::{EnqueueOptions, Producer};
pub use stats::{JobOutcome, QueueStats, StatsSnapshot};
pub use store::{Keys, MemoryStore, RedisStore, Store};
