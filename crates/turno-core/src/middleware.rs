//! The middleware pipeline wrapping every handler invocation.
//!
//! A middleware takes the next link in the chain and returns a new link with
//! the same signature. The chain is composed once at worker registration and
//! invoked left to right, with the user handler as the terminal element.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;

use crate::error::ProcessError;
use crate::message::Msg;

/// Error type job handlers return. Anything `?`-compatible works; the
/// runtime records its `Display` output as the message's `error_message`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), ProcessError>> + Send>>;

/// One link of the processing chain: takes the message, yields the attempt's
/// outcome.
pub type JobFn = Arc<dyn Fn(Msg) -> JobFuture + Send + Sync>;

/// A composable wrapper around the rest of the chain.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: JobFn) -> JobFn;
}

/// Compose `middlewares` around `terminal`, left to right: the first
/// middleware observes the call outermost.
pub fn compose(middlewares: &[Arc<dyn Middleware>], terminal: JobFn) -> JobFn {
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, middleware| middleware.wrap(next))
}

/// Adapt a user handler into the terminal chain link. Panics inside the
/// handler are recovered here and surfaced as [`ProcessError::Panic`], so
/// the rest of the chain observes them like any other failure and the worker
/// slot survives.
pub fn handler_fn<F, Fut>(handler: F) -> JobFn
where
    F: Fn(Msg) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |msg: Msg| {
        let handler = handler.clone();
        Box::pin(async move {
            match AssertUnwindSafe(handler(msg)).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ProcessError::Handler(e.to_string())),
                Err(panic) => Err(ProcessError::Panic(panic_message(panic))),
            }
        })
    })
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
