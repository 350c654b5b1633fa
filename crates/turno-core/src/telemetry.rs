use tracing::{info_span, Span};
use tracing_subscriber::EnvFilter;

/// Default filter directives: this runtime's loops at `info`, dependencies
/// at `warn`. `RUST_LOG` replaces the whole set when present.
const DEFAULT_DIRECTIVES: &str = "warn,turno_core=info";

/// Install the process-wide subscriber for a worker binary: human-readable
/// output in debug builds, JSON for log aggregation in release builds.
/// Backs off when the embedding process already installed a subscriber, so
/// library users keep their own setup.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    if cfg!(debug_assertions) {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    }
}

/// The span every runtime loop and job task runs inside. Several worker
/// processes routinely share one log stream; the identity (and tag, when
/// configured) keeps their lines attributable.
pub(crate) fn process_span(identity: &str, tag: &str) -> Span {
    if tag.is_empty() {
        info_span!("worker", %identity)
    } else {
        info_span!("worker", %identity, %tag)
    }
}
