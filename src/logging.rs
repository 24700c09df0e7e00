//! Diagnostic logging setup for the command line tool.
//!
//! Protocol events are `tracing` events at debug and trace level. They go to
//! stderr, filtered by `LOCKUTIL_LOG` (an `EnvFilter` directive, `warn` when
//! unset). Quiet mode turns everything off.

use std::io;
use std::sync::Once;
use tracing_log::LogTracer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{Layer, Registry, fmt, layer::SubscriberExt};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "LOCKUTIL_LOG";

const DEFAULT_FILTER: &str = "warn";

static INIT: Once = Once::new();

fn filter(quiet: bool) -> EnvFilter {
    if quiet {
        return EnvFilter::new("off");
    }
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Later calls do nothing.
pub fn init_logging(quiet: bool) {
    INIT.call_once(|| {
        // Route `log` records from dependencies into tracing.
        let _ = LogTracer::init();

        let stderr_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .without_time()
            .with_filter(filter(quiet));
        let subscriber = Registry::default().with(stderr_layer);

        // try_init would also install a LogTracer and fail on the one above.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
