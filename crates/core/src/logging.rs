//! Tracing setup shared by the CLI and tests.

use std::sync::Once;

use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are ignored.
///
/// `RUST_LOG` wins when set; otherwise the level is `warn`, or `debug` when
/// `verbose` is true. Output goes to stderr so stdout stays machine-readable.
pub fn init_tracing(verbose: bool) {
    INIT.call_once(|| {
        let fallback = if verbose { "debug" } else { "warn" };
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

        let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(verbose);

        // Another subscriber may already be installed (e.g. by a test harness).
        let _ = tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init();

        debug!("tracing initialized");
    });
}
