//! Log output for the app shell
//!
//! Filter directives come from `MOTO_TRACKER_LOG` (e.g.
//! `moto_tracker_lib=debug,reqwest=warn`), falling back to `info`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "MOTO_TRACKER_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

/// Filter from `value`, or the default when it is unset or invalid
pub fn filter_from(value: Option<&str>) -> EnvFilter {
    value
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let directives = std::env::var(LOG_ENV).ok();
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter_from(directives.as_deref()))
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(env = LOG_ENV, "logging initialized");
    }
}
