//! Log output setup for the `TapGate` binary.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable: server events plus
/// one line per HTTP request.
pub const DEFAULT_LOG_FILTER: &str = "tapgate_server=info,tapgate_core=info,tower_http=info";

/// Build the level filter from `RUST_LOG`, falling back to
/// [`DEFAULT_LOG_FILTER`].
pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber. `log_json` switches to one JSON object per
/// line for log aggregation.
pub fn init_tracing(log_json: bool) {
    let registry = tracing_subscriber::registry().with(log_filter());
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        let filter = EnvFilter::new(DEFAULT_LOG_FILTER);
        assert!(filter.to_string().contains("tapgate_server=info"));
    }
}
