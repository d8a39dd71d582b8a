// Logging setup
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default directives when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,linewatch_core=info";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`.
///
/// Returns false if a global subscriber was already installed, so calling
/// it twice is harmless.
///
/// # Environment Variables
///
/// - `RUST_LOG`: filter directives (e.g. `linewatch_core::hub=debug`)
/// - `LINEWATCH_LOG_FORMAT`: `compact` for single-line output without targets
pub fn init_tracing(default_filter: &str) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let compact = std::env::var("LINEWATCH_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("compact"))
        .unwrap_or(false);

    let result = if compact {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    match result {
        Ok(()) => {
            info!(target: "telemetry", "Tracing initialized");
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing("warn");
        assert!(!init_tracing("warn"));
    }
}
