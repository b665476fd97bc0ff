//! Subscriber bootstrap for binaries and benches.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application. With the `tracing-basic` feature, [`init_tracing`]
//! installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).

/// Output format of the bootstrap subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global subscriber. Returns `false` if one was already set.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(format: LogFormat) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

/// Stub for when tracing-subscriber is not enabled
#[cfg(not(feature = "tracing-basic"))]
pub fn init_tracing(_format: LogFormat) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[cfg(not(feature = "tracing-basic"))]
    #[test]
    fn test_stub_installs_nothing() {
        assert!(!init_tracing(LogFormat::Json));
    }
}
