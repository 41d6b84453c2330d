use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LogLevel};

/// Filter directives appended to the configured level. The notify
/// backend fires once per inotify event during a daemon failover and
/// would drown the recovery logs at `debug`.
const QUIET_DEPENDENCIES: &str = "notify=warn";

/// Initialize logging for the agent.
///
/// `RUST_LOG` overrides everything when set; otherwise the configured
/// level applies, with noisy dependencies capped (see
/// `QUIET_DEPENDENCIES`). JSON output is flattened for log
/// aggregators; text output is single-line so journald keeps one
/// record per event. Calling this twice is an error, not a panic —
/// the supervising init system restarts the agent often enough that
/// a miswired double call must surface cleanly.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_ansi(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().compact().with_target(true))
            .try_init(),
    };

    result.map_err(|err| ConfigError::Invalid(format!("logging already initialized: {err}")))
}

fn default_filter(level: LogLevel) -> String {
    format!("{},{QUIET_DEPENDENCIES}", level.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_valid_for_every_level() {
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            let filter = default_filter(level);
            assert!(
                EnvFilter::try_new(&filter).is_ok(),
                "{filter} should be a valid filter"
            );
        }
    }

    #[test]
    fn default_filter_quiets_the_watcher_backend() {
        assert!(default_filter(LogLevel::Debug).contains("notify=warn"));
    }

    #[test]
    fn second_init_errors_instead_of_panicking() {
        // The global subscriber is process-wide; this is the only test
        // in the crate that installs one.
        assert!(init_logging(LogLevel::Info, LogFormat::Text).is_ok());
        assert!(matches!(
            init_logging(LogLevel::Info, LogFormat::Text),
            Err(ConfigError::Invalid(_))
        ));
    }
}
