//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` doesn't provide a directive.
    pub default_level: Level,
    pub format: LogFormat,
    /// Include file names and line numbers in each line.
    pub with_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            default_level: Level::INFO,
            format: LogFormat::Pretty,
            with_location: true,
        }
    }
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Initialize the global subscriber.
///
/// Calling this more than once is harmless, only the first call takes
/// effect.
pub fn init(conf: LogConfig) {
    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter(conf.default_level))
        .with_file(conf.with_location)
        .with_line_number(conf.with_location);

    let _ = match conf.format {
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };
}

/// Initialize logging for tests, writing through the test harness so output
/// is only shown for failing tests.
pub fn init_test() {
    let subscriber = FmtSubscriber::builder()
        .with_test_writer()
        .with_env_filter(env_filter(Level::DEBUG))
        .with_file(true)
        .with_line_number(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_ok() {
        init_test();
        init_test();
        init(LogConfig::default());
        tracing::debug!("logging initialized");
    }
}
