//! Tracing subscriber setup for host applications.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "FOLIO_LOG";

/// Install the global subscriber.
///
/// With a log directory configured, output goes to a daily rolling file and
/// the returned guard must be held until shutdown so buffered lines are
/// flushed. Otherwise logs go to stderr and no guard is returned.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = build_filter(config)?;

  let (layer, guard) = match &config.directory {
    Some(directory) => {
      let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
      (layer, Some(guard))
    }
    None => (
      fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed(),
      None,
    ),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

/// Filter from `FOLIO_LOG` when set, the configured level otherwise.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
  match std::env::var(LOG_ENV) {
    Ok(directives) if !directives.trim().is_empty() => parse_filter(&directives),
    _ => parse_filter(&config.level),
  }
}

fn parse_filter(directives: &str) -> Result<EnvFilter> {
  EnvFilter::try_new(directives).map_err(|e| eyre!("Invalid log filter {:?}: {}", directives, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_configured_level_parses() {
    let filter = parse_filter("folio=debug,warn").unwrap();
    assert!(filter.to_string().contains("folio=debug"));
  }

  #[test]
  fn test_invalid_level_is_an_error() {
    assert!(parse_filter("folio=loud").is_err());
  }

  #[test]
  fn test_default_config_builds_a_filter() {
    let config = LoggingConfig::default();
    assert!(build_filter(&config).is_ok());
  }
}
