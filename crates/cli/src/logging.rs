//! Logging setup for one-shot commands and the watcher

use std::path::PathBuf;

use semdex::{config::Config, dirs};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

fn current_config() -> Config {
  let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
  Config::load_for_folder(&cwd)
}

/// Console logging at the configured level (RUST_LOG overrides)
pub fn init_cli_logging() {
  let level = parse_log_level(&current_config().log.level);
  let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();
}

/// Rolling file logging for `watch`.
///
/// Returns the guard that must be kept alive for the duration of the program;
/// falls back to console logging when the log directory cannot be created.
pub fn init_watch_logging() -> Option<WorkerGuard> {
  let config = current_config();
  let level = parse_log_level(&config.log.level);
  let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  let log_dir = dirs::default_log_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    init_cli_logging();
    return None;
  }

  let file_appender = match config.log.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&log_dir, "semdex.log"),
    "never" => tracing_appender::rolling::never(&log_dir, "semdex.log"),
    _ => tracing_appender::rolling::daily(&log_dir, "semdex.log"),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
