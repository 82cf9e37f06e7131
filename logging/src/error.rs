use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the `cinder_log` library.
#[derive(Debug, Error)]
pub enum Error {
  #[error("Configuration file not found: {0}")]
  ConfigNotFound(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Failed to parse configuration: {0}")]
  ConfigParse(String),

  #[error("Invalid configuration value for '{field}': {message}")]
  InvalidConfigValue { field: String, message: String },

  #[error("Failed to initialize tracing_log bridge: {0}")]
  LogBridgeInit(String),

  #[error("Failed to set global tracing subscriber: {0}")]
  GlobalSubscriberSet(String),

  #[error("Sink setup failed for {path:?}: {reason}")]
  SinkSetup { path: PathBuf, reason: String },

  #[error("Failed to write to {path:?}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("The sink has been disposed and no longer accepts writes")]
  SinkClosed,

  #[error("The {queue} queue is full")]
  QueueFull { queue: &'static str },

  #[error("Timed out after {0:?} waiting for the log writer to drain")]
  ArchiveTimeout(Duration),

  #[error("Failed to write crash report: {0}")]
  CrashReport(String),

  #[error("Internal library error: {0}")]
  Internal(String), // For unexpected situations
}

/// A specialized `Result` type for `cinder_log` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
