//! `cinder_log` - non-blocking in-process logging and crash reporting.
//!
//! Callers submit log and crash entries without blocking. Two background
//! consumers drain them into a file sink, which appends lines to an active
//! log file, writes standalone crash reports and rotates the active file into
//! `{date}-{n}.log.gz` archives.

// Declare modules following the file structure
pub mod archive;
pub mod config;
pub mod dispatcher;
pub mod encoders;
pub mod error;
pub mod error_handling;
pub mod global;
pub mod init;
pub mod model;
pub mod platform;
pub mod sink;
pub mod subscriber;
pub mod system_info;
mod writer;

// Re-export key public types for easier use by library consumers.
pub use archive::ArchiveOutcome;
pub use config::ConfigInternal;
pub use dispatcher::{Logger, LoggerStats};
pub use error::{Error, Result};
pub use error_handling::{InternalErrorReport, InternalErrorSource};
pub use model::{CrashEntry, ErrorRecord, LogEntry, LogLevel, ThreadSnapshot};
pub use sink::{FileSink, LogSink, ProductInfo};

// Public initialization functions
pub use init::{find_config_file, init_from_file, init_with_collaborators, init_with_config, Collaborators};

use std::sync::Arc;

pub type InternalErrorReceiver = fibre::mpsc::BoundedReceiver<InternalErrorReport>;

// This will be the main struct returned by initialization.
#[must_use = "Dropping the InitResult shuts logging down; keep it alive for the life of the process"]
pub struct InitResult {
  logger: Logger,
  sink: Arc<FileSink>,
  // If error reporting is enabled, this receiver can be used to get internal error reports.
  pub internal_error_rx: Option<InternalErrorReceiver>,
}

impl InitResult {
  pub fn logger(&self) -> &Logger {
    &self.logger
  }

  pub fn sink(&self) -> &Arc<FileSink> {
    &self.sink
  }

  /// Rotates the active log file now instead of waiting for shutdown.
  pub fn archive(&self) -> Result<ArchiveOutcome> {
    self.sink.archive()
  }
}

impl Drop for InitResult {
  fn drop(&mut self) {
    println!("[cinder_log] Shutting down. Draining queues and archiving the active log...");
    self.logger.shutdown();
    println!("[cinder_log] Shutdown complete.");
  }
}
