// Durable targets for log and crash entries.

pub mod crash_report;
pub mod file;

use crate::error::Result;
use crate::model::{CrashEntry, LogEntry};

pub use crash_report::{CrashReporter, ProductInfo};
pub use file::{FileSink, FileSinkOptions};

/// A durable target for entries drained by the dispatcher.
///
/// The dispatcher calls `write_log` from one thread and `write_crash` from
/// another, never concurrently for the same event class. Errors are returned
/// to the dispatcher, which counts them; they never reach the caller that
/// submitted the entry.
pub trait LogSink: Send + Sync + 'static {
  fn write_log(&self, entry: &LogEntry) -> Result<()>;

  fn write_crash(&self, entry: &CrashEntry) -> Result<()>;

  /// Forces buffered log bytes to storage. Crash reports are unaffected.
  fn flush(&self) -> Result<()>;

  /// Stops accepting writes and releases the sink's resources. Only the
  /// first call has an effect.
  fn dispose(&self);
}
