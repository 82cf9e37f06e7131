// The file-backed sink: an active log file, standalone crash reports and
// gzip archives of past sessions.

use super::crash_report::CrashReporter;
use super::LogSink;
use crate::archive::{ArchiveOutcome, Archiver};
use crate::dispatcher::DEFAULT_QUEUE_CAPACITY;
use crate::encoders::{self, EntryFormatter};
use crate::error::{Error, Result};
use crate::error_handling::{Diagnostics, InternalErrorSource};
use crate::model::{CrashEntry, LogEntry, LogLevel};
use crate::writer::ActiveLogWriter;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_ARCHIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Where and how a `FileSink` writes.
#[derive(Debug, Clone)]
pub struct FileSinkOptions {
  pub log_file: PathBuf,
  pub archive_directory: PathBuf,
  pub queue_capacity: usize,
  /// Bound on waiting for the writer to drain, for archival and flushes.
  pub archive_timeout: Duration,
  pub archive_on_dispose: bool,
  pub console_echo: bool,
  pub line_pattern: Option<String>,
}

impl FileSinkOptions {
  pub fn new(log_file: PathBuf, archive_directory: PathBuf) -> Self {
    Self {
      log_file,
      archive_directory,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      archive_timeout: DEFAULT_ARCHIVE_TIMEOUT,
      archive_on_dispose: true,
      console_echo: false,
      line_pattern: None,
    }
  }
}

pub struct FileSink {
  formatter: Box<dyn EntryFormatter>,
  writer: Arc<ActiveLogWriter>,
  archiver: Archiver,
  crash_reporter: CrashReporter,
  archive_on_dispose: bool,
  console_echo: bool,
  timeout: Duration,
  disposed: AtomicBool,
  diagnostics: Arc<Diagnostics>,
}

impl FileSink {
  /// Opens (or creates) the active log file and starts its writer task.
  pub fn new(options: FileSinkOptions, crash_reporter: CrashReporter) -> Result<Self> {
    Self::with_diagnostics(options, crash_reporter, Arc::new(Diagnostics::stderr()))
  }

  pub(crate) fn with_diagnostics(
    options: FileSinkOptions,
    crash_reporter: CrashReporter,
    diagnostics: Arc<Diagnostics>,
  ) -> Result<Self> {
    if options.queue_capacity == 0 {
      return Err(Error::SinkSetup {
        path: options.log_file,
        reason: "writer queue capacity must be greater than zero".to_string(),
      });
    }

    let writer = Arc::new(ActiveLogWriter::start(
      options.log_file,
      options.queue_capacity,
      diagnostics.clone(),
    )?);
    let archiver = Archiver::new(
      writer.clone(),
      options.archive_directory,
      options.archive_timeout,
    );

    Ok(Self {
      formatter: encoders::new_entry_formatter(options.line_pattern.as_deref()),
      writer,
      archiver,
      crash_reporter,
      archive_on_dispose: options.archive_on_dispose,
      console_echo: options.console_echo,
      timeout: options.archive_timeout,
      disposed: AtomicBool::new(false),
      diagnostics,
    })
  }

  pub fn active_path(&self) -> &Path {
    self.writer.path()
  }

  pub fn archive_directory(&self) -> &Path {
    self.archiver.archive_dir()
  }

  pub fn crash_directory(&self) -> &Path {
    self.crash_reporter.directory()
  }

  /// Rotates the active log file into the archive directory and keeps logging
  /// into a fresh file. Lines submitted meanwhile are not lost; they land in
  /// whichever file is active when the writer reaches them.
  pub fn archive(&self) -> Result<ArchiveOutcome> {
    if self.disposed.load(Ordering::SeqCst) {
      return Err(Error::SinkClosed);
    }
    self.archiver.archive()
  }

  fn echo(&self, level: LogLevel, line: &str) {
    let color = match level {
      LogLevel::Debug => "\u{1b}[36m",
      LogLevel::Info => "\u{1b}[32m",
      LogLevel::Warn => "\u{1b}[33m",
      LogLevel::Error => "\u{1b}[31m",
      LogLevel::Critical => "\u{1b}[1;31m",
    };
    println!("{}{}\u{1b}[0m", color, line);
  }

  fn report_archive_error(&self, error: Error, context: &str) {
    self.diagnostics.report(
      InternalErrorSource::Archive {
        path: self.active_path().display().to_string(),
      },
      error,
      Some(context.to_string()),
    );
  }
}

impl LogSink for FileSink {
  /// Queues the line for the writer task. Appends happen asynchronously, so an
  /// error here reports lines that failed to reach the file since the previous
  /// `write_log` or `flush`; the current line is still queued.
  fn write_log(&self, entry: &LogEntry) -> Result<()> {
    if self.disposed.load(Ordering::SeqCst) {
      return Err(Error::SinkClosed);
    }
    let earlier_failure = self.writer.take_failure();
    let line = self.formatter.format_entry(entry);
    if self.console_echo {
      self.echo(entry.level, &line);
    }
    self.writer.append(line)?;
    match earlier_failure {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  fn write_crash(&self, entry: &CrashEntry) -> Result<()> {
    if self.disposed.load(Ordering::SeqCst) {
      return Err(Error::SinkClosed);
    }
    self.crash_reporter.write(entry).map(|_| ())
  }

  fn flush(&self) -> Result<()> {
    if self.disposed.load(Ordering::SeqCst) {
      return Ok(());
    }
    self.writer.flush(self.timeout)
  }

  fn dispose(&self) {
    if self.disposed.swap(true, Ordering::SeqCst) {
      return;
    }

    // The writer drains what is queued and releases the file handle.
    self.writer.close();
    if let Err(e) = self.writer.stop(self.timeout) {
      // Never archive a file the writer may still be appending to.
      self.report_archive_error(e, "stopping the writer on dispose");
      return;
    }

    if self.archive_on_dispose {
      match self.archiver.archive_final() {
        Ok(ArchiveOutcome::Archived(path)) => {
          println!("[cinder_log] Archived session log to {:?}", path);
        }
        Ok(ArchiveOutcome::Skipped) => {}
        Err(e) => self.report_archive_error(e, "archiving on dispose"),
      }
    }
  }
}

impl Drop for FileSink {
  fn drop(&mut self) {
    self.dispose();
  }
}
