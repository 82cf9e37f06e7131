use chrono::{DateTime, Utc};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;

/// Severity tag carried by every `LogEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
  Debug,
  Info,
  Warn,
  Error,
  Critical,
}

impl LogLevel {
  /// The upper-case tag written into the active log file.
  pub fn as_str(&self) -> &'static str {
    match self {
      LogLevel::Debug => "DEBUG",
      LogLevel::Info => "INFO",
      LogLevel::Warn => "WARN",
      LogLevel::Error => "ERROR",
      LogLevel::Critical => "CRITICAL",
    }
  }
}

impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl From<tracing::Level> for LogLevel {
  fn from(level: tracing::Level) -> Self {
    match level {
      tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
      tracing::Level::INFO => LogLevel::Info,
      tracing::Level::WARN => LogLevel::Warn,
      tracing::Level::ERROR => LogLevel::Error,
    }
  }
}

/// A single log line as submitted by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
  /// Captured when the entry is built, not when it is enqueued or written.
  pub timestamp: DateTime<Utc>,
  pub level: LogLevel,
  pub category: String,
  pub message: String,
}

impl LogEntry {
  pub fn new<C, M>(level: LogLevel, category: C, message: M) -> Self
  where
    C: Into<String>,
    M: Into<String>,
  {
    LogEntry {
      timestamp: Utc::now(),
      level,
      category: category.into(),
      message: message.into(),
    }
  }
}

/// Identity of the thread that produced a crash entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
  pub id: String,
  pub name: Option<String>,
}

impl ThreadSnapshot {
  pub fn current() -> Self {
    let current_thread = std::thread::current();
    // Extract the raw ID from the `Debug` output of `ThreadId`.
    let debug_id = format!("{:?}", current_thread.id());
    let id = debug_id
      .strip_prefix("ThreadId(")
      .and_then(|s| s.strip_suffix(')'))
      .unwrap_or(&debug_id)
      .to_string();
    ThreadSnapshot {
      id,
      name: current_thread.name().map(str::to_string),
    }
  }

  pub fn is_main(&self) -> bool {
    self.name.as_deref() == Some("main")
  }

  /// Guessed from the thread name: the library's own consumers and anything
  /// named like a pool or worker thread.
  pub fn is_pool_worker(&self) -> bool {
    self.name.as_deref().is_some_and(|name| {
      name.starts_with("cinder-log-") || name.contains("worker") || name.contains("pool")
    })
  }
}

/// A captured error: its kind, message, optional native code and stack, and
/// the error that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
  pub kind: String,
  pub message: String,
  pub code: Option<i64>,
  pub backtrace: Option<String>,
  pub cause: Option<Box<ErrorRecord>>,
}

impl ErrorRecord {
  pub fn new<K, M>(kind: K, message: M) -> Self
  where
    K: Into<String>,
    M: Into<String>,
  {
    ErrorRecord {
      kind: kind.into(),
      message: message.into(),
      code: None,
      backtrace: None,
      cause: None,
    }
  }

  pub fn with_code(mut self, code: i64) -> Self {
    self.code = Some(code);
    self
  }

  pub fn with_backtrace<B: Into<String>>(mut self, backtrace: B) -> Self {
    self.backtrace = Some(backtrace.into());
    self
  }

  /// Appends `cause` at the innermost end of this record's chain.
  pub fn caused_by(mut self, cause: ErrorRecord) -> Self {
    let mut slot = &mut self.cause;
    while let Some(inner) = slot {
      slot = &mut inner.cause;
    }
    *slot = Some(Box::new(cause));
    self
  }

  /// Records `error` and its whole `source()` chain. The stack of the calling
  /// site is captured for the outermost record.
  pub fn from_error<E>(error: &E) -> Self
  where
    E: StdError + 'static,
  {
    let mut record = Self::from_dyn(error);
    record.kind = std::any::type_name::<E>().to_string();
    record.backtrace = capture_backtrace();

    let mut source = error.source();
    while let Some(inner) = source {
      record = record.caused_by(Self::from_dyn(inner));
      source = inner.source();
    }
    record
  }

  /// Records a panic raised anywhere in the process.
  pub fn from_panic(info: &std::panic::PanicHookInfo<'_>) -> Self {
    let payload = info.payload();
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "Box<dyn Any>".to_string()
    };
    let message = match info.location() {
      Some(location) => format!("{} (at {})", message, location),
      None => message,
    };

    let mut record = ErrorRecord::new("panic", message);
    record.backtrace = capture_backtrace();
    record
  }

  /// Walks the chain from this record to its innermost cause.
  pub fn chain(&self) -> impl Iterator<Item = &ErrorRecord> {
    std::iter::successors(Some(self), |record| record.cause.as_deref())
  }

  fn from_dyn(error: &(dyn StdError + 'static)) -> Self {
    let (kind, code) = match error.downcast_ref::<std::io::Error>() {
      Some(io_error) => (
        "std::io::Error".to_string(),
        io_error.raw_os_error().map(i64::from),
      ),
      None => (kind_from_debug(error), None),
    };
    ErrorRecord {
      kind,
      message: error.to_string(),
      code,
      backtrace: None,
      cause: None,
    }
  }
}

/// Best guess at a type name for an erased error: the leading identifier of its
/// `Debug` rendering (`ParseIntError { .. }` gives `ParseIntError`).
fn kind_from_debug(error: &dyn StdError) -> String {
  let debug = format!("{:?}", error);
  let end = debug
    .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
    .unwrap_or(debug.len());
  if end == 0 {
    "UnknownError".to_string()
  } else {
    debug[..end].to_string()
  }
}

fn capture_backtrace() -> Option<String> {
  let backtrace = Backtrace::force_capture();
  match backtrace.status() {
    BacktraceStatus::Captured => Some(backtrace.to_string()),
    _ => None,
  }
}

/// A crash as submitted by a caller.
#[derive(Debug, Clone)]
pub struct CrashEntry {
  pub timestamp: DateTime<Utc>,
  pub error: ErrorRecord,
  /// The thread that reported the crash, not the one that writes it.
  pub thread: ThreadSnapshot,
}

impl CrashEntry {
  pub fn new(error: ErrorRecord) -> Self {
    CrashEntry {
      timestamp: Utc::now(),
      error,
      thread: ThreadSnapshot::current(),
    }
  }

  pub fn from_error<E>(error: &E) -> Self
  where
    E: StdError + 'static,
  {
    Self::new(ErrorRecord::from_error(error))
  }
}
