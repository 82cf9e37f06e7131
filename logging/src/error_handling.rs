use fibre::{error::TrySendError as FibreTrySendError, mpsc::BoundedSender};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalErrorSource {
  LogWrite,
  CrashWrite,
  WriterIo { path: String },
  Archive { path: String },
  QueueOverflow { queue: &'static str },
}

// Implement Display for user-friendly printing in tests or logs if needed
impl fmt::Display for InternalErrorSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      InternalErrorSource::LogWrite => write!(f, "LogWrite"),
      InternalErrorSource::CrashWrite => write!(f, "CrashWrite"),
      InternalErrorSource::WriterIo { path } => write!(f, "WriterIo {{ path: \"{}\" }}", path),
      InternalErrorSource::Archive { path } => write!(f, "Archive {{ path: \"{}\" }}", path),
      InternalErrorSource::QueueOverflow { queue } => {
        write!(f, "QueueOverflow {{ queue: \"{}\" }}", queue)
      }
    }
  }
}

#[derive(Debug)]
pub struct InternalErrorReport {
  pub source: InternalErrorSource,
  pub error_message: String,
  pub context: Option<String>,
  pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl InternalErrorReport {
  pub(crate) fn new<E: fmt::Display>(
    source: InternalErrorSource,
    error: E,
    context: Option<String>,
  ) -> Self {
    Self {
      source,
      error_message: error.to_string(),
      context,
      timestamp: chrono::Utc::now(),
    }
  }
}

/// Where pipeline failures end up. Nothing inside the pipeline raises to a
/// caller, so this is the only place failures become observable.
pub(crate) struct Diagnostics {
  tx: Option<BoundedSender<InternalErrorReport>>,
}

impl Diagnostics {
  /// Reports go straight to stderr.
  pub(crate) fn stderr() -> Self {
    Self { tx: None }
  }

  /// Reports go to the given channel; stderr is only used when it is full.
  pub(crate) fn channel(tx: BoundedSender<InternalErrorReport>) -> Self {
    Self { tx: Some(tx) }
  }

  pub(crate) fn report<E: fmt::Display>(
    &self,
    source: InternalErrorSource,
    error: E,
    context: Option<String>,
  ) {
    if let Some(tx) = &self.tx {
      let report = InternalErrorReport::new(source, error, context);
      match tx.try_send(report) {
        Ok(()) => {}
        Err(FibreTrySendError::Full(report)) => {
          eprintln!(
            "[cinder_log:ERROR] Internal error channel full. Dropping report from {}.",
            report.source
          );
        }
        Err(other) => {
          let report = other.into_inner();
          eprintln!(
            "[cinder_log:ERROR] {}: {}",
            report.source, report.error_message
          );
        }
      }
    } else {
      match context {
        Some(ctx) => eprintln!("[cinder_log:ERROR] {}: {} ({})", source, error, ctx),
        None => eprintln!("[cinder_log:ERROR] {}: {}", source, error),
      }
    }
  }
}
