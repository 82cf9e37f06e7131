//! The process-wide logger handle and its convenience calls.
//!
//! Everything here forwards to the `Logger` installed by initialization.
//! Before that (and after shutdown) the calls do nothing.

use crate::dispatcher::Logger;
use crate::model::{CrashEntry, ErrorRecord, LogLevel};

use once_cell::sync::OnceCell;
use std::error::Error as StdError;

// Set once; later initializations keep their own handle but leave this alone.
static GLOBAL_LOGGER: OnceCell<Logger> = OnceCell::new();

/// Installs `logger` as the global handle. Returns `false` if one was
/// already installed.
pub fn set_global_logger(logger: Logger) -> bool {
  GLOBAL_LOGGER.set(logger).is_ok()
}

/// The global logger, if one has been installed.
pub fn logger() -> Option<&'static Logger> {
  GLOBAL_LOGGER.get()
}

pub fn log(level: LogLevel, category: &str, message: impl Into<String>) {
  if let Some(logger) = logger() {
    logger.log(level, category, message);
  }
}

pub fn debug(category: &str, message: impl Into<String>) {
  log(LogLevel::Debug, category, message);
}

pub fn info(category: &str, message: impl Into<String>) {
  log(LogLevel::Info, category, message);
}

pub fn warn(category: &str, message: impl Into<String>) {
  log(LogLevel::Warn, category, message);
}

pub fn error(category: &str, message: impl Into<String>) {
  log(LogLevel::Error, category, message);
}

pub fn critical(category: &str, message: impl Into<String>) {
  log(LogLevel::Critical, category, message);
}

pub fn crash(error: ErrorRecord) {
  if let Some(logger) = logger() {
    logger.crash(error);
  }
}

/// Records `error` with its full cause chain as a crash.
pub fn crash_from_error<E>(error: &E)
where
  E: StdError + 'static,
{
  if let Some(logger) = logger() {
    logger.submit_crash(CrashEntry::from_error(error));
  }
}

/// Chains a panic hook that submits every panic as a crash entry to the
/// global logger before running the previously installed hook.
///
/// Panics raised on the library's own threads are only passed on, so a
/// misbehaving sink cannot feed crashes back into itself.
pub fn install_panic_hook() {
  let previous = std::panic::take_hook();
  std::panic::set_hook(Box::new(move |info| {
    let on_own_thread = std::thread::current()
      .name()
      .is_some_and(|name| name.starts_with("cinder-log-"));
    if !on_own_thread {
      crash(ErrorRecord::from_panic(info));
    }
    previous(info);
  }));
}
