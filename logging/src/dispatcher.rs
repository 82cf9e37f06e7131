// The two-queue dispatcher between callers and the sink.
//
// Log entries and crash entries travel on separate `fibre` channels, each
// drained by its own consumer thread, so a crash never waits behind a
// backlog of ordinary lines.

use crate::error::{Error, Result};
use crate::error_handling::{Diagnostics, InternalErrorSource};
use crate::model::{CrashEntry, ErrorRecord, LogEntry, LogLevel};
use crate::sink::LogSink;

use fibre::error::TrySendError as FibreTrySendError;
use fibre::mpsc::{self, BoundedReceiver, BoundedSender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub const DEFAULT_QUEUE_CAPACITY: usize = 65_536;

pub(crate) const LOG_CONSUMER_THREAD: &str = "cinder-log-consumer";
pub(crate) const CRASH_CONSUMER_THREAD: &str = "cinder-log-crash";

type ConsumerBody = Box<dyn FnOnce() + Send>;

/// Counters describing entries that never made it to the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStats {
  /// Log entries rejected because the log queue was full.
  pub dropped_logs: u64,
  /// Crash entries rejected because the crash queue was full.
  pub dropped_crashes: u64,
  pub failed_log_writes: u64,
  pub failed_crash_writes: u64,
}

#[derive(Default)]
struct Counters {
  dropped_logs: AtomicU64,
  dropped_crashes: AtomicU64,
  failed_log_writes: AtomicU64,
  failed_crash_writes: AtomicU64,
}

/// Accepts entries from any thread without blocking and hands them to the
/// sink on background threads.
///
/// Cloning is cheap; all clones share the same queues and sink.
#[derive(Clone)]
pub struct Logger {
  inner: Arc<Inner>,
}

struct Inner {
  log_tx: BoundedSender<LogEntry>,
  crash_tx: BoundedSender<CrashEntry>,
  consumers: Mutex<Vec<JoinHandle<()>>>,
  sink: Arc<dyn LogSink>,
  counters: Arc<Counters>,
  diagnostics: Arc<Diagnostics>,
  shut_down: AtomicBool,
}

impl Logger {
  /// Starts both consumer threads. `capacity` bounds each queue separately.
  pub fn new(sink: Arc<dyn LogSink>, capacity: usize) -> Result<Self> {
    Self::with_diagnostics(sink, capacity, Arc::new(Diagnostics::stderr()))
  }

  pub(crate) fn with_diagnostics(
    sink: Arc<dyn LogSink>,
    capacity: usize,
    diagnostics: Arc<Diagnostics>,
  ) -> Result<Self> {
    Self::start(sink, capacity, diagnostics, spawn_named)
  }

  fn start<S>(
    sink: Arc<dyn LogSink>,
    capacity: usize,
    diagnostics: Arc<Diagnostics>,
    spawn: S,
  ) -> Result<Self>
  where
    S: Fn(&str, ConsumerBody) -> Result<JoinHandle<()>>,
  {
    if capacity == 0 {
      return Err(Error::InvalidConfigValue {
        field: "queue_capacity".to_string(),
        message: "Queue capacity must be greater than zero.".to_string(),
      });
    }

    let (log_tx, log_rx) = mpsc::bounded::<LogEntry>(capacity);
    let (crash_tx, crash_rx) = mpsc::bounded::<CrashEntry>(capacity);
    let counters = Arc::new(Counters::default());

    let log_consumer = {
      let sink = sink.clone();
      let counters = counters.clone();
      let diagnostics = diagnostics.clone();
      let body = consume(log_rx, move |entry: LogEntry| {
        if let Err(reason) = guarded(|| sink.write_log(&entry)) {
          counters.failed_log_writes.fetch_add(1, Ordering::Relaxed);
          diagnostics.report(
            InternalErrorSource::LogWrite,
            reason,
            Some(format!("[{}] [{}]", entry.level, entry.category)),
          );
        }
      });
      spawn(LOG_CONSUMER_THREAD, body)?
    };

    let crash_consumer = {
      let sink = sink.clone();
      let counters = counters.clone();
      let diagnostics = diagnostics.clone();
      let body = consume(crash_rx, move |entry: CrashEntry| {
        if let Err(reason) = guarded(|| sink.write_crash(&entry)) {
          counters.failed_crash_writes.fetch_add(1, Ordering::Relaxed);
          diagnostics.report(
            InternalErrorSource::CrashWrite,
            reason,
            Some(format!("{}: {}", entry.error.kind, entry.error.message)),
          );
        }
      });
      match spawn(CRASH_CONSUMER_THREAD, body) {
        Ok(handle) => handle,
        Err(e) => {
          // The log consumer exits once its queue is closed and empty.
          let _ = log_tx.close();
          let _ = log_consumer.join();
          return Err(e);
        }
      }
    };

    Ok(Self {
      inner: Arc::new(Inner {
        log_tx,
        crash_tx,
        consumers: Mutex::new(vec![log_consumer, crash_consumer]),
        sink,
        counters,
        diagnostics,
        shut_down: AtomicBool::new(false),
      }),
    })
  }

  /// Queues a log entry. Never blocks; after shutdown the entry is dropped.
  pub fn submit_log(&self, entry: LogEntry) {
    match self.inner.log_tx.try_send(entry) {
      Ok(()) => {}
      Err(FibreTrySendError::Full(_)) => {
        self.inner.counters.dropped_logs.fetch_add(1, Ordering::Relaxed);
        self.inner.diagnostics.report(
          InternalErrorSource::QueueOverflow { queue: "log" },
          Error::QueueFull { queue: "log" },
          None,
        );
      }
      Err(_) => {}
    }
  }

  /// Queues a crash entry. Never blocks; after shutdown the entry is dropped.
  pub fn submit_crash(&self, entry: CrashEntry) {
    match self.inner.crash_tx.try_send(entry) {
      Ok(()) => {}
      Err(FibreTrySendError::Full(_)) => {
        self.inner.counters.dropped_crashes.fetch_add(1, Ordering::Relaxed);
        self.inner.diagnostics.report(
          InternalErrorSource::QueueOverflow { queue: "crash" },
          Error::QueueFull { queue: "crash" },
          None,
        );
      }
      Err(_) => {}
    }
  }

  pub fn log<C, M>(&self, level: LogLevel, category: C, message: M)
  where
    C: Into<String>,
    M: Into<String>,
  {
    self.submit_log(LogEntry::new(level, category, message));
  }

  pub fn crash(&self, error: ErrorRecord) {
    self.submit_crash(CrashEntry::new(error));
  }

  pub fn stats(&self) -> LoggerStats {
    let c = &self.inner.counters;
    LoggerStats {
      dropped_logs: c.dropped_logs.load(Ordering::Relaxed),
      dropped_crashes: c.dropped_crashes.load(Ordering::Relaxed),
      failed_log_writes: c.failed_log_writes.load(Ordering::Relaxed),
      failed_crash_writes: c.failed_crash_writes.load(Ordering::Relaxed),
    }
  }

  pub fn sink(&self) -> &Arc<dyn LogSink> {
    &self.inner.sink
  }

  pub fn is_shut_down(&self) -> bool {
    self.inner.shut_down.load(Ordering::SeqCst)
  }

  /// Closes both queues, waits for the consumers to drain them, then flushes
  /// and disposes the sink. Later calls return immediately.
  pub fn shutdown(&self) {
    self.inner.shutdown();
  }
}

impl Inner {
  fn shutdown(&self) {
    if self.shut_down.swap(true, Ordering::SeqCst) {
      return;
    }

    let _ = self.log_tx.close();
    let _ = self.crash_tx.close();

    let handles: Vec<JoinHandle<()>> = self.consumers.lock().drain(..).collect();
    for handle in handles {
      if let Err(e) = handle.join() {
        eprintln!(
          "[cinder_log:ERROR] Consumer thread panicked during shutdown: {:?}",
          e
        );
      }
    }

    if let Err(e) = self.sink.flush() {
      self
        .diagnostics
        .report(InternalErrorSource::LogWrite, e, Some("final flush".to_string()));
    }
    self.sink.dispose();
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn consume<T, F>(rx: BoundedReceiver<T>, mut write: F) -> ConsumerBody
where
  T: Send + 'static,
  F: FnMut(T) + Send + 'static,
{
  Box::new(move || {
    // Ends once the queue is closed and empty.
    while let Ok(entry) = rx.recv() {
      write(entry);
    }
  })
}

fn spawn_named(name: &str, body: ConsumerBody) -> Result<JoinHandle<()>> {
  thread::Builder::new()
    .name(name.to_string())
    .spawn(body)
    .map_err(|e| Error::Internal(format!("failed to spawn {}: {}", name, e)))
}

/// Runs one sink call, turning both an error and a panic into a message so
/// the consumer loop keeps going.
fn guarded<F>(call: F) -> std::result::Result<(), String>
where
  F: FnOnce() -> Result<()>,
{
  match panic::catch_unwind(AssertUnwindSafe(call)) {
    Ok(Ok(())) => Ok(()),
    Ok(Err(e)) => Err(e.to_string()),
    Err(payload) => Err(
      payload
        .downcast_ref::<&str>()
        .map(|s| format!("sink panicked: {}", s))
        .or_else(|| {
          payload
            .downcast_ref::<String>()
            .map(|s| format!("sink panicked: {}", s))
        })
        .unwrap_or_else(|| "sink panicked".to_string()),
    ),
  }
}
