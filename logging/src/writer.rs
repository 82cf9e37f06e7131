// The background task that owns the active log file handle.
//
// Lines arrive on a `fibre` channel whose receiver outlives any single task:
// when a task stops it parks the receiver so the next task resumes from
// whatever is still queued.

use crate::error::{Error, Result};
use crate::error_handling::{Diagnostics, InternalErrorSource};

use fibre::error::TrySendError as FibreTrySendError;
use fibre::mpsc::{self, BoundedReceiver, BoundedSender};
use parking_lot::{Condvar, Mutex};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A one-shot completion signal with a bounded wait.
#[derive(Default)]
pub(crate) struct Latch {
  done: Mutex<bool>,
  cvar: Condvar,
}

impl Latch {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn set(&self) {
    let mut done = self.done.lock();
    *done = true;
    self.cvar.notify_all();
  }

  pub(crate) fn is_set(&self) -> bool {
    *self.done.lock()
  }

  /// Returns `true` if the latch was set before `timeout` elapsed.
  pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
    let mut done = self.done.lock();
    if !*done {
      let _ = self.cvar.wait_while_for(&mut done, |done| !*done, timeout);
    }
    *done
  }
}

pub(crate) enum WriterMessage {
  Line(String),
  /// Flush to storage, then set the latch.
  Flush(Arc<Latch>),
  /// Carries no data; wakes an idle task so it notices cancellation.
  Wake,
  /// Blocks the task until the latch is set.
  #[cfg(test)]
  Stall(Arc<Latch>),
}

/// Shared between a running task and whoever stops it.
#[derive(Default)]
struct TaskControl {
  cancel: AtomicBool,
  /// Set by a `stop` that gave up waiting. The task then withdraws its
  /// cancellation and keeps serving the queue instead of exiting.
  abandoned: Mutex<bool>,
  finished: Latch,
}

struct WriterTask {
  control: Arc<TaskControl>,
  handle: JoinHandle<()>,
}

type FailureSlot = Arc<Mutex<Option<io::Error>>>;

/// Owns the writer task for the active log file and the queue feeding it.
pub(crate) struct ActiveLogWriter {
  path: PathBuf,
  tx: BoundedSender<WriterMessage>,
  parked_rx: Arc<Mutex<Option<BoundedReceiver<WriterMessage>>>>,
  task: Mutex<Option<WriterTask>>,
  failure: FailureSlot,
  diagnostics: Arc<Diagnostics>,
}

impl ActiveLogWriter {
  /// Creates the active file's directory and starts the first writer task.
  pub(crate) fn start(
    path: PathBuf,
    capacity: usize,
    diagnostics: Arc<Diagnostics>,
  ) -> Result<Self> {
    if let Some(parent_dir) = path.parent() {
      if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
        fs::create_dir_all(parent_dir).map_err(|e| Error::SinkSetup {
          path: path.clone(),
          reason: format!("Failed to create directory {:?}: {}", parent_dir, e),
        })?;
      }
    }

    let (tx, rx) = mpsc::bounded::<WriterMessage>(capacity);
    let writer = Self {
      path,
      tx,
      parked_rx: Arc::new(Mutex::new(Some(rx))),
      task: Mutex::new(None),
      failure: Arc::new(Mutex::new(None)),
      diagnostics,
    };
    writer.restart()?;
    Ok(writer)
  }

  pub(crate) fn path(&self) -> &Path {
    &self.path
  }

  /// Queues a line without blocking.
  pub(crate) fn append(&self, line: String) -> Result<()> {
    match self.tx.try_send(WriterMessage::Line(line)) {
      Ok(()) => Ok(()),
      Err(FibreTrySendError::Full(_)) => Err(Error::QueueFull { queue: "writer" }),
      Err(_) => Err(Error::SinkClosed),
    }
  }

  /// Takes the first I/O failure recorded by the task since the last call.
  pub(crate) fn take_failure(&self) -> Option<Error> {
    self.failure.lock().take().map(|source| Error::Write {
      path: self.path.clone(),
      source,
    })
  }

  /// Waits until every line queued before this call has reached storage.
  /// Fails if any of those lines could not be written.
  pub(crate) fn flush(&self, timeout: Duration) -> Result<()> {
    let latch = Arc::new(Latch::new());
    match self.tx.try_send(WriterMessage::Flush(latch.clone())) {
      Ok(()) => {}
      Err(FibreTrySendError::Full(_)) => return Err(Error::QueueFull { queue: "writer" }),
      Err(_) => return Err(Error::SinkClosed),
    }
    if !latch.wait_for(timeout) {
      return Err(Error::ArchiveTimeout(timeout));
    }
    match self.take_failure() {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  pub(crate) fn is_running(&self) -> bool {
    self
      .task
      .lock()
      .as_ref()
      .is_some_and(|task| !task.control.finished.is_set())
  }

  /// Cancels the current task and waits for it to drain what was queued at
  /// the moment of cancellation and close the file. On timeout the task is
  /// abandoned: once it gets unstuck it keeps running as if never cancelled.
  pub(crate) fn stop(&self, timeout: Duration) -> Result<()> {
    let mut slot = self.task.lock();
    let Some(task) = slot.as_ref() else {
      return Ok(());
    };
    let control = &task.control;

    // This stop supersedes any earlier one that gave up on the task.
    *control.abandoned.lock() = false;
    control.cancel.store(true, Ordering::SeqCst);
    // A full queue means the task is busy and will see the flag on its own.
    let _ = self.tx.try_send(WriterMessage::Wake);

    if !control.finished.wait_for(timeout) {
      // The task decides to exit while holding this lock, so it either
      // already finished or will see the flag.
      let mut abandoned = control.abandoned.lock();
      if !control.finished.is_set() {
        *abandoned = true;
        return Err(Error::ArchiveTimeout(timeout));
      }
    }

    if let Some(task) = slot.take() {
      if task.handle.join().is_err() {
        eprintln!("[cinder_log:ERROR] Log writer task panicked while stopping.");
      }
    }
    Ok(())
  }

  /// Starts a fresh task unless one is already running. The new task appends
  /// to the active path, creating the file if it was rotated away.
  pub(crate) fn restart(&self) -> Result<()> {
    let mut slot = self.task.lock();
    if let Some(task) = slot.as_ref() {
      if !task.control.finished.is_set() {
        return Ok(());
      }
    }
    if let Some(old) = slot.take() {
      let _ = old.handle.join();
    }

    let rx = self
      .parked_rx
      .lock()
      .take()
      .ok_or_else(|| Error::Internal("log writer receiver is not parked".to_string()))?;

    let control = Arc::new(TaskControl::default());
    let run = WriterRun {
      path: self.path.clone(),
      rx,
      control: control.clone(),
      parked_rx: self.parked_rx.clone(),
      failure: self.failure.clone(),
      diagnostics: self.diagnostics.clone(),
    };

    let handle = thread::Builder::new()
      .name("cinder-log-writer".to_string())
      .spawn(move || run.run())
      .map_err(|e| Error::SinkSetup {
        path: self.path.clone(),
        reason: format!("Failed to spawn writer task: {}", e),
      })?;

    *slot = Some(WriterTask { control, handle });
    Ok(())
  }

  /// Closes the queue. The running task drains everything left and exits;
  /// `stop` can then be used to wait for it.
  pub(crate) fn close(&self) {
    let _ = self.tx.close();
  }

  #[cfg(test)]
  pub(crate) fn stall(&self) -> Arc<Latch> {
    let latch = Arc::new(Latch::new());
    let _ = self.tx.try_send(WriterMessage::Stall(latch.clone()));
    latch
  }

  #[cfg(test)]
  pub(crate) fn has_failure(&self) -> bool {
    self.failure.lock().is_some()
  }
}

/// Everything one writer task owns while it runs.
struct WriterRun {
  path: PathBuf,
  rx: BoundedReceiver<WriterMessage>,
  control: Arc<TaskControl>,
  parked_rx: Arc<Mutex<Option<BoundedReceiver<WriterMessage>>>>,
  failure: FailureSlot,
  diagnostics: Arc<Diagnostics>,
}

impl WriterRun {
  fn run(self) {
    let mut file = self.open();
    let control = self.control.clone();

    // Held until `finished` is set, so a timed-out `stop` cannot miss the exit.
    let exit = loop {
      let Ok(message) = self.rx.recv() else {
        break control.abandoned.lock();
      };
      self.handle(&mut file, message);

      if control.cancel.load(Ordering::SeqCst) {
        // Drain what was queued when cancellation was observed; anything
        // arriving later belongs to the next task.
        let pending = self.rx.len();
        for _ in 0..pending {
          match self.rx.try_recv() {
            Ok(message) => self.handle(&mut file, message),
            Err(_) => break,
          }
        }

        let mut abandoned = control.abandoned.lock();
        if *abandoned {
          *abandoned = false;
          control.cancel.store(false, Ordering::SeqCst);
          continue;
        }
        break abandoned;
      }
    };

    if let Some(mut writer) = file.take() {
      if let Err(e) = writer.flush() {
        self.report(e, "flushing before close");
      }
    }

    let WriterRun { rx, parked_rx, .. } = self;
    *parked_rx.lock() = Some(rx);
    control.finished.set();
    drop(exit);
  }

  fn handle(&self, file: &mut Option<BufWriter<File>>, message: WriterMessage) {
    match message {
      WriterMessage::Line(line) => {
        if file.is_none() {
          *file = self.open();
        }
        if let Some(writer) = file.as_mut() {
          let result = writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush());
          if let Err(e) = result {
            self.report(e, "appending a line");
          }
        }
      }
      WriterMessage::Flush(latch) => {
        if let Some(writer) = file.as_mut() {
          let result = writer.flush().and_then(|_| writer.get_ref().sync_data());
          if let Err(e) = result {
            self.report(e, "flushing to storage");
          }
        }
        latch.set();
      }
      WriterMessage::Wake => {}
      #[cfg(test)]
      WriterMessage::Stall(latch) => {
        latch.wait_for(Duration::from_secs(30));
      }
    }
  }

  fn open(&self) -> Option<BufWriter<File>> {
    match OpenOptions::new().create(true).append(true).open(&self.path) {
      Ok(file) => Some(BufWriter::new(file)),
      Err(e) => {
        self.report(e, "opening the active log file");
        None
      }
    }
  }

  fn report(&self, error: io::Error, context: &str) {
    {
      let mut failure = self.failure.lock();
      if failure.is_none() {
        *failure = Some(io::Error::new(error.kind(), error.to_string()));
      }
    }
    self.diagnostics.report(
      InternalErrorSource::WriterIo {
        path: self.path.display().to_string(),
      },
      error,
      Some(context.to_string()),
    );
  }
}
