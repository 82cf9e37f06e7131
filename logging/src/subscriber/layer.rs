// src/subscriber/layer.rs

use super::visitor::MessageVisitor;
use crate::dispatcher::Logger;
use crate::model::{LogEntry, LogLevel};

use tracing::{Event, Subscriber};
use tracing_subscriber::{
  layer::{Context, Layer},
  registry::LookupSpan,
};

/// A `tracing` layer that turns every event into a `LogEntry` for the
/// dispatcher. The event target becomes the category.
pub struct ForwardingLayer {
  logger: Logger,
}

impl ForwardingLayer {
  pub fn new(logger: Logger) -> Self {
    Self { logger }
  }

  fn build_entry<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>) -> LogEntry
  where
    S: Subscriber + for<'span> LookupSpan<'span>,
  {
    let metadata = event.metadata();
    let mut visitor = MessageVisitor::new();
    event.record(&mut visitor);
    let mut message = visitor.into_message();

    if let Some(span_ref) = ctx.lookup_current() {
      message = format!("{}: {}", span_ref.name(), message);
    }

    LogEntry::new(LogLevel::from(*metadata.level()), metadata.target(), message)
  }
}

impl<S> Layer<S> for ForwardingLayer
where
  S: Subscriber + for<'span> LookupSpan<'span>,
{
  fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
    let entry = self.build_entry(event, &ctx);
    self.logger.submit_log(entry);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Result;
  use crate::model::CrashEntry;
  use crate::sink::LogSink;
  use parking_lot::Mutex;
  use pretty_assertions::assert_eq;
  use std::sync::Arc;
  use tracing_subscriber::prelude::*;

  #[derive(Default)]
  struct CapturingSink {
    lines: Mutex<Vec<String>>,
  }

  impl LogSink for CapturingSink {
    fn write_log(&self, entry: &LogEntry) -> Result<()> {
      self
        .lines
        .lock()
        .push(format!("[{}] [{}] {}", entry.level, entry.category, entry.message));
      Ok(())
    }

    fn write_crash(&self, _entry: &CrashEntry) -> Result<()> {
      Ok(())
    }

    fn flush(&self) -> Result<()> {
      Ok(())
    }

    fn dispose(&self) {}
  }

  #[test]
  fn events_are_forwarded_with_target_and_fields() {
    let sink = Arc::new(CapturingSink::default());
    let logger = Logger::new(sink.clone(), 64).unwrap();
    let subscriber = tracing_subscriber::registry().with(ForwardingLayer::new(logger.clone()));

    tracing::subscriber::with_default(subscriber, || {
      tracing::info!(target: "world", x = 4, y = 2, "chunk saved");
      tracing::trace!(target: "render", "frame");
      let span = tracing::info_span!("load");
      let _enter = span.enter();
      tracing::error!(target: "io", "disk gone");
    });
    logger.shutdown();

    assert_eq!(
      *sink.lines.lock(),
      vec![
        "[INFO] [world] chunk saved x=4 y=2".to_string(),
        "[DEBUG] [render] frame".to_string(),
        "[ERROR] [io] load: disk gone".to_string(),
      ]
    );
  }
}
