// Defines strategies for formatting LogEntries into text lines.

use crate::model::LogEntry;

pub mod pattern;

/// The pattern that produces `[yyyy-MM-dd HH:mm:ss.fff] [LEVEL] [category] message`.
pub const DEFAULT_LINE_PATTERN: &str = "[%d{%Y-%m-%d %H:%M:%S%.3f}] [%p] [%c] %m";

/// Trait for types that can format a `LogEntry` into a single line of text.
/// The returned line carries no trailing newline; the writer adds it.
pub trait EntryFormatter: Send + Sync + 'static {
  fn format_entry(&self, entry: &LogEntry) -> String;
}

/// Creates the formatter for the given pattern, falling back to the default
/// line layout when no pattern is configured.
pub(crate) fn new_entry_formatter(pattern: Option<&str>) -> Box<dyn EntryFormatter> {
  Box::new(pattern::PatternFormatter::new(
    pattern.unwrap_or(DEFAULT_LINE_PATTERN),
  ))
}
