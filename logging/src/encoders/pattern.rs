// src/encoders/pattern.rs
use super::EntryFormatter;
use crate::model::LogEntry;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write;

// Either a specifier like `%-5p` / `%d{%H:%M}` or an escaped `%%`.
static PATTERN_REGEX: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?P<specifier>%(?P<padding>-?\d+)?(?P<converter>[a-zA-Z])(?:\{(?P<options>[^}]+)\})?)|(?P<escaped>%%)")
    .expect("Pattern regex should be valid")
});

const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Represents a single piece of a parsed line pattern.
#[derive(Debug)]
enum Segment {
  Literal(String),
  Specifier(PatternSpecifier),
}

/// The internal representation of a conversion specifier like `%-5p`.
#[derive(Debug)]
struct PatternSpecifier {
  converter: char,
  padding: Option<i32>,
  options: Option<String>,
}

/// Formats entries according to a log4j-style pattern.
///
/// Supported converters: `%d{strftime}` timestamp (UTC), `%p` level tag,
/// `%c` category, `%m` message, `%n` newline and `%%` for a literal percent.
/// Unknown converters are dropped.
pub struct PatternFormatter {
  segments: Vec<Segment>,
}

impl PatternFormatter {
  pub fn new(pattern_string: &str) -> Self {
    let segments = Self::parse(pattern_string);
    Self { segments }
  }

  fn parse(pattern: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last_end = 0;

    for caps in PATTERN_REGEX.captures_iter(pattern) {
      let Some(mat) = caps.get(0) else {
        continue;
      };

      if mat.start() > last_end {
        segments.push(Segment::Literal(pattern[last_end..mat.start()].to_string()));
      }

      if caps.name("specifier").is_some() {
        let converter = caps
          .name("converter")
          .and_then(|m| m.as_str().chars().next());
        if let Some(converter) = converter {
          let padding = caps.name("padding").and_then(|m| m.as_str().parse().ok());
          let options = caps.name("options").map(|m| m.as_str().to_string());
          segments.push(Segment::Specifier(PatternSpecifier {
            converter,
            padding,
            options,
          }));
        }
      } else if caps.name("escaped").is_some() {
        segments.push(Segment::Literal("%".to_string()));
      }

      last_end = mat.end();
    }

    if last_end < pattern.len() {
      segments.push(Segment::Literal(pattern[last_end..].to_string()));
    }

    segments
  }

  fn format_specifier(&self, buf: &mut String, spec: &PatternSpecifier, entry: &LogEntry) {
    let mut content = String::with_capacity(64);
    let needs_padding = spec.padding.is_some();
    let target_buf: &mut String = if needs_padding { &mut content } else { buf };

    match spec.converter {
      'd' => {
        let format_str = spec.options.as_deref().unwrap_or(DEFAULT_TIMESTAMP_FORMAT);
        let _ = write!(target_buf, "{}", entry.timestamp.format(format_str));
      }
      'p' | 'l' => target_buf.push_str(entry.level.as_str()),
      'c' => target_buf.push_str(&entry.category),
      'm' => target_buf.push_str(&entry.message),
      'n' => {
        buf.push('\n');
        return;
      }
      _ => {}
    }

    if let Some(padding) = spec.padding {
      apply_padding(buf, &content, padding);
    }
  }
}

fn apply_padding(buf: &mut String, content: &str, padding: i32) {
  let width = padding.unsigned_abs() as usize;
  if content.len() >= width {
    buf.push_str(content);
  } else if padding > 0 {
    let _ = write!(buf, "{:>width$}", content, width = width);
  } else {
    let _ = write!(buf, "{:<width$}", content, width = width);
  }
}

impl EntryFormatter for PatternFormatter {
  fn format_entry(&self, entry: &LogEntry) -> String {
    let mut output = String::with_capacity(128);

    for segment in &self.segments {
      match segment {
        Segment::Literal(text) => output.push_str(text),
        Segment::Specifier(spec) => self.format_specifier(&mut output, spec, entry),
      }
    }

    // One entry is one line.
    while output.ends_with('\n') {
      output.pop();
    }
    output
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::encoders::DEFAULT_LINE_PATTERN;
  use crate::model::{LogEntry, LogLevel};
  use chrono::{TimeZone, Utc};
  use pretty_assertions::assert_eq;

  fn create_test_entry() -> LogEntry {
    let mut entry = LogEntry::new(LogLevel::Info, "World", "Chunk 4,2 loaded");
    entry.timestamp = Utc.with_ymd_and_hms(2023, 1, 1, 1, 1, 1).unwrap()
      + chrono::Duration::milliseconds(42);
    entry
  }

  #[test]
  fn default_pattern_matches_active_file_layout() {
    let formatter = PatternFormatter::new(DEFAULT_LINE_PATTERN);
    assert_eq!(
      formatter.format_entry(&create_test_entry()),
      "[2023-01-01 01:01:01.042] [INFO] [World] Chunk 4,2 loaded"
    );
  }

  #[test]
  fn format_with_custom_date_format() {
    let formatter = PatternFormatter::new("%d{%H:%M} %p - %m");
    assert_eq!(
      formatter.format_entry(&create_test_entry()),
      "01:01 INFO - Chunk 4,2 loaded"
    );
  }

  #[test]
  fn format_with_padding() {
    let formatter = PatternFormatter::new("[%5p] [%-8c] %m");
    assert_eq!(
      formatter.format_entry(&create_test_entry()),
      "[ INFO] [World   ] Chunk 4,2 loaded"
    );
  }

  #[test]
  fn format_handles_escaped_percent_and_strips_newlines() {
    let formatter = PatternFormatter::new("100%% %p%n");
    assert_eq!(formatter.format_entry(&create_test_entry()), "100% INFO");
  }

  #[test]
  fn parse_handles_literals_and_specifiers() {
    let formatter = PatternFormatter::new("LITERAL %-10p AND %m");
    assert_eq!(formatter.segments.len(), 4);
    assert!(matches!(&formatter.segments[0], Segment::Literal(s) if s == "LITERAL "));
    assert!(
      matches!(&formatter.segments[1], Segment::Specifier(spec) if spec.converter == 'p' && spec.padding == Some(-10))
    );
    assert!(matches!(&formatter.segments[2], Segment::Literal(s) if s == " AND "));
    assert!(
      matches!(&formatter.segments[3], Segment::Specifier(spec) if spec.converter == 'm' && spec.padding.is_none())
    );
  }
}
