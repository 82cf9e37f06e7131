// src/subscriber/visitor.rs
use std::fmt::Write;
use tracing::field::{Field, Visit};

/// Collects the `message` field of a `tracing` event and renders every other
/// field as `key=value`.
#[derive(Default)]
pub(crate) struct MessageVisitor {
  message: Option<String>,
  fields: Vec<(String, String)>,
  // To handle duplicate "message" keys
  message_field_count: u32,
}

impl MessageVisitor {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  fn record_value(&mut self, field_name: &str, value_str: String) {
    if field_name == "message" {
      if self.message.is_none() {
        self.message = Some(value_str);
        return;
      }
      self.message_field_count += 1;
      self
        .fields
        .push((format!("message.{}", self.message_field_count), value_str));
    } else {
      self.fields.push((field_name.to_string(), value_str));
    }
  }

  /// The message followed by the remaining fields, e.g. `chunk saved x=4 y=2`.
  pub(crate) fn into_message(self) -> String {
    let mut out = self.message.unwrap_or_default();
    for (key, value) in self.fields {
      if !out.is_empty() {
        out.push(' ');
      }
      let _ = write!(out, "{}={}", key, value);
    }
    out
  }
}

impl Visit for MessageVisitor {
  fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
    self.record_value(field.name(), format!("{:?}", value));
  }

  fn record_str(&mut self, field: &Field, value: &str) {
    self.record_value(field.name(), value.to_string());
  }

  fn record_i64(&mut self, field: &Field, value: i64) {
    self.record_value(field.name(), value.to_string());
  }

  fn record_u64(&mut self, field: &Field, value: u64) {
    self.record_value(field.name(), value.to_string());
  }

  fn record_f64(&mut self, field: &Field, value: f64) {
    self.record_value(field.name(), value.to_string());
  }

  fn record_bool(&mut self, field: &Field, value: bool) {
    self.record_value(field.name(), value.to_string());
  }
}
