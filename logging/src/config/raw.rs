use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct InternalErrorReportingRaw {
  #[serde(default)] // Defaults to false if not present
  pub enabled: bool,
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProductRaw {
  pub name: String,
  #[serde(default = "default_product_version")]
  pub version: String,
}

// --- Top Level Config ---
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigRaw {
  #[serde(default = "default_version")]
  pub version: u32,
  /// Base directory for every relative path below.
  #[serde(default)]
  pub app_data_root: Option<String>,
  #[serde(default = "default_log_file")]
  pub log_file: String,
  #[serde(default = "default_archive_directory")]
  pub archive_directory: String,
  #[serde(default = "default_crash_directory")]
  pub crash_directory: String,
  #[serde(default)]
  pub product: Option<ProductRaw>,
  #[serde(default = "default_queue_capacity")]
  pub queue_capacity: usize,
  /// A humantime duration such as "60s" or "1m 30s".
  #[serde(default = "default_archive_timeout")]
  pub archive_timeout: String,
  #[serde(default = "default_true")]
  pub archive_on_dispose: bool,
  #[serde(default)]
  pub console_echo: bool,
  #[serde(default)]
  pub line_pattern: Option<String>,
  #[serde(default)]
  pub capture_tracing: bool,
  #[serde(default)]
  pub internal_error_reporting: InternalErrorReportingRaw,
}

impl Default for ConfigRaw {
  fn default() -> Self {
    Self {
      version: default_version(),
      app_data_root: None,
      log_file: default_log_file(),
      archive_directory: default_archive_directory(),
      crash_directory: default_crash_directory(),
      product: None,
      queue_capacity: default_queue_capacity(),
      archive_timeout: default_archive_timeout(),
      archive_on_dispose: true,
      console_echo: false,
      line_pattern: None,
      capture_tracing: false,
      internal_error_reporting: InternalErrorReportingRaw::default(),
    }
  }
}

fn default_version() -> u32 {
  1
}

fn default_log_file() -> String {
  "logs/latest.log".to_string()
}

fn default_archive_directory() -> String {
  "logs".to_string()
}

fn default_crash_directory() -> String {
  "crash-reports".to_string()
}

fn default_queue_capacity() -> usize {
  crate::dispatcher::DEFAULT_QUEUE_CAPACITY
}

fn default_archive_timeout() -> String {
  "60s".to_string()
}

fn default_product_version() -> String {
  "0.0.0".to_string()
}

fn default_true() -> bool {
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn empty_document_takes_every_default() {
    let raw: ConfigRaw = serde_yaml::from_str("version: 1").unwrap();
    assert_eq!(raw, ConfigRaw::default());
  }

  #[test]
  fn full_document_parses() {
    let yaml = r#"
version: 1
app_data_root: /srv/farm
log_file: logs/session.log
archive_directory: logs/archive
crash_directory: crashes
product: { name: "Farm", version: "2.0.1" }
queue_capacity: 1024
archive_timeout: 90s
archive_on_dispose: false
console_echo: true
line_pattern: "%p %m"
capture_tracing: true
internal_error_reporting:
  enabled: true
"#;
    let raw: ConfigRaw = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(raw.app_data_root.as_deref(), Some("/srv/farm"));
    assert_eq!(raw.archive_directory, "logs/archive");
    assert_eq!(
      raw.product,
      Some(ProductRaw {
        name: "Farm".to_string(),
        version: "2.0.1".to_string()
      })
    );
    assert_eq!(raw.queue_capacity, 1024);
    assert_eq!(raw.archive_timeout, "90s");
    assert!(!raw.archive_on_dispose);
    assert!(raw.console_echo);
    assert!(raw.capture_tracing);
    assert!(raw.internal_error_reporting.enabled);
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let result: Result<ConfigRaw, _> = serde_yaml::from_str("version: 1\nrotation: daily");
    assert!(result.is_err());
  }
}
