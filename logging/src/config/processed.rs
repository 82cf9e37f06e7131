// src/config/processed.rs
use crate::config::raw::ConfigRaw;
use crate::error::{Error, Result};
use crate::sink::{FileSinkOptions, ProductInfo};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SUPPORTED_VERSION: u32 = 1;

// --- Processed Top Level Config ---
#[derive(Debug, Clone)]
pub struct ConfigInternal {
  pub log_file: PathBuf,
  pub archive_directory: PathBuf,
  pub crash_directory: PathBuf,
  pub product: ProductInfo,
  pub queue_capacity: usize,
  pub archive_timeout: Duration,
  pub archive_on_dispose: bool,
  pub console_echo: bool,
  pub line_pattern: Option<String>,
  pub capture_tracing: bool,
  pub error_reporting_enabled: bool,
}

impl ConfigInternal {
  /// The default layout under `root`: `logs/latest.log`, archives in `logs`
  /// and crash reports in `crash-reports`.
  pub fn with_root(root: impl AsRef<Path>) -> Self {
    let root = root.as_ref();
    let raw = ConfigRaw::default();
    Self {
      log_file: root.join(raw.log_file),
      archive_directory: root.join(raw.archive_directory),
      crash_directory: root.join(raw.crash_directory),
      product: ProductInfo::default(),
      queue_capacity: raw.queue_capacity,
      archive_timeout: Duration::from_secs(60),
      archive_on_dispose: raw.archive_on_dispose,
      console_echo: raw.console_echo,
      line_pattern: None,
      capture_tracing: raw.capture_tracing,
      error_reporting_enabled: false,
    }
  }

  pub(crate) fn file_sink_options(&self) -> FileSinkOptions {
    FileSinkOptions {
      log_file: self.log_file.clone(),
      archive_directory: self.archive_directory.clone(),
      queue_capacity: self.queue_capacity,
      archive_timeout: self.archive_timeout,
      archive_on_dispose: self.archive_on_dispose,
      console_echo: self.console_echo,
      line_pattern: self.line_pattern.clone(),
    }
  }
}

// --- Conversion and Validation Logic ---

/// Processes the raw, deserialized configuration into a validated internal representation.
pub fn process_raw_config(raw_config: ConfigRaw) -> Result<ConfigInternal> {
  if raw_config.version != SUPPORTED_VERSION {
    return Err(Error::InvalidConfigValue {
      field: "version".to_string(),
      message: format!(
        "Unsupported config version {}. Expected {}.",
        raw_config.version, SUPPORTED_VERSION
      ),
    });
  }

  let root = raw_config.app_data_root.as_deref().map(PathBuf::from);
  let resolve = |field: &str, value: &str| -> Result<PathBuf> {
    if value.trim().is_empty() {
      return Err(Error::InvalidConfigValue {
        field: field.to_string(),
        message: "Path cannot be empty.".to_string(),
      });
    }
    let path = PathBuf::from(value);
    Ok(match &root {
      Some(root) if path.is_relative() => root.join(path),
      _ => path,
    })
  };

  let log_file = resolve("log_file", &raw_config.log_file)?;
  let archive_directory = resolve("archive_directory", &raw_config.archive_directory)?;
  let crash_directory = resolve("crash_directory", &raw_config.crash_directory)?;

  if raw_config.queue_capacity == 0 {
    return Err(Error::InvalidConfigValue {
      field: "queue_capacity".to_string(),
      message: "Queue capacity must be greater than zero.".to_string(),
    });
  }

  let archive_timeout = humantime::parse_duration(raw_config.archive_timeout.trim()).map_err(|e| {
    Error::InvalidConfigValue {
      field: "archive_timeout".to_string(),
      message: format!("Invalid duration '{}': {}", raw_config.archive_timeout, e),
    }
  })?;
  if archive_timeout.is_zero() {
    return Err(Error::InvalidConfigValue {
      field: "archive_timeout".to_string(),
      message: "Archive timeout must be greater than zero.".to_string(),
    });
  }

  let product = match raw_config.product {
    Some(product) => {
      if product.name.trim().is_empty() {
        return Err(Error::InvalidConfigValue {
          field: "product.name".to_string(),
          message: "Product name cannot be empty.".to_string(),
        });
      }
      ProductInfo {
        name: product.name,
        version: product.version,
      }
    }
    None => ProductInfo::default(),
  };

  let line_pattern = raw_config
    .line_pattern
    .filter(|pattern| !pattern.trim().is_empty());

  Ok(ConfigInternal {
    log_file,
    archive_directory,
    crash_directory,
    product,
    queue_capacity: raw_config.queue_capacity,
    archive_timeout,
    archive_on_dispose: raw_config.archive_on_dispose,
    console_echo: raw_config.console_echo,
    line_pattern,
    capture_tracing: raw_config.capture_tracing,
    error_reporting_enabled: raw_config.internal_error_reporting.enabled,
  })
}
