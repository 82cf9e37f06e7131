// Contains the primary public initialization functions for cinder_log.

use crate::{
  config::{process_raw_config, ConfigInternal, ConfigRaw},
  dispatcher::Logger,
  error::{Error, Result},
  error_handling::Diagnostics,
  global,
  platform::{NoPlatformSession, PlatformSession},
  sink::{CrashReporter, FileSink, LogSink},
  subscriber::ForwardingLayer,
  system_info::{self, ModuleInventory, ProcessModules, SystemInfo},
  InitResult, InternalErrorReport,
};

use std::{
  env,
  fs::File as StdFsFile,
  io,
  path::{Path, PathBuf},
  sync::Arc,
};

use fibre::mpsc;
use tracing_subscriber::prelude::*;

const DEFAULT_CONFIG_BASE_NAME: &str = "cinder_log";
const DEFAULT_CONFIG_EXTENSION: &str = "yaml";
const INTERNAL_ERROR_CAPACITY: usize = 256;

/// The external facts a crash report draws on.
pub struct Collaborators {
  pub system: Arc<dyn SystemInfo>,
  pub session: Arc<dyn PlatformSession>,
  pub modules: Arc<dyn ModuleInventory>,
}

impl Collaborators {
  /// Runtime-detected system info, no platform session, and the process's
  /// own module list with `executable_version` attached to the executable.
  pub fn detect(executable_version: Option<String>) -> Self {
    Self {
      system: system_info::detect(),
      session: Arc::new(NoPlatformSession),
      modules: Arc::new(ProcessModules::new(executable_version)),
    }
  }
}

/// Finds the configuration file based on common patterns and an optional environment suffix.
pub fn find_config_file(environment_suffix: Option<&str>) -> Result<PathBuf> {
  let base_name = DEFAULT_CONFIG_BASE_NAME;
  let extension = DEFAULT_CONFIG_EXTENSION;

  let env_from_var = environment_suffix
    .map(|s| s.to_string())
    .or_else(|| env::var("CINDER_LOG_ENV").ok())
    .or_else(|| env::var("APP_ENV").ok());

  let mut files_to_check: Vec<String> = Vec::new();

  if let Some(env_str) = &env_from_var {
    if !env_str.is_empty() {
      files_to_check.push(format!("{}.{}.{}", base_name, env_str, extension));
    }
  }
  files_to_check.push(format!("{}.{}", base_name, extension));

  let search_dirs = [PathBuf::from(".")];

  for dir in &search_dirs {
    for file_name in &files_to_check {
      let path = dir.join(file_name);
      if path.is_file() {
        return Ok(path);
      }
    }
  }

  Err(Error::ConfigNotFound(format!(
    "Searched for: {:?} in {:?}. Provide a config file or check CINDER_LOG_ENV/APP_ENV.",
    files_to_check, search_dirs
  )))
}

/// Reads a YAML configuration file and initializes from it.
pub fn init_from_file(config_path: &Path) -> Result<InitResult> {
  println!("[cinder_log] Initializing from config file: {:?}", config_path);

  let file = StdFsFile::open(config_path)?;
  let reader = io::BufReader::new(file);
  let raw_config: ConfigRaw =
    serde_yaml::from_reader(reader).map_err(|e| Error::ConfigParse(e.to_string()))?;

  let internal_config = process_raw_config(raw_config)?;
  init_with_config(internal_config)
}

/// Initializes with runtime-detected collaborators.
pub fn init_with_config(config: ConfigInternal) -> Result<InitResult> {
  let collaborators = Collaborators::detect(Some(config.product.version.clone()));
  init_with_collaborators(config, collaborators)
}

/// Builds the file sink and logger, installs the global handle and, when
/// configured, the `tracing` subscriber and `log` bridge.
pub fn init_with_collaborators(
  config: ConfigInternal,
  collaborators: Collaborators,
) -> Result<InitResult> {
  println!("[cinder_log] Processed Internal Config: {:?}", config);

  let (diagnostics, error_rx_channel) = if config.error_reporting_enabled {
    println!("[cinder_log] Internal error reporting is ENABLED.");
    let (tx, rx) = mpsc::bounded::<InternalErrorReport>(INTERNAL_ERROR_CAPACITY);
    (Arc::new(Diagnostics::channel(tx)), Some(rx))
  } else {
    (Arc::new(Diagnostics::stderr()), None)
  };

  let crash_reporter = CrashReporter::new(
    config.crash_directory.clone(),
    config.product.clone(),
    collaborators.system,
    collaborators.session,
    collaborators.modules,
  );
  let sink = Arc::new(FileSink::with_diagnostics(
    config.file_sink_options(),
    crash_reporter,
    diagnostics.clone(),
  )?);
  println!("[cinder_log] Active log file: {:?}", sink.active_path());

  let dyn_sink: Arc<dyn LogSink> = sink.clone();
  let logger = Logger::with_diagnostics(dyn_sink, config.queue_capacity, diagnostics)?;

  if config.capture_tracing {
    if let Err(e) = install_tracing(&logger) {
      logger.shutdown();
      return Err(e);
    }
  }

  if global::set_global_logger(logger.clone()) {
    println!("[cinder_log] Global logger installed.");
  } else {
    println!("[cinder_log] A global logger is already installed; keeping it.");
  }

  println!("[cinder_log] Initialization complete.");
  Ok(InitResult {
    logger,
    sink,
    internal_error_rx: error_rx_channel,
  })
}

fn install_tracing(logger: &Logger) -> Result<()> {
  tracing_log::LogTracer::init().map_err(|e| Error::LogBridgeInit(e.to_string()))?;
  println!("[cinder_log] tracing-log bridge initialized.");

  let subscriber = tracing_subscriber::registry().with(ForwardingLayer::new(logger.clone()));
  tracing::subscriber::set_global_default(subscriber)
    .map_err(|e| Error::GlobalSubscriberSet(e.to_string()))?;
  println!("[cinder_log] Global tracing subscriber set.");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::LogLevel;
  use crate::system_info::UnknownSystem;
  use std::fs;
  use tempfile::tempdir;

  #[test]
  fn find_config_file_not_found() {
    let result = find_config_file(Some("no-such-environment"));
    assert!(matches!(result, Err(Error::ConfigNotFound(_))));
  }

  #[test]
  fn init_from_file_reports_parse_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cinder_log.yaml");
    fs::write(&path, "version: 1\nqueue_capacity: lots\n").unwrap();
    assert!(matches!(init_from_file(&path), Err(Error::ConfigParse(_))));
  }

  #[test]
  fn init_from_missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let result = init_from_file(&dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(Error::Io(_))));
  }

  #[test]
  fn dropping_init_result_drains_and_archives() {
    let dir = tempdir().unwrap();
    let config = ConfigInternal::with_root(dir.path());
    let collaborators = Collaborators {
      system: Arc::new(UnknownSystem),
      session: Arc::new(NoPlatformSession),
      modules: Arc::new(ProcessModules::new(None)),
    };

    let result = init_with_collaborators(config, collaborators).unwrap();
    result.logger().log(LogLevel::Info, "Test", "hello");
    drop(result);

    assert!(!dir.path().join("logs").join("latest.log").exists());
    let archives: Vec<_> = fs::read_dir(dir.path().join("logs"))
      .unwrap()
      .map(|e| e.unwrap().file_name().into_string().unwrap())
      .filter(|name| name.ends_with(".log.gz"))
      .collect();
    assert_eq!(archives.len(), 1);
  }
}
