// Assembles and writes standalone crash report files.

use crate::error::{Error, Result};
use crate::model::{CrashEntry, ErrorRecord};
use crate::platform::PlatformSession;
use crate::system_info::{ModuleInfo, ModuleInventory, SystemInfo, UNKNOWN_CPU};

use chrono::Local;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MIB: u64 = 1024 * 1024;
const UNKNOWN: &str = "Unknown";
const NOT_AVAILABLE: &str = "N/A";
// Bound on `_n` suffixes tried when several crashes land in the same second.
const MAX_NAME_ATTEMPTS: u32 = 1000;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Name and version printed in the report header and environment section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
  pub name: String,
  pub version: String,
}

impl Default for ProductInfo {
  fn default() -> Self {
    Self {
      name: "Application".to_string(),
      version: "0.0.0".to_string(),
    }
  }
}

/// Builds crash reports from a `CrashEntry` and the host facts supplied by its
/// collaborators.
///
/// Every collaborator call is best-effort: a call that panics is replaced by a
/// placeholder and the rest of the report is still produced.
pub struct CrashReporter {
  directory: PathBuf,
  product: ProductInfo,
  system: Arc<dyn SystemInfo>,
  session: Arc<dyn PlatformSession>,
  modules: Arc<dyn ModuleInventory>,
}

impl CrashReporter {
  pub fn new(
    directory: PathBuf,
    product: ProductInfo,
    system: Arc<dyn SystemInfo>,
    session: Arc<dyn PlatformSession>,
    modules: Arc<dyn ModuleInventory>,
  ) -> Self {
    Self {
      directory,
      product,
      system,
      session,
      modules,
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// Writes the report for `entry` into a new file and returns its path.
  pub fn write(&self, entry: &CrashEntry) -> Result<PathBuf> {
    let report = panic::catch_unwind(AssertUnwindSafe(|| self.render(entry)))
      .map_err(|_| Error::CrashReport("report assembly panicked".to_string()))?;

    fs::create_dir_all(&self.directory).map_err(|e| {
      Error::CrashReport(format!(
        "failed to create crash directory {:?}: {}",
        self.directory, e
      ))
    })?;

    let base_name = entry
      .timestamp
      .with_timezone(&Local)
      .format("CrashReport_%Y-%m-%d_%H.%M.%S")
      .to_string();
    publish(&self.directory, &base_name, |file| file.write_all(report.as_bytes()))
  }

  /// Renders the full report text.
  pub fn render(&self, entry: &CrashEntry) -> String {
    let mut out = String::with_capacity(4096);

    let _ = writeln!(out, "=== {} CRASH REPORT ===", self.product.name.to_uppercase());
    let _ = writeln!(out, "Time: {} UTC", entry.timestamp.format("%Y-%m-%d %H:%M:%S"));
    out.push('\n');

    self.render_environment(&mut out);
    self.render_session(&mut out);
    self.render_runtime(&mut out);
    render_thread(&mut out, entry);
    render_exception_chain(&mut out, &entry.error);
    self.render_modules(&mut out);

    out
  }

  fn render_environment(&self, out: &mut String) {
    let cpu = best_effort(|| self.system.cpu_name()).unwrap_or_else(|| UNKNOWN_CPU.to_string());
    let ram = best_effort(|| self.system.ram_bytes())
      .filter(|bytes| *bytes > 0)
      .map(|bytes| format!("{} GB", (bytes as f64 / BYTES_PER_GIB).round() as u64))
      .unwrap_or_else(|| UNKNOWN.to_string());
    let os = best_effort(|| self.system.os_description()).unwrap_or_else(|| UNKNOWN.to_string());

    out.push_str("----- Environment Info -----\n");
    let _ = writeln!(out, "Product Name: {}", self.product.name);
    let _ = writeln!(out, "Product Version: {}", self.product.version);
    let _ = writeln!(out, "OS: {}", os);
    let _ = writeln!(out, "Runtime: {}", runtime_description());
    let _ = writeln!(out, "CPU: {}", cpu);
    let _ = writeln!(out, "RAM: {}", ram);
    out.push('\n');
  }

  fn render_session(&self, out: &mut String) {
    let active = best_effort(|| self.session.is_active());
    let (user, user_id) = if active == Some(true) {
      (
        best_effort(|| self.session.user_name()).flatten(),
        best_effort(|| self.session.user_id()).flatten(),
      )
    } else {
      (None, None)
    };

    out.push_str("----- Platform Session Info -----\n");
    let _ = writeln!(
      out,
      "Session Active: {}",
      active.map_or_else(|| UNKNOWN.to_string(), |a| a.to_string())
    );
    let _ = writeln!(out, "User: {}", user.as_deref().unwrap_or(UNKNOWN));
    let _ = writeln!(out, "User ID: {}", user_id.as_deref().unwrap_or(UNKNOWN));
    out.push('\n');
  }

  fn render_runtime(&self, out: &mut String) {
    let args: Vec<String> = std::env::args_os()
      .map(|a| a.to_string_lossy().into_owned())
      .collect();
    let resident = best_effort(|| self.system.resident_memory_bytes())
      .flatten()
      .map(|bytes| format!("{} MB", bytes / BYTES_PER_MIB))
      .unwrap_or_else(|| UNKNOWN.to_string());

    out.push_str("----- Runtime Info -----\n");
    let _ = writeln!(out, "Args: {}", args.join(" "));
    let _ = writeln!(out, "Process Id: {}", std::process::id());
    let _ = writeln!(out, "Resident Memory: {}", resident);
    out.push('\n');
  }

  fn render_modules(&self, out: &mut String) {
    out.push_str("----- Loaded Modules -----\n");
    match best_effort(|| self.modules.modules()) {
      Some(modules) => {
        for ModuleInfo { name, version } in modules {
          let _ = writeln!(out, "{} {}", name, version.as_deref().unwrap_or(NOT_AVAILABLE));
        }
      }
      None => out.push_str("Unavailable\n"),
    }
  }
}

fn render_thread(out: &mut String, entry: &CrashEntry) {
  out.push_str("----- Thread Info -----\n");
  let _ = writeln!(out, "Thread: {}", entry.thread.name.as_deref().unwrap_or(UNKNOWN));
  let _ = writeln!(out, "Thread ID: {}", entry.thread.id);
  let _ = writeln!(out, "Main Thread: {}", entry.thread.is_main());
  let _ = writeln!(out, "Thread Pool: {}", entry.thread.is_pool_worker());
  out.push('\n');
}

/// The outermost error gets the `Exception` and `StackTrace` sections; every
/// cause below it gets one `Inner Exception` section, outermost first.
fn render_exception_chain(out: &mut String, error: &ErrorRecord) {
  out.push_str("----- Exception -----\n");
  let _ = writeln!(out, "Type: {}", error.kind);
  let _ = writeln!(out, "Message: {}", error.message);
  let _ = writeln!(out, "Code: {}", format_code(error.code));
  out.push('\n');

  out.push_str("----- StackTrace -----\n");
  let _ = writeln!(out, "{}", error.backtrace.as_deref().unwrap_or(NOT_AVAILABLE).trim_end());
  out.push('\n');

  for inner in error.chain().skip(1) {
    out.push_str("----- Inner Exception -----\n");
    let _ = writeln!(out, "Type: {}", inner.kind);
    let _ = writeln!(out, "Message: {}", inner.message);
    let _ = writeln!(out, "Code: {}", format_code(inner.code));
    let _ = writeln!(
      out,
      "StackTrace: {}",
      inner.backtrace.as_deref().unwrap_or(NOT_AVAILABLE).trim_end()
    );
    out.push('\n');
  }
}

fn format_code(code: Option<i64>) -> String {
  code.map_or_else(|| NOT_AVAILABLE.to_string(), |c| c.to_string())
}

fn runtime_description() -> String {
  format!(
    "Rust std ({}-{}, {} build)",
    std::env::consts::ARCH,
    std::env::consts::OS,
    if cfg!(debug_assertions) { "debug" } else { "release" }
  )
}

fn best_effort<T>(f: impl FnOnce() -> T) -> Option<T> {
  panic::catch_unwind(AssertUnwindSafe(f)).ok()
}

/// Writes the report into a hidden staging file, then links it in as
/// `{base}.txt`, or `{base}_{n}.txt` with the first free `n >= 2`. A report
/// that fails to write leaves nothing behind and claims no name.
fn publish<F>(dir: &Path, base_name: &str, write: F) -> Result<PathBuf>
where
  F: FnOnce(&mut File) -> io::Result<()>,
{
  let staging = dir.join(format!(
    ".{}.{}-{}.tmp",
    base_name,
    std::process::id(),
    STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
  ));
  let mut file = File::options()
    .write(true)
    .create_new(true)
    .open(&staging)
    .map_err(|e| Error::CrashReport(format!("failed to create {:?}: {}", staging, e)))?;

  let written = write(&mut file).and_then(|_| file.sync_all());
  drop(file);
  let result = match written {
    Ok(()) => link_unique(dir, base_name, &staging),
    Err(e) => Err(Error::CrashReport(format!(
      "failed to write {:?}: {}",
      staging, e
    ))),
  };
  let _ = fs::remove_file(&staging);
  result
}

fn link_unique(dir: &Path, base_name: &str, staging: &Path) -> Result<PathBuf> {
  for attempt in 1..=MAX_NAME_ATTEMPTS {
    let file_name = if attempt == 1 {
      format!("{}.txt", base_name)
    } else {
      format!("{}_{}.txt", base_name, attempt)
    };
    let path = dir.join(file_name);
    match fs::hard_link(staging, &path) {
      Ok(()) => return Ok(path),
      Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
      // Filesystems without hard links get a no-clobber copy instead.
      Err(_) => match copy_new(staging, &path) {
        Ok(()) => return Ok(path),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
        Err(e) => {
          return Err(Error::CrashReport(format!("failed to create {:?}: {}", path, e)));
        }
      },
    }
  }
  Err(Error::CrashReport(format!(
    "no free crash report name for {} in {:?}",
    base_name, dir
  )))
}

fn copy_new(source: &Path, destination: &Path) -> io::Result<()> {
  let mut output = File::options().write(true).create_new(true).open(destination)?;
  let copied = io::copy(&mut File::open(source)?, &mut output).and_then(|_| output.sync_all());
  if copied.is_err() {
    drop(output);
    let _ = fs::remove_file(destination);
  }
  copied
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::NoPlatformSession;
  use crate::system_info::UnknownSystem;
  use tempfile::tempdir;

  struct PanickingSystem;

  impl SystemInfo for PanickingSystem {
    fn cpu_name(&self) -> String {
      panic!("cpu lookup failed")
    }
    fn ram_bytes(&self) -> u64 {
      panic!("ram lookup failed")
    }
    fn os_description(&self) -> String {
      panic!("os lookup failed")
    }
    fn resident_memory_bytes(&self) -> Option<u64> {
      panic!("rss lookup failed")
    }
  }

  struct PanickingSession;

  impl PlatformSession for PanickingSession {
    fn is_active(&self) -> bool {
      panic!("session unavailable")
    }
    fn user_name(&self) -> Option<String> {
      panic!("session unavailable")
    }
    fn user_id(&self) -> Option<String> {
      panic!("session unavailable")
    }
  }

  struct PanickingModules;

  impl ModuleInventory for PanickingModules {
    fn modules(&self) -> Vec<ModuleInfo> {
      panic!("module walk failed")
    }
  }

  struct ActiveSession;

  impl PlatformSession for ActiveSession {
    fn is_active(&self) -> bool {
      true
    }
    fn user_name(&self) -> Option<String> {
      Some("farmer".to_string())
    }
    fn user_id(&self) -> Option<String> {
      Some("76561198000000000".to_string())
    }
  }

  struct FixedSystem;

  impl SystemInfo for FixedSystem {
    fn cpu_name(&self) -> String {
      "Test CPU 9000".to_string()
    }
    fn ram_bytes(&self) -> u64 {
      // 15.6 GiB rounds to 16.
      16_750_372_454
    }
  }

  struct NoModules;

  impl ModuleInventory for NoModules {
    fn modules(&self) -> Vec<ModuleInfo> {
      vec![ModuleInfo {
        name: "libc.so.6".to_string(),
        version: Some("6".to_string()),
      }]
    }
  }

  const HEADERS: [&str; 8] = [
    "=== FARMSIM CRASH REPORT ===",
    "----- Environment Info -----",
    "----- Platform Session Info -----",
    "----- Runtime Info -----",
    "----- Thread Info -----",
    "----- Exception -----",
    "----- StackTrace -----",
    "----- Loaded Modules -----",
  ];

  fn product() -> ProductInfo {
    ProductInfo {
      name: "FarmSim".to_string(),
      version: "1.2.3".to_string(),
    }
  }

  fn reporter(
    dir: &Path,
    system: Arc<dyn SystemInfo>,
    session: Arc<dyn PlatformSession>,
    modules: Arc<dyn ModuleInventory>,
  ) -> CrashReporter {
    CrashReporter::new(dir.join("crash-reports"), product(), system, session, modules)
  }

  fn assert_headers_in_order(report: &str) {
    let mut last = 0;
    for header in HEADERS {
      let pos = report[last..]
        .find(header)
        .unwrap_or_else(|| panic!("missing or out of order: {}\n{}", header, report));
      last += pos + header.len();
    }
  }

  #[test]
  fn report_survives_every_collaborator_failing() {
    let dir = tempdir().unwrap();
    let reporter = reporter(
      dir.path(),
      Arc::new(PanickingSystem),
      Arc::new(PanickingSession),
      Arc::new(PanickingModules),
    );
    let entry = CrashEntry::new(ErrorRecord::new("WorldGenError", "seed rejected"));

    let path = reporter.write(&entry).unwrap();
    let report = fs::read_to_string(&path).unwrap();

    assert_headers_in_order(&report);
    assert!(report.contains(&format!("CPU: {}", UNKNOWN_CPU)));
    assert!(report.contains("RAM: Unknown"));
    assert!(report.contains("OS: Unknown"));
    assert!(report.contains("Session Active: Unknown"));
    assert!(report.contains("Resident Memory: Unknown"));
    assert!(report.contains("----- Loaded Modules -----\nUnavailable\n"));
    assert!(report.contains("Type: WorldGenError"));
  }

  #[test]
  fn nested_causes_become_inner_exception_sections() {
    let dir = tempdir().unwrap();
    let reporter = reporter(
      dir.path(),
      Arc::new(UnknownSystem),
      Arc::new(NoPlatformSession),
      Arc::new(NoModules),
    );
    let error = ErrorRecord::new("SaveError", "could not save")
      .with_code(-2147024893)
      .caused_by(ErrorRecord::new("SerializeError", "bad chunk"))
      .caused_by(ErrorRecord::new("std::io::Error", "disk full").with_code(28));

    let report = reporter.render(&CrashEntry::new(error));

    assert_eq!(report.matches("----- Exception -----").count(), 1);
    assert_eq!(report.matches("----- Inner Exception -----").count(), 2);
    let serialize = report.find("Type: SerializeError").unwrap();
    let io = report.find("Type: std::io::Error").unwrap();
    let outer = report.find("Type: SaveError").unwrap();
    assert!(outer < serialize && serialize < io);
    assert!(report.contains("Code: -2147024893"));
    assert!(report.contains("Code: 28"));
    assert!(report.contains("StackTrace: N/A"));
  }

  #[test]
  fn environment_and_session_facts_are_rendered() {
    let dir = tempdir().unwrap();
    let reporter = reporter(
      dir.path(),
      Arc::new(FixedSystem),
      Arc::new(ActiveSession),
      Arc::new(NoModules),
    );
    let report = reporter.render(&CrashEntry::new(ErrorRecord::new("Boom", "x")));

    assert!(report.starts_with("=== FARMSIM CRASH REPORT ===\nTime: "));
    assert!(report.contains("Product Name: FarmSim\nProduct Version: 1.2.3\n"));
    assert!(report.contains("CPU: Test CPU 9000\nRAM: 16 GB\n"));
    assert!(report.contains("Session Active: true\nUser: farmer\nUser ID: 76561198000000000\n"));
    assert!(report.contains(&format!("Process Id: {}\n", std::process::id())));
    assert!(report.contains("libc.so.6 6\n"));
  }

  #[test]
  fn crashes_in_the_same_second_get_distinct_files() {
    let dir = tempdir().unwrap();
    let reporter = reporter(
      dir.path(),
      Arc::new(UnknownSystem),
      Arc::new(NoPlatformSession),
      Arc::new(NoModules),
    );
    let entry = CrashEntry::new(ErrorRecord::new("Boom", "x"));

    let first = reporter.write(&entry).unwrap();
    let second = reporter.write(&entry).unwrap();
    let third = reporter.write(&entry).unwrap();

    let stem = entry
      .timestamp
      .with_timezone(&Local)
      .format("CrashReport_%Y-%m-%d_%H.%M.%S")
      .to_string();
    assert_eq!(first.file_name().unwrap().to_str().unwrap(), format!("{}.txt", stem));
    assert_eq!(second.file_name().unwrap().to_str().unwrap(), format!("{}_2.txt", stem));
    assert_eq!(third.file_name().unwrap().to_str().unwrap(), format!("{}_3.txt", stem));

    // Staging files never outlive a write.
    assert_eq!(fs::read_dir(reporter.directory()).unwrap().count(), 3);
  }

  #[test]
  fn failed_write_leaves_no_report_and_frees_the_name() {
    let dir = tempdir().unwrap();

    let result = publish(dir.path(), "CrashReport_x", |file| {
      file.write_all(b"----- Environment Info -----\n")?;
      Err(io::Error::new(io::ErrorKind::Other, "disk full"))
    });
    assert!(matches!(result, Err(Error::CrashReport(_))));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

    let path = publish(dir.path(), "CrashReport_x", |file| file.write_all(b"complete\n")).unwrap();
    assert_eq!(path, dir.path().join("CrashReport_x.txt"));
    assert_eq!(fs::read_to_string(&path).unwrap(), "complete\n");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
  }

  #[test]
  fn thread_section_reports_pool_membership() {
    let dir = tempdir().unwrap();
    let reporter = reporter(
      dir.path(),
      Arc::new(UnknownSystem),
      Arc::new(NoPlatformSession),
      Arc::new(NoModules),
    );
    let mut entry = CrashEntry::new(ErrorRecord::new("Boom", "x"));
    entry.thread.name = Some("cinder-log-crash".to_string());
    let report = reporter.render(&entry);
    assert!(report.contains("Main Thread: false\nThread Pool: true\n"));

    entry.thread.name = Some("main".to_string());
    let report = reporter.render(&entry);
    assert!(report.contains("Main Thread: true\nThread Pool: false\n"));
  }
}
