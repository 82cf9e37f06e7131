// Facts about the host that end up in crash reports.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use sysinfo::{ProcessesToUpdate, System};

/// Reported when no collector can name the CPU.
pub const UNKNOWN_CPU: &str = "Unknown CPU";

/// The host facts a crash report needs. Implementations never fail: they fall
/// back to `UNKNOWN_CPU` and `0` instead.
pub trait SystemInfo: Send + Sync {
  fn cpu_name(&self) -> String;

  /// Total physical memory in bytes.
  fn ram_bytes(&self) -> u64;

  fn os_description(&self) -> String {
    format!("{} {}", env::consts::OS, env::consts::ARCH)
  }

  /// Resident memory of the current process in bytes.
  fn resident_memory_bytes(&self) -> Option<u64> {
    None
  }
}

/// Picks the collector for the platform the process is running on.
pub fn detect() -> Arc<dyn SystemInfo> {
  match env::consts::OS {
    "linux" => Arc::new(ProcfsCollector::new(false)),
    "android" => Arc::new(ProcfsCollector::new(true)),
    "macos" | "ios" | "windows" | "freebsd" | "netbsd" => Arc::new(SysinfoCollector::new()),
    _ => Arc::new(UnknownSystem),
  }
}

/// Used where no collector exists for the platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownSystem;

impl SystemInfo for UnknownSystem {
  fn cpu_name(&self) -> String {
    UNKNOWN_CPU.to_string()
  }

  fn ram_bytes(&self) -> u64 {
    0
  }
}

/// Reads `/proc` directly. Values are cached once read successfully.
pub struct ProcfsCollector {
  android: bool,
  cpu_name: OnceCell<String>,
  ram_bytes: OnceCell<u64>,
}

impl ProcfsCollector {
  pub fn new(android: bool) -> Self {
    Self {
      android,
      cpu_name: OnceCell::new(),
      ram_bytes: OnceCell::new(),
    }
  }
}

impl SystemInfo for ProcfsCollector {
  fn cpu_name(&self) -> String {
    if let Some(name) = self.cpu_name.get() {
      return name.clone();
    }
    match fs::read_to_string("/proc/cpuinfo")
      .ok()
      .and_then(|content| parse_cpu_name(&content, self.android))
    {
      Some(name) => self.cpu_name.get_or_init(|| name).clone(),
      None => UNKNOWN_CPU.to_string(),
    }
  }

  fn ram_bytes(&self) -> u64 {
    if let Some(bytes) = self.ram_bytes.get() {
      return *bytes;
    }
    match fs::read_to_string("/proc/meminfo")
      .ok()
      .and_then(|content| parse_kib_field(&content, "MemTotal"))
    {
      Some(kib) => *self.ram_bytes.get_or_init(|| kib * 1024),
      None => 0,
    }
  }

  fn os_description(&self) -> String {
    let pretty_name = fs::read_to_string("/etc/os-release")
      .ok()
      .and_then(|content| parse_os_release(&content));
    let kernel = fs::read_to_string("/proc/sys/kernel/osrelease")
      .ok()
      .map(|s| s.trim().to_string());
    match (pretty_name, kernel) {
      (Some(name), Some(kernel)) => format!("{} (kernel {})", name, kernel),
      (Some(name), None) => name,
      (None, Some(kernel)) => format!("{} {}", env::consts::OS, kernel),
      (None, None) => format!("{} {}", env::consts::OS, env::consts::ARCH),
    }
  }

  fn resident_memory_bytes(&self) -> Option<u64> {
    fs::read_to_string("/proc/self/status")
      .ok()
      .and_then(|content| parse_kib_field(&content, "VmRSS"))
      .map(|kib| kib * 1024)
  }
}

/// Finds the CPU model in `/proc/cpuinfo` content. Android kernels often only
/// expose `Hardware` or `Processor`.
pub(crate) fn parse_cpu_name(cpuinfo: &str, android: bool) -> Option<String> {
  let keys: &[&str] = if android {
    &["model name", "Hardware", "Processor"]
  } else {
    &["model name"]
  };
  keys.iter().find_map(|key| {
    cpuinfo.lines().find_map(|line| {
      let (name, value) = line.split_once(':')?;
      let value = value.trim();
      (name.trim() == *key && !value.is_empty()).then(|| value.to_string())
    })
  })
}

/// Parses a `Key:   12345 kB` line as found in `/proc/meminfo` and `/proc/self/status`.
pub(crate) fn parse_kib_field(content: &str, key: &str) -> Option<u64> {
  content.lines().find_map(|line| {
    let (name, value) = line.split_once(':')?;
    if name.trim() != key {
      return None;
    }
    value.split_whitespace().next()?.parse().ok()
  })
}

fn parse_os_release(content: &str) -> Option<String> {
  content.lines().find_map(|line| {
    let value = line.strip_prefix("PRETTY_NAME=")?;
    let value = value.trim().trim_matches('"');
    (!value.is_empty()).then(|| value.to_string())
  })
}

/// Collector backed by the `sysinfo` crate for platforms without `/proc`.
pub struct SysinfoCollector {
  system: Mutex<System>,
  cpu_name: OnceCell<String>,
  ram_bytes: OnceCell<u64>,
}

impl SysinfoCollector {
  pub fn new() -> Self {
    Self {
      system: Mutex::new(System::new()),
      cpu_name: OnceCell::new(),
      ram_bytes: OnceCell::new(),
    }
  }
}

impl Default for SysinfoCollector {
  fn default() -> Self {
    Self::new()
  }
}

impl SystemInfo for SysinfoCollector {
  fn cpu_name(&self) -> String {
    if let Some(name) = self.cpu_name.get() {
      return name.clone();
    }
    let mut system = self.system.lock();
    system.refresh_cpu_all();
    let brand = system
      .cpus()
      .first()
      .map(|cpu| cpu.brand().trim().to_string())
      .filter(|brand| !brand.is_empty());
    match brand {
      Some(name) => self.cpu_name.get_or_init(|| name).clone(),
      None => UNKNOWN_CPU.to_string(),
    }
  }

  fn ram_bytes(&self) -> u64 {
    if let Some(bytes) = self.ram_bytes.get() {
      return *bytes;
    }
    let mut system = self.system.lock();
    system.refresh_memory();
    match system.total_memory() {
      0 => 0,
      total => *self.ram_bytes.get_or_init(|| total),
    }
  }

  fn os_description(&self) -> String {
    System::long_os_version()
      .unwrap_or_else(|| format!("{} {}", env::consts::OS, env::consts::ARCH))
  }

  fn resident_memory_bytes(&self) -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = self.system.lock();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|process| process.memory())
  }
}

/// One code module loaded into the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
  pub name: String,
  pub version: Option<String>,
}

/// Lists the code modules loaded into the process.
pub trait ModuleInventory: Send + Sync {
  fn modules(&self) -> Vec<ModuleInfo>;
}

/// The executable itself plus, where `/proc/self/maps` exists, every mapped
/// shared object.
pub struct ProcessModules {
  executable_version: Option<String>,
}

impl ProcessModules {
  pub fn new(executable_version: Option<String>) -> Self {
    Self { executable_version }
  }
}

impl ModuleInventory for ProcessModules {
  fn modules(&self) -> Vec<ModuleInfo> {
    let mut modules = Vec::new();
    if let Ok(exe) = env::current_exe() {
      let name = exe
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| exe.display().to_string());
      modules.push(ModuleInfo {
        name,
        version: self.executable_version.clone(),
      });
    }
    if let Ok(maps) = fs::read_to_string("/proc/self/maps") {
      modules.extend(parse_mapped_libraries(&maps));
    }
    modules
  }
}

/// Extracts distinct shared objects from `/proc/self/maps` content, in the
/// order they first appear.
pub(crate) fn parse_mapped_libraries(maps: &str) -> Vec<ModuleInfo> {
  let mut seen = Vec::<String>::new();
  let mut modules = Vec::new();
  for line in maps.lines() {
    // address perms offset dev inode pathname
    let Some(path) = line.split_whitespace().nth(5) else {
      continue;
    };
    let Some(name) = Path::new(path).file_name().and_then(|n| n.to_str()) else {
      continue;
    };
    let Some(idx) = name.find(".so") else {
      continue;
    };
    let rest = &name[idx + 3..];
    if !(rest.is_empty() || rest.starts_with('.')) {
      continue;
    }
    if seen.iter().any(|s| s == name) {
      continue;
    }
    seen.push(name.to_string());
    let version = rest.strip_prefix('.').filter(|v| !v.is_empty()).map(str::to_string);
    modules.push(ModuleInfo {
      name: name.to_string(),
      version,
    });
  }
  modules
}
