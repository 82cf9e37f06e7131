// examples/basic_usage.rs

use cinder_log::global;
use std::path::Path;

// A module to simulate our application's logic.
mod world {
  use tracing::{info, instrument};

  #[instrument]
  pub fn generate_chunk(x: i32, y: i32) {
    info!(target: "World", x, y, "Generating chunk");
    cinder_log::global::debug("World", format!("Chunk {},{} has 4096 tiles", x, y));
  }
}

#[derive(Debug)]
struct SaveError(std::io::Error);

impl std::fmt::Display for SaveError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "could not write the save file")
  }
}

impl std::error::Error for SaveError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    Some(&self.0)
  }
}

fn main() {
  // --- Initialization ---
  let config_path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/examples/cinder_log.yaml"));
  let logging = cinder_log::init_from_file(config_path).expect("Failed to initialize cinder_log");
  global::install_panic_hook();

  // --- Logging ---
  println!("\n--- Emitting Logs ---\n");
  global::info("Boot", "Application starting up.");
  global::warn("Audio", "No output device found, running muted.");

  // `tracing` and `log` macros are forwarded too.
  world::generate_chunk(4, 2);
  log::error!("A message from the `log` facade.");

  // --- Rotation on request ---
  match logging.archive() {
    Ok(outcome) => println!("Mid-session archive: {:?}", outcome),
    Err(e) => eprintln!("Mid-session archive failed: {}", e),
  }
  global::info("Boot", "Logging continues into a fresh file.");

  // --- Crash Reports ---
  let error = SaveError(std::io::Error::from_raw_os_error(28));
  global::crash_from_error(&error);
  let _ = std::panic::catch_unwind(|| panic!("Simulated fatal error"));

  println!("\n--- Logging Complete ---\n");
  println!("Stats: {:?}", logging.logger().stats());
  println!("Check 'target/cinder_log_demo/logs' and 'target/cinder_log_demo/crash-reports'.");

  // `logging` is dropped here: queues drain and the session log is archived.
}
