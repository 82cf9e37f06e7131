// src/config/mod.rs
// This module handles configuration parsing and validation.

pub mod processed; // Validated configuration with resolved paths
pub mod raw; // Structs directly mapping to the YAML structure

pub use processed::{process_raw_config, ConfigInternal};
pub use raw::ConfigRaw;
