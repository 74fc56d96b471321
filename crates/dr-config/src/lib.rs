//! Data recorder configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for `recorder.json`
//! - Config resolution (CLI → env → XDG → system → defaults)
//! - Semantic validation

pub mod recorder;
pub mod resolve;
pub mod validate;

pub use recorder::{
    EntryOrder, HealthConfig, PerformanceConfig, RecorderConfig, RecordingConfig, StorageConfig,
};
pub use resolve::{load_config, resolve_config, ConfigSource, LoadedConfig};
pub use validate::{validate_config, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
