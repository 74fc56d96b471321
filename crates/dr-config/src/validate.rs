//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::recorder::RecorderConfig;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::MissingField(_) => 64,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

/// Validate a loaded configuration semantically.
pub fn validate_config(config: &RecorderConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    if config.id.trim().is_empty() {
        return Err(ValidationError::MissingField("id".to_string()));
    }

    if config.storage.directory.as_os_str().is_empty() {
        return Err(ValidationError::MissingField("storage.directory".to_string()));
    }

    validate_ratio("health.disk_ratio_limit", config.health.disk_ratio_limit)?;
    validate_ratio(
        "health.missing_fraction_limit",
        config.health.missing_fraction_limit,
    )?;

    validate_interval("health.poll_interval_secs", config.health.poll_interval_secs)?;
    validate_interval(
        "performance.poll_interval_secs",
        config.performance.poll_interval_secs,
    )?;

    let margin = config.recording.margin_secs;
    if !margin.is_finite() || margin <= 0.0 {
        return Err(ValidationError::InvalidValue {
            field: "recording.margin_secs".to_string(),
            message: format!("Must be a positive number of seconds, got {}", margin),
        });
    }

    Ok(())
}

/// A threshold ratio must lie in (0, 1].
fn validate_ratio(field: &str, value: f64) -> ValidationResult<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: format!("Must be in (0, 1], got {}", value),
        });
    }
    Ok(())
}

fn validate_interval(field: &str, secs: u64) -> ValidationResult<()> {
    if secs == 0 {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: "Must be at least 1 second".to_string(),
        });
    }
    Ok(())
}
