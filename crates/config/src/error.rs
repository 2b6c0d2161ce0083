//! Error types for the configuration system

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Why loading or saving `config.toml` failed
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Staging or renaming the new file failed; the previous file is intact
    #[error("Cannot write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not valid TOML: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Cannot encode config as TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// One or more fields out of range; joined [`ValidationError`] messages
    #[error("Invalid config: {0}")]
    ValidationError(String),

    #[error("Cannot create directory {path}: {source}")]
    DirectoryCreationError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No usable config directory: {reason}")]
    PathResolutionError { reason: String },

    /// Copying the old file to `config.toml.backup` failed; nothing was written
    #[error("Cannot back up config to {path}: {source}")]
    BackupError {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Validation error for a specific config field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Path to the field (e.g., "sync.backend_timeout_secs")
    pub field: String,

    /// Human-readable error message
    pub message: String,

    /// The invalid value, if available
    pub value: Option<String>,
}

impl ValidationError {
    /// Creates a new validation error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    /// Creates a validation error with the invalid value
    pub fn with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: Some(value.to_string()),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Field '{}': {}", self.field, self.message)?;
        if let Some(ref value) = self.value {
            write!(f, " (got: {})", value)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_name_the_file() {
        let err = ConfigError::BackupError {
            path: PathBuf::from("/etc/storystream/config.toml.backup"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "Cannot back up config to /etc/storystream/config.toml.backup: denied"
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("sync.backend_timeout_secs", "must be between 1 and 120");
        assert_eq!(
            err.to_string(),
            "Field 'sync.backend_timeout_secs': must be between 1 and 120"
        );
    }

    #[test]
    fn test_validation_error_with_value() {
        let err = ValidationError::with_value(
            "sync.backend_timeout_secs",
            "must be between 1 and 120",
            "0",
        );
        assert_eq!(
            err.to_string(),
            "Field 'sync.backend_timeout_secs': must be between 1 and 120 (got: 0)"
        );
    }
}
