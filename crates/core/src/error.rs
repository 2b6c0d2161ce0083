//! Error types for core domain values

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while constructing domain values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Book identifier was empty or whitespace
    #[error("Book id must not be empty")]
    EmptyBookId,

    /// Locator has no resource reference
    #[error("Locator href must not be empty")]
    EmptyHref,

    /// Locator string could not be parsed
    #[error("Invalid locator '{input}': {reason}")]
    InvalidLocator { input: String, reason: String },
}
