//! Shared domain types for StoryStream reading-progress sync
//!
//! These are the leaves every other crate builds on: book identifiers,
//! millisecond timestamps, and the [`Locator`] describing a position in a book.

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use types::{BookId, Locator, Timestamp};
