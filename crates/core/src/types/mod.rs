//! Domain types for StoryStream
//!
//! - `book`: book identifiers
//! - `locator`: positions within a book
//! - `common`: timestamps

mod book;
mod common;
mod locator;

// Re-export all public types
pub use book::BookId;
pub use common::Timestamp;
pub use locator::Locator;
