//! Resilience patterns for remote calls
//!
//! - Bounded timeouts, optionally leaving the late operation running
//! - Retry with exponential backoff
//!
//! # Example
//!
//! ```rust
//! use storystream_resilience::{RetryPolicy, Timeout};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3)
//!     .with_initial_delay(Duration::from_millis(100));
//! assert_eq!(policy.max_attempts(), 3);
//!
//! let timeout = Timeout::new(Duration::from_secs(10));
//! assert_eq!(timeout.duration(), Duration::from_secs(10));
//! ```

mod error;
mod retry;
mod timeout;

pub use error::{ResilienceError, ResilienceResult};
pub use retry::RetryPolicy;
pub use timeout::{with_detached_timeout, with_timeout, Timeout};
