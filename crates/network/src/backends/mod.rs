// crates/network/src/backends/mod.rs
//! HTTP implementations of the progress backend contract

mod cloud;
mod library;

pub use cloud::CloudStoreBackend;
pub use library::LibraryServerBackend;

use crate::error::NetworkResult;
use storystream_sync_engine::SendOutcome;

/// Maps a request result onto a send outcome
fn send_outcome(result: NetworkResult<()>, backend: &str) -> SendOutcome {
    match result {
        Ok(()) => SendOutcome::Success,
        Err(e) => SendOutcome::from_error(&e.into_sync_error(backend)),
    }
}
