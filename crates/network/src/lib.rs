// crates/network/src/lib.rs
//! HTTP progress backends for the sync engine
//!
//! [`LibraryServerBackend`] talks to the primary library server and
//! [`CloudStoreBackend`] to the secondary cloud key-value store. Both
//! implement [`storystream_sync_engine::ProgressBackend`].

mod backends;
mod client;
mod connectivity;
mod error;
mod protocol;

pub use backends::{CloudStoreBackend, LibraryServerBackend};
pub use client::{endpoint, Client, ClientConfig};
pub use connectivity::ConnectivityChecker;
pub use error::{NetworkError, NetworkResult};
pub use protocol::{records_to_map, ProgressRecord};
