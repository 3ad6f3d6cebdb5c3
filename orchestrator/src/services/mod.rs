//! Service implementations
//!
//! This module contains real implementations of all service traits.
//! These are the production implementations that handle actual I/O operations.

pub mod comfy;
pub mod file_system;
pub mod ledger;
pub mod storage;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use comfy::ComfyClient;
pub use file_system::RealFileSystem;
pub use ledger::{LedgerLayout, SqliteProgressStore, INTERRUPTED_REASON};
pub use storage::HttpStorageClient;
