//! Shared types for the combination sweep
//!
//! Contains the ledger record model, the component tags used for structured
//! logging and the error type shared by every crate in the workspace.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
