//! Core business logic modules
//!
//! This module contains pure logic with no I/O dependencies: the combination
//! space, themes, the attribute schema and the state machine types.

pub mod attributes;
pub mod space;
pub mod state;
pub mod theme;

pub use attributes::{content_type_for, AssetAttributes};
pub use space::{CategorySpec, Combination, CombinationIter, CombinationSpace};
pub use state::{Phase, RunOutcome, RunStats, StepOutcome, UploadSkip};
pub use theme::Theme;
