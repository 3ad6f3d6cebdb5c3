//! Test fixtures and data for orchestrator tests
//!
//! This module provides consistent test data and fixtures used across all test suites.

use std::time::Duration;

use orchestrator::{CategorySpec, CombinationSpace, RunPolicy};

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const APP_TAG: &'static str = "TestCats";
    pub const OUTPUT_PREFIX: &'static str = "cat";
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const UPLOAD_THRESHOLD: u64 = 1024;

    /// `{subject: 3, style: 2}`, six combinations
    pub fn small_space() -> CombinationSpace {
        CombinationSpace::new(vec![
            CategorySpec::new("subject", &["cat", "dog", "fox"]),
            CategorySpec::new("style", &["anime", "oil"]),
        ])
        .unwrap()
    }

    /// A category with no values makes the whole space empty
    pub fn empty_space() -> CombinationSpace {
        CombinationSpace::new(vec![
            CategorySpec::new("subject", &["cat"]),
            CategorySpec::new("style", &[]),
        ])
        .unwrap()
    }

    /// Rendered prompt for an index of [`Self::small_space`]
    pub fn prompt(index: u64) -> String {
        Self::small_space().render_index(index).unwrap()
    }

    /// Policy with no inter-iteration delay so tests run fast
    pub fn policy() -> RunPolicy {
        RunPolicy {
            upload_enabled: true,
            upload_size_threshold: Self::UPLOAD_THRESHOLD,
            iteration_delay: Duration::ZERO,
            app_tag: Self::APP_TAG.to_string(),
            output_prefix: Self::OUTPUT_PREFIX.to_string(),
            ..RunPolicy::default()
        }
    }

    /// Fake PNG payload of an exact size
    pub fn png_bytes(size: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; size];
        for (slot, byte) in bytes.iter_mut().zip([0x89, b'P', b'N', b'G']) {
            *slot = byte;
        }
        bytes
    }
}
