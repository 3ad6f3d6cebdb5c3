//! Service-specific tests
//!
//! Each service has its own test file with dedicated fixtures and helpers.
//! HTTP backends are faked with wiremock; the ComfyUI event stream with a
//! throwaway tokio-tungstenite server.

mod ledger;

// Common test utilities for services
pub mod common {
    use std::time::Duration;
    use tokio::time::timeout;

    /// Standard timeout for async operations in tests
    pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Helper to run async operations with timeout
    pub async fn with_timeout<T, F>(future: F) -> Result<T, tokio::time::error::Elapsed>
    where
        F: std::future::Future<Output = T>,
    {
        timeout(TEST_TIMEOUT, future).await
    }
}
