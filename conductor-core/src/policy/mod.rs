//! Pure policies: retry backoff, cleanup thresholds and resource pressure

pub mod cleanup;
pub mod retry;

pub use cleanup::{CleanupPolicy, ResourcePressure, classify};
pub use retry::{RetryPolicy, is_user_cancellation};
