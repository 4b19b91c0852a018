//! 重试策略

pub mod retry;

pub use retry::{ExponentialBackoff, FixedDelay, RetryPolicy};
