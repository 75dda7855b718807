//! Resilience patterns for failprobe
//!
//! This crate provides the retry policy that spaces out load attempts and
//! the executor that drives them.

pub mod retry;

// Re-export commonly used types
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
