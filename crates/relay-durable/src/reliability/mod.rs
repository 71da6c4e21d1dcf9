//! Reliability policies for activity execution
//!
//! Provides [`RetryPolicy`]: bounded attempts with multiplicative backoff,
//! an interval cap, jitter, and non-retryable error classes.

mod retry;

pub use retry::RetryPolicy;
