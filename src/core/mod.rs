//! Core components of the floodgate rate limiting library
//!
//! This module contains the fundamental building blocks:
//! - [`bucket`]: the per-key token bucket and its admission arithmetic
//! - [`manager`]: the multi-key front end with background eviction
//! - [`store`]: storage backends for bucket state

pub mod bucket;
pub mod manager;
pub mod store;


pub use bucket::{BucketConfig, Decision, TokenBucket};
pub use manager::{Manager, ManagerBuilder};
pub use store::{EvalClient, MemoryStore, RemoteStore, RemoteStoreOptions, Store};

/// Errors surfaced by constructors and admission calls
///
/// Configuration variants come from constructors and parameter
/// validation; `Transport` and `Protocol` come from the remote backend
/// during admission.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capacity was zero or negative
    #[error("capacity must be greater than 0")]
    InvalidCapacity,
    /// Refill rate was zero or negative
    #[error("refill rate must be greater than 0")]
    InvalidRefillRate,
    /// Interval was zero
    #[error("interval must be greater than 0")]
    InvalidInterval,
    /// More tokens per interval than the bucket can hold
    #[error("refill rate cannot exceed capacity")]
    RefillRateExceedsCapacity,
    /// Bucket TTL was zero
    #[error("bucket TTL must be greater than 0")]
    InvalidBucketTtl,
    /// Cleanup interval was zero
    #[error("cleanup interval must be greater than 0")]
    InvalidCleanupInterval,
    /// Admission was requested for an empty key
    #[error("key cannot be empty")]
    EmptyKey,
    /// The cleanup worker thread could not be started
    #[error("failed to start cleanup worker: {0}")]
    Worker(#[from] std::io::Error),
    /// The remote client failed while evaluating the script
    #[error("remote evaluation failed: {0}")]
    Transport(#[from] redis::RedisError),
    /// The remote script returned a malformed result
    #[error("unexpected remote result: {0}")]
    Protocol(String),
}
