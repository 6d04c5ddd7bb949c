//! # Floodgate
//!
//! Per-key token bucket rate limiting for request processing paths.
//!
//! Callers identify each event by an opaque string key (user id, API
//! token, IP, tenant); the library decides, at most once per call,
//! whether the event is admitted and reports residual capacity and a
//! suggested wait.
//!
//! Bucket state lives behind a pluggable [`Store`]: [`MemoryStore`]
//! keeps buckets in-process, [`RemoteStore`] shares them across
//! processes through a Redis-evaluated script. Both yield the same
//! admission decisions under contention.
//!
//! ## Quick start
//!
//! ```
//! use floodgate::Manager;
//! use std::time::Duration;
//!
//! let manager = Manager::new(
//!     10,                          // burst capacity
//!     5,                           // tokens per interval
//!     Duration::from_secs(1),      // interval
//!     Duration::from_secs(600),    // evict buckets idle this long
//!     Duration::from_secs(60),     // eviction loop tick
//! )?;
//!
//! if manager.allow("user:42") {
//!     // handle the request
//! }
//! # Ok::<(), floodgate::Error>(())
//! ```
//!
//! ## Sharing limits across processes
//!
//! ```no_run
//! use floodgate::{Manager, RemoteStore, RemoteStoreOptions};
//! use std::time::Duration;
//!
//! let client = redis::Client::open("redis://127.0.0.1/")?;
//! let store = RemoteStore::with_options(
//!     client,
//!     RemoteStoreOptions {
//!         key_prefix: "api:".into(),
//!         key_ttl: Duration::from_secs(600),
//!     },
//! );
//! let manager = Manager::with_store(
//!     store,
//!     100,
//!     10,
//!     Duration::from_secs(1),
//!     Duration::from_secs(600),
//!     Duration::from_secs(60),
//! )?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## HTTP
//!
//! The [`http`] module provides an axum middleware that maps decisions
//! to `429` responses and the usual `X-RateLimit-*` headers.

pub mod core;
pub mod http;

pub use crate::core::{
    BucketConfig, Decision, Error, EvalClient, Manager, ManagerBuilder, MemoryStore, RemoteStore,
    RemoteStoreOptions, Store, TokenBucket,
};
