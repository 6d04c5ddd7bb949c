//! Storage backends for bucket state
//!
//! A [`Store`] maps an opaque key to an admission decision and hides
//! where the bucket lives: [`MemoryStore`] keeps buckets in-process,
//! [`RemoteStore`] delegates to a shared Redis instance.

use std::time::Instant;

use super::bucket::{BucketConfig, Decision};
use super::Error;

mod memory;
mod remote;


pub use memory::MemoryStore;
pub use remote::{EvalClient, RemoteStore, RemoteStoreOptions};

/// Admission backend shared by any number of callers
///
/// Implementations own all per-key state and create it lazily on the
/// first admission for a key. Every method must be safe to call from
/// many threads simultaneously.
///
/// # Example implementation
///
/// ```ignore
/// use std::time::Instant;
/// use floodgate::{BucketConfig, Decision, Error, Store};
///
/// struct MyStore {
///     // your storage
/// }
///
/// impl Store for MyStore {
///     fn allow(&self, key: &str, cfg: &BucketConfig) -> Result<Decision, Error> {
///         // look up or create the bucket for `key`, then admit
///         todo!()
///     }
///
///     fn delete_inactive(&self, cutoff: Instant) -> Result<(), Error> {
///         // drop per-key state idle since before `cutoff`
///         Ok(())
///     }
///
///     fn close(&self) -> Result<(), Error> {
///         Ok(())
///     }
/// }
/// ```
pub trait Store: Send + Sync {
    /// Admit or reject one request for `key` under `cfg`
    ///
    /// Lazily creates the per-key state on first use.
    fn allow(&self, key: &str, cfg: &BucketConfig) -> Result<Decision, Error>;

    /// Best-effort removal of per-key state idle since before `cutoff`
    ///
    /// Backends with their own expiry, such as a TTL, may implement this
    /// as a no-op.
    fn delete_inactive(&self, cutoff: Instant) -> Result<(), Error>;

    /// Release owned resources; must be idempotent
    fn close(&self) -> Result<(), Error>;
}
