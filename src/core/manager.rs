//! Multi-key admission with background bucket eviction
//!
//! The [`Manager`] binds a fixed [`BucketConfig`] to a [`Store`] and
//! runs one cleanup worker that periodically evicts buckets idle for
//! longer than the bucket TTL.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use super::bucket::{BucketConfig, Decision};
use super::store::{MemoryStore, Store};
use super::Error;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_BUCKET_TTL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-key rate limiting front end
///
/// Every key admitted through the same manager shares one bucket
/// configuration. Buckets materialize on first use inside the store and
/// are garbage collected by the cleanup worker once idle for longer
/// than `bucket_ttl`.
///
/// # Example
///
/// ```
/// use floodgate::Manager;
/// use std::time::Duration;
///
/// let manager = Manager::new(
///     10,                          // capacity
///     5,                           // tokens per interval
///     Duration::from_secs(1),      // interval
///     Duration::from_secs(600),    // bucket TTL
///     Duration::from_secs(60),     // cleanup interval
/// )?;
///
/// assert!(manager.allow("user:42"));
/// manager.stop();
/// # Ok::<(), floodgate::Error>(())
/// ```
pub struct Manager<S: Store> {
    store: Arc<S>,
    config: BucketConfig,
    bucket_ttl: Duration,
    worker: Mutex<Option<CleanupWorker>>,
}

impl Manager<MemoryStore> {
    /// Create a manager over a fresh [`MemoryStore`]
    ///
    /// # Errors
    ///
    /// Returns a configuration error when any parameter is invalid; the
    /// cleanup worker is only spawned for a valid configuration.
    pub fn new(
        capacity: i64,
        refill_rate: i64,
        interval: Duration,
        bucket_ttl: Duration,
        cleanup_interval: Duration,
    ) -> Result<Self, Error> {
        Self::with_store(
            MemoryStore::new(),
            capacity,
            refill_rate,
            interval,
            bucket_ttl,
            cleanup_interval,
        )
    }

    /// Create a builder with defaults for the time parameters
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }
}

impl<S: Store + 'static> Manager<S> {
    /// Create a manager over an explicit store
    pub fn with_store(
        store: S,
        capacity: i64,
        refill_rate: i64,
        interval: Duration,
        bucket_ttl: Duration,
        cleanup_interval: Duration,
    ) -> Result<Self, Error> {
        let config = BucketConfig::with_interval(capacity, refill_rate, interval);
        config.validate()?;
        if bucket_ttl.is_zero() {
            return Err(Error::InvalidBucketTtl);
        }
        if cleanup_interval.is_zero() {
            return Err(Error::InvalidCleanupInterval);
        }

        let store = Arc::new(store);
        let worker = CleanupWorker::spawn(Arc::clone(&store), bucket_ttl, cleanup_interval)?;

        Ok(Manager {
            store,
            config,
            bucket_ttl,
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl<S: Store> Manager<S> {
    /// Admit or reject one request for `key`
    ///
    /// Admission errors coerce to `false`, so a misconfigured or
    /// unreachable backend never silently admits.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_decision(key)
            .map(|decision| decision.allowed)
            .unwrap_or(false)
    }

    /// Admit or reject one request, returning the full [`Decision`]
    pub fn allow_decision(&self, key: &str) -> Result<Decision, Error> {
        self.store.allow(key, &self.config)
    }

    /// Run one eviction pass immediately
    pub fn cleanup(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.bucket_ttl) else {
            return;
        };
        if let Err(err) = self.store.delete_inactive(cutoff) {
            warn!(%err, "bucket cleanup failed");
        }
    }

    /// Shut down the cleanup worker and close the store
    ///
    /// Safe to call any number of times; concurrent calls collapse into
    /// a single shutdown and the worker is joined exactly once.
    pub fn stop(&self) {
        let mut slot = self.worker.lock();
        if let Some(worker) = slot.take() {
            worker.stop();
            if let Err(err) = self.store.close() {
                warn!(%err, "store close failed");
            }
        }
    }

    /// Alias for [`stop`](Self::stop)
    pub fn close(&self) {
        self.stop();
    }
}

impl<S: Store> Drop for Manager<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to the background eviction thread
struct CleanupWorker {
    stop_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl CleanupWorker {
    fn spawn<S: Store + 'static>(
        store: Arc<S>,
        bucket_ttl: Duration,
        cleanup_interval: Duration,
    ) -> Result<Self, Error> {
        let (stop_tx, stop_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("floodgate-cleanup".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(cleanup_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        // checked_sub only fails very early in process life.
                        let Some(cutoff) = Instant::now().checked_sub(bucket_ttl) else {
                            continue;
                        };
                        if let Err(err) = store.delete_inactive(cutoff) {
                            warn!(%err, "bucket cleanup failed");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;

        Ok(CleanupWorker { stop_tx, handle })
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

/// Builder for a [`Manager`]
///
/// Capacity and refill rate must be supplied; the time parameters
/// default to a one second interval, a ten minute bucket TTL, and a one
/// minute cleanup interval.
///
/// # Example
///
/// ```
/// use floodgate::Manager;
/// use std::time::Duration;
///
/// let manager = Manager::builder()
///     .capacity(100)
///     .refill_rate(10)
///     .bucket_ttl(Duration::from_secs(300))
///     .build()?;
///
/// assert!(manager.allow("tenant:7"));
/// # Ok::<(), floodgate::Error>(())
/// ```
pub struct ManagerBuilder {
    capacity: i64,
    refill_rate: i64,
    interval: Duration,
    bucket_ttl: Duration,
    cleanup_interval: Duration,
}

impl ManagerBuilder {
    fn new() -> Self {
        ManagerBuilder {
            capacity: 0,
            refill_rate: 0,
            interval: DEFAULT_INTERVAL,
            bucket_ttl: DEFAULT_BUCKET_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// Maximum tokens a bucket can hold
    pub fn capacity(mut self, capacity: i64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Tokens generated per interval
    pub fn refill_rate(mut self, refill_rate: i64) -> Self {
        self.refill_rate = refill_rate;
        self
    }

    /// Duration over which the refill rate applies
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Idle time after which a bucket is evicted
    pub fn bucket_ttl(mut self, bucket_ttl: Duration) -> Self {
        self.bucket_ttl = bucket_ttl;
        self
    }

    /// Tick of the background eviction loop
    pub fn cleanup_interval(mut self, cleanup_interval: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self
    }

    /// Build a manager over a fresh [`MemoryStore`]
    pub fn build(self) -> Result<Manager<MemoryStore>, Error> {
        self.build_with_store(MemoryStore::new())
    }

    /// Build a manager over an explicit store
    pub fn build_with_store<S: Store + 'static>(self, store: S) -> Result<Manager<S>, Error> {
        Manager::with_store(
            store,
            self.capacity,
            self.refill_rate,
            self.interval,
            self.bucket_ttl,
            self.cleanup_interval,
        )
    }
}
