use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::Store;
use crate::core::bucket::{BucketConfig, Decision};
use crate::core::Error;

// Evaluated under Redis single-threaded semantics, so concurrent callers
// from any number of processes observe a consistent decision sequence.
const TOKEN_BUCKET_SCRIPT: &str = include_str!("token_bucket.lua");

const DEFAULT_KEY_PREFIX: &str = "ratelimiter:";
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(10 * 60);

/// Atomic server-side script evaluation
///
/// The only capability [`RemoteStore`] needs from its backend: run a
/// script with a list of keys and positional integer arguments and hand
/// back the dynamically typed result.
///
/// Implemented for [`redis::Client`]; a blanket impl covers `Arc<C>` so
/// one client can back several stores.
pub trait EvalClient: Send + Sync {
    /// Evaluate `script` atomically with the given keys and arguments
    fn eval(&self, script: &str, keys: &[&str], args: &[i64]) -> Result<redis::Value, Error>;
}

impl<C: EvalClient> EvalClient for Arc<C> {
    fn eval(&self, script: &str, keys: &[&str], args: &[i64]) -> Result<redis::Value, Error> {
        (**self).eval(script, keys, args)
    }
}

impl EvalClient for redis::Client {
    fn eval(&self, script: &str, keys: &[&str], args: &[i64]) -> Result<redis::Value, Error> {
        let mut conn = self.get_connection()?;
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(*arg);
        }
        Ok(cmd.query(&mut conn)?)
    }
}

/// Configuration for a [`RemoteStore`]
///
/// Zero or empty values fall back to the defaults: prefix
/// `"ratelimiter:"` and a ten minute key TTL.
#[derive(Debug, Clone)]
pub struct RemoteStoreOptions {
    /// Namespace prepended to every bucket key
    pub key_prefix: String,
    /// Expiry refreshed on each admission call
    pub key_ttl: Duration,
}

impl Default for RemoteStoreOptions {
    fn default() -> Self {
        RemoteStoreOptions {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            key_ttl: DEFAULT_KEY_TTL,
        }
    }
}

/// Store backed by a shared Redis instance
///
/// The whole read-modify-write of a bucket runs inside one server-side
/// script, so instances in different processes sharing the same backend
/// agree on every decision. Idle keys are reclaimed by the TTL instead
/// of the cleanup loop.
///
/// # Example
///
/// ```no_run
/// use floodgate::{Manager, RemoteStore};
/// use std::time::Duration;
///
/// let client = redis::Client::open("redis://127.0.0.1/")?;
/// let store = RemoteStore::new(client);
/// let manager = Manager::with_store(
///     store,
///     100,
///     10,
///     Duration::from_secs(1),
///     Duration::from_secs(600),
///     Duration::from_secs(60),
/// )?;
///
/// if manager.allow("user:42") {
///     // handle the request
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct RemoteStore<C: EvalClient> {
    client: C,
    prefix: String,
    ttl: Duration,
}

impl<C: EvalClient> RemoteStore<C> {
    /// Create a store with default options
    pub fn new(client: C) -> Self {
        Self::with_options(client, RemoteStoreOptions::default())
    }

    /// Create a store with an explicit key prefix and TTL
    pub fn with_options(client: C, options: RemoteStoreOptions) -> Self {
        let prefix = if options.key_prefix.is_empty() {
            DEFAULT_KEY_PREFIX.to_string()
        } else {
            options.key_prefix
        };
        let ttl = if options.key_ttl.is_zero() {
            DEFAULT_KEY_TTL
        } else {
            options.key_ttl
        };

        RemoteStore {
            client,
            prefix,
            ttl,
        }
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl<C: EvalClient> Store for RemoteStore<C> {
    fn allow(&self, key: &str, cfg: &BucketConfig) -> Result<Decision, Error> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        cfg.validate()?;

        let interval_ms = i64::try_from(cfg.interval.as_millis()).unwrap_or(i64::MAX);
        if interval_ms == 0 {
            // Sub-millisecond intervals cannot be expressed to the script.
            return Err(Error::InvalidInterval);
        }
        let mut ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        if ttl_ms == 0 {
            ttl_ms = interval_ms;
        }
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);

        let prefixed = self.prefixed_key(key);
        let result = self.client.eval(
            TOKEN_BUCKET_SCRIPT,
            &[&prefixed],
            &[cfg.capacity, cfg.refill_rate, interval_ms, now_ms, ttl_ms],
        )?;

        decode_decision(result, cfg)
    }

    fn delete_inactive(&self, _cutoff: Instant) -> Result<(), Error> {
        // Keys expire via the TTL refreshed on every admission.
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

fn decode_decision(value: redis::Value, cfg: &BucketConfig) -> Result<Decision, Error> {
    let redis::Value::Array(values) = value else {
        return Err(Error::Protocol(format!(
            "expected a two element array, got {value:?}"
        )));
    };
    if values.len() != 2 {
        return Err(Error::Protocol(format!(
            "expected a two element array, got {} elements",
            values.len()
        )));
    }

    let allowed = decode_int(&values[0])? == 1;
    let remaining = decode_int(&values[1])?;

    Ok(Decision {
        allowed,
        remaining,
        limit: cfg.capacity,
        // Approximation for blocked responses: the script would have to
        // return a reset timestamp for an exact value.
        retry_after: if allowed {
            Duration::ZERO
        } else {
            cfg.single_token_wait()
        },
    })
}

fn decode_int(value: &redis::Value) -> Result<i64, Error> {
    match value {
        redis::Value::Int(n) => Ok(*n),
        redis::Value::BulkString(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Protocol(format!("non-numeric bulk string: {bytes:?}"))),
        redis::Value::SimpleString(s) => s
            .parse()
            .map_err(|_| Error::Protocol(format!("non-numeric string: {s}"))),
        other => Err(Error::Protocol(format!(
            "unexpected value type: {other:?}"
        ))),
    }
}
