//! Storage-adapter contract for versioned-catalog backends.
//!
//! The engine talks to its backend through a narrow key/value contract of
//! **typed buckets**. Objects are addressed by `(bucket, ObjId)`; the
//! adapter chooses the physical encoding. Mutable slots (references, the
//! repository descriptor, the reference-name registry) additionally support
//! compare-and-swap, which is the only serializer in the system: the engine
//! never takes an in-process lock around a reference update.
//!
//! ## Failure contract
//!
//! All operations fail with one of the [`StoreError`] variants.
//! `Unavailable` is retryable; [`with_retry`] applies capped exponential
//! backoff with jitter. Everything else surfaces unchanged.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::clock::Clock;
use crate::id::ObjId;

/// The typed buckets an adapter must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    /// Immutable commit objects.
    Commits,
    /// Immutable key-index segments.
    KeyIndexSegments,
    /// Mutable reference slots (CAS).
    Refs,
    /// Mutable reference-name registry segments (CAS).
    RefNames,
    /// The repository descriptor singleton (CAS).
    RepoDesc,
    /// Content blobs and persisted derived snapshots.
    ContentAttachments,
}

impl Bucket {
    /// Returns the stable bucket name used in physical encodings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commits => "commits",
            Self::KeyIndexSegments => "key-index-segments",
            Self::Refs => "refs",
            Self::RefNames => "ref-names",
            Self::RepoDesc => "repo-desc",
            Self::ContentAttachments => "content-attachments",
        }
    }

    /// Returns true when the bucket holds mutable slots updated via CAS.
    #[must_use]
    pub const fn supports_cas(self) -> bool {
        matches!(self, Self::Refs | Self::RefNames | Self::RepoDesc)
    }
}

/// Errors produced by storage adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed object does not exist.
    #[error("store object not found: {bucket}/{id}")]
    NotFound {
        /// Bucket name.
        bucket: &'static str,
        /// Object ID rendered as hex.
        id: String,
    },

    /// A put found the ID occupied by different bytes.
    #[error("store object already exists with different bytes: {bucket}/{id}")]
    AlreadyExists {
        /// Bucket name.
        bucket: &'static str,
        /// Object ID rendered as hex.
        id: String,
    },

    /// A compare-and-swap was attempted on a bucket that does not support it.
    #[error("bucket {bucket} does not support compare-and-swap")]
    CasUnsupported {
        /// Bucket name.
        bucket: &'static str,
    },

    /// A transient backend failure; the caller may retry.
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Description of the transient failure.
        message: String,
    },

    /// A non-retryable backend failure.
    #[error("backend failure: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Returns true when retrying the operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// The result type for adapter operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a compare-and-swap.
///
/// A mismatch is a normal result, not an error; the caller decides whether
/// to retry, reload, or surface a conflict.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The swap was applied.
    Swapped,
    /// The expected bytes did not match; `actual` is the current value
    /// (`None` when the slot is empty).
    Mismatch {
        /// Current bytes in the slot at the time of the attempt.
        actual: Option<Bytes>,
    },
}

impl CasOutcome {
    /// Returns true when the swap was applied.
    #[must_use]
    pub const fn swapped(&self) -> bool {
        matches!(self, Self::Swapped)
    }
}

/// One page of a commit-bucket scan.
#[derive(Debug, Clone)]
pub struct ScanPage {
    /// Matching object IDs in lexicographic order.
    pub ids: Vec<ObjId>,
    /// Cursor to resume from, absent when the scan is exhausted.
    pub next: Option<ObjId>,
}

/// The abstract storage contract all backends implement.
///
/// Implementations must be thread-safe; every call is a suspension point
/// and may block on I/O.
#[async_trait]
pub trait StorageAdapter: Send + Sync + 'static {
    /// Reads an object.
    ///
    /// Returns `StoreError::NotFound` when absent.
    async fn get(&self, bucket: Bucket, id: &ObjId) -> StoreResult<Bytes>;

    /// Reads many objects, preserving order; misses are `None`.
    async fn get_many(&self, bucket: Bucket, ids: &[ObjId]) -> StoreResult<Vec<Option<Bytes>>>;

    /// Writes an object.
    ///
    /// Writing the same bytes to an occupied ID is a success (objects are
    /// content-addressed, so re-writing is idempotent). Different bytes
    /// fail with `AlreadyExists`.
    async fn put(&self, bucket: Bucket, id: &ObjId, bytes: Bytes) -> StoreResult<()>;

    /// Deletes an object. Succeeds when the object is already absent.
    async fn delete(&self, bucket: Bucket, id: &ObjId) -> StoreResult<()>;

    /// Atomically replaces the slot's bytes.
    ///
    /// `expected = None` means the slot must be empty (create); `new =
    /// None` deletes the slot. Supported only on buckets where
    /// [`Bucket::supports_cas`] is true.
    async fn compare_and_swap(
        &self,
        bucket: Bucket,
        id: &ObjId,
        expected: Option<Bytes>,
        new: Option<Bytes>,
    ) -> StoreResult<CasOutcome>;

    /// Scans object IDs by prefix, in lexicographic order.
    ///
    /// Required only on the `commits` bucket. `cursor` is exclusive.
    async fn scan(
        &self,
        bucket: Bucket,
        prefix: &[u8],
        limit: usize,
        cursor: Option<ObjId>,
    ) -> StoreResult<ScanPage>;
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the per-retry delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Runs `op`, retrying `Unavailable` failures with capped exponential
/// backoff plus jitter.
///
/// Jitter is derived from the injected [`Clock`]'s monotonic reading, so
/// retry timing stays observable and controllable in tests like every
/// other time-dependent path in the engine.
///
/// # Errors
///
/// Returns the last error once the attempt budget is exhausted, and any
/// non-retryable error immediately.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    clock: &dyn Clock,
    op_name: &str,
    mut op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let mut backoff = config.base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                let capped = backoff.min(config.max_delay);
                let delay = capped + backoff_jitter(clock, capped, attempt);
                tracing::warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying transient backend failure: {err}"
                );
                tokio::time::sleep(delay).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Spreads retries apart by up to a quarter of the current delay.
///
/// The monotonic clock seeds the spread, folded with the attempt number
/// so two attempts landing in the same clock tick still diverge.
fn backoff_jitter(clock: &dyn Clock, delay: Duration, attempt: u32) -> Duration {
    let bound = (delay.as_millis() as u64 / 4).max(1);
    let seed = u64::from(clock.monotonic().subsec_nanos()).rotate_left(attempt);
    Duration::from_millis(seed % bound)
}

/// In-memory storage adapter for tests and examples.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    buckets: RwLock<BTreeMap<(&'static str, ObjId), Bytes>>,
}

impl MemoryAdapter {
    /// Creates a new empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, BTreeMap<(&'static str, ObjId), Bytes>>> {
        self.buckets.read().map_err(|_| StoreError::Fatal {
            message: "lock poisoned".into(),
        })
    }

    fn write(
        &self,
    ) -> StoreResult<std::sync::RwLockWriteGuard<'_, BTreeMap<(&'static str, ObjId), Bytes>>> {
        self.buckets.write().map_err(|_| StoreError::Fatal {
            message: "lock poisoned".into(),
        })
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn get(&self, bucket: Bucket, id: &ObjId) -> StoreResult<Bytes> {
        self.read()?
            .get(&(bucket.as_str(), *id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.as_str(),
                id: id.to_string(),
            })
    }

    async fn get_many(&self, bucket: Bucket, ids: &[ObjId]) -> StoreResult<Vec<Option<Bytes>>> {
        let map = self.read()?;
        Ok(ids
            .iter()
            .map(|id| map.get(&(bucket.as_str(), *id)).cloned())
            .collect())
    }

    async fn put(&self, bucket: Bucket, id: &ObjId, bytes: Bytes) -> StoreResult<()> {
        let mut map = self.write()?;
        match map.get(&(bucket.as_str(), *id)) {
            Some(existing) if *existing == bytes => Ok(()),
            Some(_) => Err(StoreError::AlreadyExists {
                bucket: bucket.as_str(),
                id: id.to_string(),
            }),
            None => {
                map.insert((bucket.as_str(), *id), bytes);
                Ok(())
            }
        }
    }

    async fn delete(&self, bucket: Bucket, id: &ObjId) -> StoreResult<()> {
        self.write()?.remove(&(bucket.as_str(), *id));
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        bucket: Bucket,
        id: &ObjId,
        expected: Option<Bytes>,
        new: Option<Bytes>,
    ) -> StoreResult<CasOutcome> {
        if !bucket.supports_cas() {
            return Err(StoreError::CasUnsupported {
                bucket: bucket.as_str(),
            });
        }
        let mut map = self.write()?;
        let slot = (bucket.as_str(), *id);
        let current = map.get(&slot).cloned();
        if current != expected {
            return Ok(CasOutcome::Mismatch { actual: current });
        }
        match new {
            Some(bytes) => {
                map.insert(slot, bytes);
            }
            None => {
                map.remove(&slot);
            }
        }
        Ok(CasOutcome::Swapped)
    }

    async fn scan(
        &self,
        bucket: Bucket,
        prefix: &[u8],
        limit: usize,
        cursor: Option<ObjId>,
    ) -> StoreResult<ScanPage> {
        let map = self.read()?;
        let mut ids: Vec<ObjId> = map
            .keys()
            .filter(|(b, id)| {
                *b == bucket.as_str()
                    && id.as_bytes().starts_with(prefix)
                    && cursor.is_none_or(|c| *id > c)
            })
            .map(|(_, id)| *id)
            .collect();
        let next = if ids.len() > limit {
            ids.truncate(limit);
            ids.last().copied()
        } else {
            None
        };
        Ok(ScanPage { ids, next })
    }
}
