//! Deduplicated background materialization of derived snapshots.
//!
//! Parsing a metadata file is expensive, so concurrent requests for the
//! same derived-snapshot ID share one computation: the first caller
//! inserts a `Running` entry and spawns the work, every other caller
//! subscribes to the same result channel. Exactly one compute runs per
//! task key at a time.
//!
//! Completed entries stay cached: successes for a TTL, failures for a
//! shorter backoff window after which the next caller retries. The worker
//! pool is bounded; overflow rejects with a retryable `Unavailable`.
//! Observers detaching (or timing out) never cancels the underlying
//! computation, so the next caller still benefits from it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};

use tarn_core::{Clock, Error, ObjId, Result};

/// Tuning knobs for the task cache.
#[derive(Debug, Clone)]
pub struct TaskCacheConfig {
    /// How long successful results stay served from the cache.
    pub success_ttl: Duration,
    /// How long a failure blocks re-computation.
    pub failure_retry_after: Duration,
    /// Maximum concurrently running computations.
    pub max_concurrent: usize,
}

impl Default for TaskCacheConfig {
    fn default() -> Self {
        Self {
            success_ttl: Duration::from_secs(3600),
            failure_retry_after: Duration::from_secs(10),
            max_concurrent: 32,
        }
    }
}

type Outcome<T> = Result<T>;

enum TaskSlot<T> {
    Running(watch::Receiver<Option<Outcome<T>>>),
    Done {
        outcome: Outcome<T>,
        at: Duration,
    },
}

/// A deduplicating cache of keyed async computations.
pub struct TaskCache<T> {
    entries: Arc<Mutex<HashMap<ObjId, TaskSlot<T>>>>,
    permits: Arc<Semaphore>,
    clock: Arc<dyn Clock>,
    config: TaskCacheConfig,
}

impl<T: Clone + Send + Sync + 'static> TaskCache<T> {
    /// Creates a cache with the given clock and configuration.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, config: TaskCacheConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            clock,
            config,
        }
    }

    /// Returns the cached value for `key`, or runs `compute` to produce
    /// it. Concurrent callers for the same key share one computation and
    /// observe the same outcome.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the worker pool is full; otherwise whatever the
    /// computation produced (failures are cached for the backoff window).
    pub async fn get<F>(&self, key: ObjId, compute: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let mut rx = {
            let mut entries = self.lock_entries()?;
            let now = self.clock.monotonic();
            match entries.get(&key) {
                Some(TaskSlot::Done { outcome, at }) => {
                    let age = now.saturating_sub(*at);
                    let fresh = match outcome {
                        Ok(_) => age < self.config.success_ttl,
                        Err(_) => age < self.config.failure_retry_after,
                    };
                    if fresh {
                        return outcome.clone();
                    }
                    entries.remove(&key);
                    self.spawn_compute(&mut entries, key, compute)?
                }
                Some(TaskSlot::Running(rx)) => rx.clone(),
                None => self.spawn_compute(&mut entries, key, compute)?,
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::internal("materialization task vanished"))?
            .clone();
        outcome.expect("wait_for guarantees a value")
    }

    /// Like [`TaskCache::get`], bounded by a deadline.
    ///
    /// The deadline only detaches the caller; the underlying computation
    /// keeps running and its result lands in the cache.
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded` when the deadline elapses first.
    pub async fn get_with_deadline<F>(
        &self,
        key: ObjId,
        deadline: Duration,
        compute: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match tokio::time::timeout(deadline, self.get(key, compute)).await {
            Ok(result) => result,
            Err(_) => Err(Error::deadline_exceeded(format!(
                "materialization of task {key} did not finish within {deadline:?}"
            ))),
        }
    }

    /// Seeds the cache with an already-computed value.
    ///
    /// Used after a catalog commit, which holds the snapshot it just
    /// built; the next reader is served without recomputation.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the cache lock is poisoned.
    pub fn prime(&self, key: ObjId, value: T) -> Result<()> {
        let mut entries = self.lock_entries()?;
        entries.insert(
            key,
            TaskSlot::Done {
                outcome: Ok(value),
                at: self.clock.monotonic(),
            },
        );
        Ok(())
    }

    fn spawn_compute<F>(
        &self,
        entries: &mut HashMap<ObjId, TaskSlot<T>>,
        key: ObjId,
        compute: F,
    ) -> Result<watch::Receiver<Option<Outcome<T>>>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| Error::unavailable("snapshot materialization pool is full"))?;

        let (tx, rx) = watch::channel(None);
        entries.insert(key, TaskSlot::Running(rx.clone()));

        let shared_entries = Arc::clone(&self.entries);
        let clock = Arc::clone(&self.clock);
        tokio::spawn(async move {
            let outcome = compute.await;
            if let Err(err) = &outcome {
                tracing::warn!(task = %key, "materialization failed: {err}");
            }
            if let Ok(mut entries) = shared_entries.lock() {
                entries.insert(
                    key,
                    TaskSlot::Done {
                        outcome: outcome.clone(),
                        at: clock.monotonic(),
                    },
                );
            }
            let _ = tx.send(Some(outcome));
            drop(permit);
        });
        Ok(rx)
    }

    fn lock_entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ObjId, TaskSlot<T>>>> {
        self.entries
            .lock()
            .map_err(|_| Error::internal("task cache lock poisoned"))
    }
}
