//! Object-store I/O contract for warehouse metadata files.
//!
//! The catalog layer emits Iceberg metadata JSON files into the warehouse
//! through this interface; the versioned storage engine never touches it.
//! All failures surface as [`IoFailure`].

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// An object-store I/O failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("object io failure on '{uri}': {message}")]
pub struct IoFailure {
    /// The URI the operation targeted.
    pub uri: String,
    /// Description of the failure.
    pub message: String,
}

impl IoFailure {
    /// Creates a failure for the given URI.
    #[must_use]
    pub fn new(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            message: message.into(),
        }
    }
}

/// Warehouse object-store access.
#[async_trait]
pub trait ObjectIo: Send + Sync + 'static {
    /// Writes a whole object at `uri`.
    async fn write_object(&self, uri: &str, bytes: Bytes) -> Result<(), IoFailure>;

    /// Reads a whole object from `uri`.
    async fn read_object(&self, uri: &str) -> Result<Bytes, IoFailure>;

    /// Returns true when `uri` is well-formed for this store.
    fn is_valid_uri(&self, uri: &str) -> bool;
}

/// In-memory object store for tests.
///
/// Tracks read and write counts so tests can assert on materialization
/// behavior (for example, that a deduplicated snapshot load reads its
/// metadata file exactly once).
#[derive(Debug, Default)]
pub struct MemoryObjectIo {
    objects: RwLock<HashMap<String, Bytes>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryObjectIo {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `read_object` calls so far.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful `write_object` calls so far.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the stored URIs, sorted.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned.
    #[must_use]
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.objects.read().expect("lock poisoned").keys().cloned().collect();
        uris.sort();
        uris
    }
}

#[async_trait]
impl ObjectIo for MemoryObjectIo {
    async fn write_object(&self, uri: &str, bytes: Bytes) -> Result<(), IoFailure> {
        if !self.is_valid_uri(uri) {
            return Err(IoFailure::new(uri, "invalid uri"));
        }
        self.objects
            .write()
            .map_err(|_| IoFailure::new(uri, "lock poisoned"))?
            .insert(uri.to_string(), bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_object(&self, uri: &str) -> Result<Bytes, IoFailure> {
        let bytes = self
            .objects
            .read()
            .map_err(|_| IoFailure::new(uri, "lock poisoned"))?
            .get(uri)
            .cloned()
            .ok_or_else(|| IoFailure::new(uri, "object not found"))?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(bytes)
    }

    fn is_valid_uri(&self, uri: &str) -> bool {
        match uri.split_once("://") {
            Some((scheme, rest)) => {
                !scheme.is_empty()
                    && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
                    && !rest.is_empty()
            }
            None => false,
        }
    }
}
