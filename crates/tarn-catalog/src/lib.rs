//! # tarn-catalog
//!
//! The catalog pipeline on top of the versioned storage engine.
//!
//! A catalog commit flows through five stages:
//!
//! 1. Load the prior content of every touched key at one resolved commit
//! 2. Run each operation through the Iceberg update state machine
//! 3. Emit the new metadata JSON into the warehouse via `ObjectIo`
//! 4. Commit one `Put` per changed key through the version store
//! 5. Persist each derived snapshot through the task cache, best-effort
//!
//! Reads go the other way: resolve the reference once, derive the snapshot
//! ID from the content fields alone, and materialize the parsed snapshot
//! through the deduplicating task cache.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod service;
pub mod snapshot;
pub mod tasks;

pub use config::CatalogConfig;
pub use service::{
    CatalogCommitRequest, CatalogOperation, CatalogService, SnapshotFormat, SnapshotResponse,
};
pub use snapshot::{snapshot_id_from_content, EntitySnapshot, TableSnapshot, ViewSnapshot};
pub use tasks::{TaskCache, TaskCacheConfig};
