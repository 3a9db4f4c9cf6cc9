//! # tarn-core
//!
//! Core abstractions for the Tarn versioned catalog.
//!
//! This crate provides the foundational types and contracts used across all
//! Tarn components:
//!
//! - **Object IDs**: Content-addressed 256-bit identifiers and the derived-ID hasher
//! - **Content Keys**: Hierarchical, validated entity keys
//! - **Canonical JSON**: Deterministic serialization for hashing
//! - **Storage Adapter**: Typed-bucket key/value contract with CAS semantics
//! - **Object IO**: Warehouse object-store contract for metadata files
//! - **Error Types**: Shared error codes and the boundary error shape
//!
//! ## Crate Boundary
//!
//! `tarn-core` is the only crate allowed to define shared primitives. The
//! versioned storage engine, the Iceberg codec, and the catalog pipeline all
//! build on the contracts defined here; none of them talk to a concrete
//! backend directly.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod canonical;
pub mod clock;
pub mod error;
pub mod id;
pub mod key;
pub mod object_io;
pub mod observability;
pub mod store;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tarn_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::error::{Conflict, ConflictKind, Error, ErrorCode, Result};
    pub use crate::id::{ObjId, ObjIdHasher};
    pub use crate::key::ContentKey;
    pub use crate::object_io::{MemoryObjectIo, ObjectIo};
    pub use crate::store::{
        Bucket, CasOutcome, MemoryAdapter, RetryConfig, ScanPage, StorageAdapter, StoreError,
        StoreResult,
    };
}

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Conflict, ConflictKind, Error, ErrorCode, Result};
pub use id::{ObjId, ObjIdHasher};
pub use key::ContentKey;
pub use object_io::{MemoryObjectIo, ObjectIo};
pub use observability::{init_logging, LogFormat};
pub use store::{
    Bucket, CasOutcome, MemoryAdapter, RetryConfig, ScanPage, StorageAdapter, StoreError,
    StoreResult,
};
