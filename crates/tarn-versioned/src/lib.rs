//! # tarn-versioned
//!
//! The versioned storage engine: an immutable, content-addressed commit DAG
//! with a paginated key index, CAS-serialized references, and a
//! conflict-checked commit service with merge and transplant.
//!
//! ## Architecture
//!
//! 1. **Object model** (`objects`): commits, content blobs, references, and
//!    the repository descriptor, hashed over canonical JSON bytes
//! 2. **Key index** (`index`): content-addressed segments shared
//!    structurally between commits
//! 3. **Commit log** (`log`): commit construction and DAG traversal
//! 4. **References** (`refs`): branch/tag CRUD where the storage adapter's
//!    CAS is the only serializer
//! 5. **Commit service** (`service`): requirements-checked commits, merge,
//!    transplant, diff, and reference-consistent reads
//!
//! Everything below the service boundary is deterministic: two engines
//! pointed at the same backend converge on identical object IDs.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod index;
pub mod log;
pub mod objects;
pub mod refs;
pub mod service;

pub use index::{DiffEntry, IndexConfig, IndexEntry};
pub use log::{CommitEngine, CommitMeta};
pub use objects::{
    CommitObj, Content, ContentType, IcebergTableContent, IcebergViewContent, NamespaceContent,
    OpKind, Operation, RefKind, RefObj, RepositoryDesc, UdfContent,
};
pub use refs::{RefCasOutcome, RefManager, RefPage};
pub use service::{
    CommitOp, CommitParams, CommitResult, ContentWithKey, ContentsResponse, EntriesPage,
    EntryInfo, LogPage, MergeParams, MergeResult, MergeStrategy, RefSpec, Requirement,
    ResolvedKind, ResolvedRef, TransplantParams, VersionStore, VersionStoreConfig,
};
