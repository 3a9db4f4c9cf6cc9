//! The typed object model of the version store.
//!
//! Commits, content blobs, references, and the repository descriptor are
//! plain serde structures hashed over canonical JSON bytes. A commit is
//! immutable once written and its ID equals the hash of its canonical
//! serialization; references are the only mutable slots.
//!
//! Commits refer to parents by ID only. There are deliberately no
//! in-process parent/child back-references; traversal always walks from a
//! head backward by ID lookup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use tarn_core::canonical::to_canonical_bytes;
use tarn_core::{ContentKey, Error, ObjId, Result};

/// Domain tag for commit object hashing.
pub const TAG_COMMIT: &str = "commit";

/// Domain tag for content blob hashing.
pub const TAG_CONTENT: &str = "content";

/// Domain tag for key-index node hashing.
pub const TAG_INDEX_SEGMENT: &str = "index-segment";

/// Hashes a serializable object under a domain tag, returning the ID and
/// the canonical bytes that produced it.
///
/// # Errors
///
/// Returns `Internal` when the value cannot be canonically serialized.
pub fn hash_object<T: Serialize>(tag: &str, value: &T) -> Result<(ObjId, bytes::Bytes)> {
    let bytes = to_canonical_bytes(value)
        .map_err(|e| Error::internal(format!("canonical serialization failed: {e}")))?;
    let id = ObjId::hash(tag, &bytes);
    Ok((id, bytes::Bytes::from(bytes)))
}

/// Deserializes an object previously written via [`hash_object`].
///
/// # Errors
///
/// Returns `Internal` when the bytes do not parse.
pub fn decode_object<T: for<'de> Deserialize<'de>>(what: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::internal(format!("corrupt {what} object: {e}")))
}

/// The kind of a keyed operation inside a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    /// Sets the key to a new content blob.
    Put,
    /// Removes the key.
    Delete,
    /// Leaves the key unchanged; used to record a checked requirement.
    Unchanged,
}

/// A single keyed operation recorded in a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// The key the operation applies to.
    pub key: ContentKey,
    /// What the operation does.
    pub kind: OpKind,
    /// ID of the content blob for `Put` operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ObjId>,
    /// Stable content ID for `Put` operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// The content type for `Put` operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
}

/// An immutable commit in the version DAG.
///
/// `parents[0]` is the logical predecessor; additional parents encode
/// merges. The key index reachable from `key_index_root` reflects the
/// cumulative effect of operations from the root commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitObj {
    /// Parent commit IDs, logical predecessor first.
    pub parents: Vec<ObjId>,
    /// Who authored the change.
    pub author: String,
    /// Who committed the change.
    pub committer: String,
    /// Wall-clock commit time, epoch milliseconds.
    pub commit_time_ms: i64,
    /// Commit message.
    pub message: String,
    /// The keyed operations, in the order the caller listed them.
    pub operations: Vec<Operation>,
    /// Root of the key index after this commit, absent for an empty index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_index_root: Option<ObjId>,
    /// Free-form commit metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CommitObj {
    /// Computes this commit's content-addressed ID.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when canonical serialization fails.
    pub fn id(&self) -> Result<ObjId> {
        hash_object(TAG_COMMIT, self).map(|(id, _)| id)
    }

    /// Returns the logical predecessor, absent for a root commit.
    #[must_use]
    pub fn parent(&self) -> Option<&ObjId> {
        self.parents.first()
    }
}

/// The type of a content blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    /// An Iceberg table.
    IcebergTable,
    /// An Iceberg view.
    IcebergView,
    /// A namespace entry.
    Namespace,
    /// A user-defined function.
    Udf,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IcebergTable => "ICEBERG_TABLE",
            Self::IcebergView => "ICEBERG_VIEW",
            Self::Namespace => "NAMESPACE",
            Self::Udf => "UDF",
        };
        f.write_str(name)
    }
}

/// Iceberg table content: a pointer to the current metadata file plus the
/// IDs needed to interpret it without reading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcebergTableContent {
    /// Stable content ID, assigned at first Put.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// Location of the current Iceberg metadata JSON file.
    pub metadata_location: String,
    /// Current Iceberg snapshot ID, `-1` when the table has none.
    pub snapshot_id: i64,
    /// Current schema ID.
    pub schema_id: i32,
    /// Default partition spec ID.
    pub spec_id: i32,
    /// Default sort order ID.
    pub sort_order_id: i32,
}

/// Iceberg view content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcebergViewContent {
    /// Stable content ID, assigned at first Put.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// Location of the current Iceberg view metadata JSON file.
    pub metadata_location: String,
    /// Current view version ID.
    pub version_id: i64,
}

/// Namespace content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceContent {
    /// Stable content ID, assigned at first Put.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// The namespace path elements.
    pub elements: Vec<String>,
    /// Namespace properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// User-defined function content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdfContent {
    /// Stable content ID, assigned at first Put.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// The function signature.
    pub signature: String,
    /// The function body.
    pub body: String,
}

/// A typed content blob stored at a key by a commit.
///
/// This is a closed sum type on purpose: the key-index segment encoding
/// stays trivially stable, and new formats are added as new variants rather
/// than through an open hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Content {
    /// An Iceberg table pointer.
    IcebergTable(IcebergTableContent),
    /// An Iceberg view pointer.
    IcebergView(IcebergViewContent),
    /// A namespace entry.
    Namespace(NamespaceContent),
    /// A user-defined function.
    Udf(UdfContent),
}

impl Content {
    /// Returns the content type of this blob.
    #[must_use]
    pub const fn content_type(&self) -> ContentType {
        match self {
            Self::IcebergTable(_) => ContentType::IcebergTable,
            Self::IcebergView(_) => ContentType::IcebergView,
            Self::Namespace(_) => ContentType::Namespace,
            Self::Udf(_) => ContentType::Udf,
        }
    }

    /// Returns the stable content ID, if assigned.
    #[must_use]
    pub fn content_id(&self) -> Option<&str> {
        match self {
            Self::IcebergTable(c) => c.content_id.as_deref(),
            Self::IcebergView(c) => c.content_id.as_deref(),
            Self::Namespace(c) => c.content_id.as_deref(),
            Self::Udf(c) => c.content_id.as_deref(),
        }
    }

    /// Returns this blob with the given content ID assigned.
    #[must_use]
    pub fn with_content_id(mut self, content_id: String) -> Self {
        match &mut self {
            Self::IcebergTable(c) => c.content_id = Some(content_id),
            Self::IcebergView(c) => c.content_id = Some(content_id),
            Self::Namespace(c) => c.content_id = Some(content_id),
            Self::Udf(c) => c.content_id = Some(content_id),
        }
        self
    }
}

/// The kind of a named reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefKind {
    /// A mutable branch.
    Branch,
    /// A tag; immutable unless the repository allows movable tags.
    Tag,
}

/// A stored named reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefObj {
    /// Unique reference name.
    pub name: String,
    /// Branch or tag.
    pub kind: RefKind,
    /// The commit the reference points at; `ObjId::ZERO` for an empty
    /// branch with no commits yet.
    pub head: ObjId,
    /// Creation time, epoch milliseconds.
    pub created_at_ms: i64,
}

/// The repository descriptor singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDesc {
    /// Name of the default branch.
    pub default_branch: String,
    /// Repository creation time, epoch milliseconds.
    pub created_at_ms: i64,
    /// Whether tags may be moved after creation.
    #[serde(default)]
    pub movable_tags: bool,
    /// Free-form repository properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// The eventually-consistent registry of reference names.
///
/// Authoritative existence is always the `refs` bucket; readers tolerate
/// stale entries here and re-verify through `get_ref`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefNameRegistry {
    /// All registered names, sorted.
    pub names: std::collections::BTreeSet<String>,
}
