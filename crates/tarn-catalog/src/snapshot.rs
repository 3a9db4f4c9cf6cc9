//! Derived entity snapshots.
//!
//! A derived snapshot is the parsed, cacheable projection of a content
//! blob into its format-specific structure. Its ID is a pure function of
//! the content blob's fields (metadata location plus snapshot/version ID),
//! so it can be computed without reading the metadata file.

use serde::{Deserialize, Serialize};

use tarn_core::{Error, ObjId, ObjIdHasher, Result};
use tarn_iceberg::{TableMetadata, ViewMetadata};
use tarn_versioned::Content;

/// Domain tag for derived snapshot IDs.
pub const TAG_CONTENT_SNAPSHOT: &str = "ContentSnapshot";

/// The parsed snapshot of an Iceberg table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Derived snapshot ID.
    pub id: ObjId,
    /// Stable content ID of the underlying blob.
    pub content_id: String,
    /// Location of the metadata file this snapshot was parsed from.
    pub metadata_location: String,
    /// The parsed table metadata.
    pub metadata: TableMetadata,
}

/// The parsed snapshot of an Iceberg view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSnapshot {
    /// Derived snapshot ID.
    pub id: ObjId,
    /// Stable content ID of the underlying blob.
    pub content_id: String,
    /// Location of the metadata file this snapshot was parsed from.
    pub metadata_location: String,
    /// The parsed view metadata.
    pub metadata: ViewMetadata,
}

/// A derived snapshot of either entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntitySnapshot {
    /// An Iceberg table snapshot.
    Table(TableSnapshot),
    /// An Iceberg view snapshot.
    View(ViewSnapshot),
}

impl EntitySnapshot {
    /// The derived snapshot ID.
    #[must_use]
    pub fn id(&self) -> ObjId {
        match self {
            Self::Table(s) => s.id,
            Self::View(s) => s.id,
        }
    }

    /// The stable content ID.
    #[must_use]
    pub fn content_id(&self) -> &str {
        match self {
            Self::Table(s) => &s.content_id,
            Self::View(s) => &s.content_id,
        }
    }

    /// The metadata file this snapshot was parsed from.
    #[must_use]
    pub fn metadata_location(&self) -> &str {
        match self {
            Self::Table(s) => &s.metadata_location,
            Self::View(s) => &s.metadata_location,
        }
    }

    /// The entity's base location (the Iceberg `location` field).
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::Table(s) => &s.metadata.location,
            Self::View(s) => &s.metadata.location,
        }
    }
}

/// Computes the derived snapshot ID for a content blob.
///
/// The ID folds the metadata location and the snapshot ID (tables) or
/// version ID (views); the blob body is never read.
///
/// # Errors
///
/// `NotFound` for namespaces (they have no snapshots), `InvalidArgument`
/// for other non-table content.
pub fn snapshot_id_from_content(content: &Content) -> Result<ObjId> {
    match content {
        Content::IcebergTable(table) => Ok(ObjIdHasher::new(TAG_CONTENT_SNAPSHOT)
            .update_str(&table.metadata_location)
            .update_i64(table.snapshot_id)
            .generate()),
        Content::IcebergView(view) => Ok(ObjIdHasher::new(TAG_CONTENT_SNAPSHOT)
            .update_str(&view.metadata_location)
            .update_i64(view.version_id)
            .generate()),
        Content::Namespace(ns) => Err(Error::not_found(format!(
            "no snapshots for namespace '{}': not a table",
            ns.elements.join(".")
        ))),
        Content::Udf(_) => Err(Error::invalid_argument(
            "UDF content has no derived snapshot",
        )),
    }
}
