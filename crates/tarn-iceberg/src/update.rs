//! Metadata updates and requirements for catalog commits.
//!
//! A catalog operation carries an ordered list of [`MetadataUpdate`]s plus
//! [`UpdateRequirement`] assertions checked before any update applies. The
//! enums are serde-tagged the way the Iceberg REST catalog wires them
//! (`action` / `type` discriminators, kebab-case).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::metadata::{PartitionSpec, Schema, Snapshot, SortOrder, ViewVersion};

/// Property namespace reserved for catalog pass-through properties.
pub const RESERVED_PROPERTY_PREFIX: &str = "tarn.";

/// An assertion about the prior state of a table or view, checked at
/// commit time against the draft loaded from the previous content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UpdateRequirement {
    /// Assert the entity is being created (no prior content).
    AssertCreate,

    /// Assert the table UUID matches.
    AssertTableUuid {
        /// Expected table UUID.
        uuid: Uuid,
    },

    /// Assert the view UUID matches.
    AssertViewUuid {
        /// Expected view UUID.
        uuid: Uuid,
    },

    /// Assert the current snapshot ID.
    AssertRefSnapshotId {
        /// Expected snapshot ID (absent means "no current snapshot").
        #[serde(rename = "snapshot-id")]
        snapshot_id: Option<i64>,
    },

    /// Assert the last assigned column ID.
    AssertLastAssignedFieldId {
        /// Expected last assigned field ID.
        #[serde(rename = "last-assigned-field-id")]
        last_assigned_field_id: i32,
    },

    /// Assert the current schema ID.
    AssertCurrentSchemaId {
        /// Expected current schema ID.
        #[serde(rename = "current-schema-id")]
        current_schema_id: i32,
    },

    /// Assert the last assigned partition field ID.
    AssertLastAssignedPartitionId {
        /// Expected last assigned partition ID.
        #[serde(rename = "last-assigned-partition-id")]
        last_assigned_partition_id: i32,
    },

    /// Assert the default partition spec ID.
    AssertDefaultSpecId {
        /// Expected default spec ID.
        #[serde(rename = "default-spec-id")]
        default_spec_id: i32,
    },

    /// Assert the default sort order ID.
    AssertDefaultSortOrderId {
        /// Expected default sort order ID.
        #[serde(rename = "default-sort-order-id")]
        default_sort_order_id: i32,
    },
}

impl UpdateRequirement {
    /// Returns true for the assert-create requirement.
    #[must_use]
    pub const fn is_assert_create(&self) -> bool {
        matches!(self, Self::AssertCreate)
    }
}

/// A single metadata update applied to a draft snapshot.
///
/// Table-only and view-only variants exist in one enum; each state machine
/// rejects the variants that do not apply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum MetadataUpdate {
    /// Assign a new UUID.
    AssignUuid {
        /// The UUID to assign.
        uuid: Uuid,
    },

    /// Upgrade the format version.
    UpgradeFormatVersion {
        /// Target format version.
        #[serde(rename = "format-version")]
        format_version: i32,
    },

    /// Set the entity location.
    SetLocation {
        /// The new location URI.
        location: String,
    },

    /// Add a schema.
    AddSchema {
        /// The schema to add.
        schema: Schema,
        /// Explicit last-column-id, optional.
        #[serde(rename = "last-column-id", skip_serializing_if = "Option::is_none")]
        last_column_id: Option<i32>,
    },

    /// Set the current schema. `-1` selects the schema added last.
    SetCurrentSchema {
        /// Schema ID to make current.
        #[serde(rename = "schema-id")]
        schema_id: i32,
    },

    /// Add a partition spec.
    AddPartitionSpec {
        /// The spec to add.
        spec: PartitionSpec,
    },

    /// Set the default partition spec. `-1` selects the spec added last.
    SetDefaultSpec {
        /// Spec ID to make default.
        #[serde(rename = "spec-id")]
        spec_id: i32,
    },

    /// Add a sort order.
    AddSortOrder {
        /// The order to add.
        #[serde(rename = "sort-order")]
        sort_order: SortOrder,
    },

    /// Set the default sort order. `-1` selects the order added last.
    SetDefaultSortOrder {
        /// Order ID to make default.
        #[serde(rename = "sort-order-id")]
        sort_order_id: i32,
    },

    /// Add a snapshot and make it current.
    AddSnapshot {
        /// The snapshot to add.
        snapshot: Snapshot,
    },

    /// Set entity properties.
    SetProperties {
        /// Properties to set.
        updates: HashMap<String, String>,
    },

    /// Remove entity properties.
    RemoveProperties {
        /// Property keys to remove.
        removals: Vec<String>,
    },

    /// Add a view version.
    AddViewVersion {
        /// The view version to add.
        #[serde(rename = "view-version")]
        view_version: ViewVersion,
    },

    /// Set the current view version. `-1` selects the version added last.
    SetCurrentViewVersion {
        /// Version ID to make current.
        #[serde(rename = "view-version-id")]
        view_version_id: i64,
    },
}

impl MetadataUpdate {
    /// Returns the target location when this is a `SetLocation` update.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::SetLocation { location } => Some(location),
            _ => None,
        }
    }
}
