//! Iceberg table and view metadata structures.
//!
//! These mirror the Iceberg metadata JSON shape (kebab-case field names,
//! format version 2). Only the fields the catalog needs are modelled;
//! unknown JSON fields are ignored on read and never re-emitted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Iceberg table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Format version (1 or 2).
    #[serde(rename = "format-version")]
    pub format_version: i32,

    /// Unique table identifier.
    #[serde(rename = "table-uuid")]
    pub table_uuid: Uuid,

    /// Table location (root path for data and metadata).
    pub location: String,

    /// Last sequence number assigned.
    #[serde(rename = "last-sequence-number", default)]
    pub last_sequence_number: i64,

    /// Last updated timestamp in milliseconds.
    #[serde(rename = "last-updated-ms")]
    pub last_updated_ms: i64,

    /// Last assigned column ID.
    #[serde(rename = "last-column-id")]
    pub last_column_id: i32,

    /// Current schema ID.
    #[serde(rename = "current-schema-id")]
    pub current_schema_id: i32,

    /// All schemas.
    pub schemas: Vec<Schema>,

    /// Current snapshot ID.
    #[serde(rename = "current-snapshot-id", skip_serializing_if = "Option::is_none")]
    pub current_snapshot_id: Option<i64>,

    /// All snapshots.
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,

    /// History of current-snapshot-id changes.
    #[serde(rename = "snapshot-log", default)]
    pub snapshot_log: Vec<SnapshotLogEntry>,

    /// Table properties.
    #[serde(default)]
    pub properties: HashMap<String, String>,

    /// Default partition spec ID.
    #[serde(rename = "default-spec-id")]
    pub default_spec_id: i32,

    /// Partition specs.
    #[serde(rename = "partition-specs", default)]
    pub partition_specs: Vec<PartitionSpec>,

    /// Highest assigned partition field ID.
    #[serde(rename = "last-partition-id", default)]
    pub last_partition_id: i32,

    /// Default sort order ID.
    #[serde(rename = "default-sort-order-id")]
    pub default_sort_order_id: i32,

    /// Sort orders.
    #[serde(rename = "sort-orders", default)]
    pub sort_orders: Vec<SortOrder>,
}

impl TableMetadata {
    /// Creates empty metadata for a table being created.
    ///
    /// The location stays empty until a `SetLocation` update (or the
    /// catalog's default location) fills it in.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            format_version: 2,
            table_uuid: Uuid::new_v4(),
            location: String::new(),
            last_sequence_number: 0,
            last_updated_ms: 0,
            last_column_id: 0,
            current_schema_id: 0,
            schemas: Vec::new(),
            current_snapshot_id: None,
            snapshots: Vec::new(),
            snapshot_log: Vec::new(),
            properties: HashMap::new(),
            default_spec_id: 0,
            partition_specs: Vec::new(),
            last_partition_id: 0,
            default_sort_order_id: 0,
            sort_orders: Vec::new(),
        }
    }

    /// Returns the schema with the given ID.
    #[must_use]
    pub fn schema_by_id(&self, schema_id: i32) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.schema_id == schema_id)
    }
}

/// Iceberg view metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMetadata {
    /// Unique view identifier.
    #[serde(rename = "view-uuid")]
    pub view_uuid: Uuid,

    /// Format version.
    #[serde(rename = "format-version")]
    pub format_version: i32,

    /// View location.
    pub location: String,

    /// Current view version ID.
    #[serde(rename = "current-version-id")]
    pub current_version_id: i64,

    /// All view versions.
    #[serde(default)]
    pub versions: Vec<ViewVersion>,

    /// All schemas.
    #[serde(default)]
    pub schemas: Vec<Schema>,

    /// View properties.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ViewMetadata {
    /// Creates empty metadata for a view being created.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            view_uuid: Uuid::new_v4(),
            format_version: 1,
            location: String::new(),
            current_version_id: 0,
            versions: Vec::new(),
            schemas: Vec::new(),
            properties: HashMap::new(),
        }
    }
}

/// One version of a view definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewVersion {
    /// Version ID.
    #[serde(rename = "version-id")]
    pub version_id: i64,

    /// Timestamp in milliseconds.
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,

    /// Schema ID this version uses.
    #[serde(rename = "schema-id")]
    pub schema_id: i32,

    /// Version summary.
    #[serde(default)]
    pub summary: HashMap<String, String>,

    /// The view representations (SQL dialects).
    #[serde(default)]
    pub representations: Vec<ViewRepresentation>,

    /// Default namespace for unqualified names in the view SQL.
    #[serde(rename = "default-namespace", default)]
    pub default_namespace: Vec<String>,
}

/// A single representation of a view version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRepresentation {
    /// Representation type, currently always `sql`.
    #[serde(rename = "type")]
    pub repr_type: String,

    /// The view SQL.
    pub sql: String,

    /// The SQL dialect.
    pub dialect: String,
}

/// Iceberg schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema ID.
    #[serde(rename = "schema-id")]
    pub schema_id: i32,

    /// Schema type (always "struct" for table schemas).
    #[serde(rename = "type", default = "default_struct_type")]
    pub schema_type: String,

    /// Schema fields.
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

impl Schema {
    /// Returns true when both schemas define the same structure,
    /// regardless of their assigned IDs.
    #[must_use]
    pub fn same_structure(&self, other: &Schema) -> bool {
        self.schema_type == other.schema_type && self.fields == other.fields
    }

    /// Returns the highest field ID in the schema.
    #[must_use]
    pub fn max_field_id(&self) -> Option<i32> {
        self.fields.iter().map(|f| f.id).max()
    }
}

fn default_struct_type() -> String {
    "struct".to_string()
}

/// A field in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Unique field ID.
    pub id: i32,

    /// Field name.
    pub name: String,

    /// Whether the field is required.
    pub required: bool,

    /// Field data type; a string for primitives, an object for nested
    /// types.
    #[serde(rename = "type")]
    pub field_type: serde_json::Value,
}

/// Iceberg snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot ID.
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,

    /// Parent snapshot ID.
    #[serde(rename = "parent-snapshot-id", skip_serializing_if = "Option::is_none")]
    pub parent_snapshot_id: Option<i64>,

    /// Sequence number.
    #[serde(rename = "sequence-number", default)]
    pub sequence_number: i64,

    /// Timestamp in milliseconds.
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,

    /// Manifest list location.
    #[serde(rename = "manifest-list")]
    pub manifest_list: String,

    /// Snapshot summary.
    #[serde(default)]
    pub summary: HashMap<String, String>,

    /// Schema ID for this snapshot.
    #[serde(rename = "schema-id", skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<i32>,
}

/// Entry in the snapshot log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLogEntry {
    /// Snapshot ID.
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,

    /// Timestamp in milliseconds.
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
}

/// Partition specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Spec ID.
    #[serde(rename = "spec-id")]
    pub spec_id: i32,

    /// Partition fields.
    #[serde(default)]
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// Returns true when both specs partition the same way, regardless of
    /// their assigned IDs.
    #[must_use]
    pub fn same_structure(&self, other: &PartitionSpec) -> bool {
        self.fields == other.fields
    }
}

/// A field in a partition specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionField {
    /// Unique field ID.
    #[serde(rename = "field-id")]
    pub field_id: i32,

    /// Source column ID.
    #[serde(rename = "source-id")]
    pub source_id: i32,

    /// Field name.
    pub name: String,

    /// Transform type (identity, bucket, truncate, ...).
    pub transform: String,
}

/// Sort order specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    /// Order ID.
    #[serde(rename = "order-id")]
    pub order_id: i32,

    /// Sort fields.
    #[serde(default)]
    pub fields: Vec<SortField>,
}

impl SortOrder {
    /// Returns true when both orders sort the same way, regardless of
    /// their assigned IDs.
    #[must_use]
    pub fn same_structure(&self, other: &SortOrder) -> bool {
        self.fields == other.fields
    }
}

/// A field in a sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// Source column ID.
    #[serde(rename = "source-id")]
    pub source_id: i32,

    /// Transform type.
    pub transform: String,

    /// Sort direction (asc or desc).
    pub direction: String,

    /// Null ordering (nulls-first or nulls-last).
    #[serde(rename = "null-order")]
    pub null_order: String,
}
