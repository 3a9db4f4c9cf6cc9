//! Commit-time metadata update state machines.
//!
//! A catalog operation flows through one of these state machines: check
//! the requirements against the draft loaded from the prior content (or a
//! fresh draft on create), apply the updates in listed order, then read the
//! finalized draft back out. Each update is a pure validated function over
//! the draft.
//!
//! The machines track whether anything actually changed. An update list
//! that produces no effective change (adding a schema that already exists,
//! re-setting a property to its current value) must not produce a new
//! commit; callers consult [`TableUpdateState::has_changes`] and skip the
//! operation entirely when it returns false.

use tarn_core::{Error, Result};

use crate::metadata::{Schema, SnapshotLogEntry, TableMetadata, ViewMetadata};
use crate::update::{MetadataUpdate, UpdateRequirement, RESERVED_PROPERTY_PREFIX};

/// The update state machine for an Iceberg table.
#[derive(Debug)]
pub struct TableUpdateState {
    metadata: TableMetadata,
    exists: bool,
    changed: bool,
    last_added_schema_id: Option<i32>,
    last_added_spec_id: Option<i32>,
    last_added_order_id: Option<i32>,
}

impl TableUpdateState {
    /// Starts from the draft of an existing table.
    #[must_use]
    pub fn for_existing(metadata: TableMetadata) -> Self {
        Self {
            metadata,
            exists: true,
            changed: false,
            last_added_schema_id: None,
            last_added_spec_id: None,
            last_added_order_id: None,
        }
    }

    /// Starts from a fresh draft for a table being created.
    #[must_use]
    pub fn for_create() -> Self {
        Self {
            metadata: TableMetadata::empty(),
            exists: false,
            changed: true,
            last_added_schema_id: None,
            last_added_spec_id: None,
            last_added_order_id: None,
        }
    }

    /// The current draft.
    #[must_use]
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// True when any applied update changed the draft.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.changed
    }

    /// Finalizes the draft, stamping the update time.
    #[must_use]
    pub fn into_metadata(mut self, now_ms: i64) -> TableMetadata {
        self.metadata.last_updated_ms = now_ms;
        self.metadata
    }

    /// Validates all requirements against the draft.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when `assert-create` fails, `ReferenceConflict` for
    /// every other violated assertion.
    pub fn check_requirements(&self, requirements: &[UpdateRequirement]) -> Result<()> {
        for requirement in requirements {
            self.check_requirement(requirement)?;
        }
        Ok(())
    }

    fn check_requirement(&self, requirement: &UpdateRequirement) -> Result<()> {
        match requirement {
            UpdateRequirement::AssertCreate => {
                if self.exists {
                    return Err(Error::already_exists("table already exists"));
                }
            }
            UpdateRequirement::AssertTableUuid { uuid } => {
                if self.metadata.table_uuid != *uuid {
                    return Err(Error::reference_conflict(format!(
                        "table UUID mismatch: expected {uuid}, found {}",
                        self.metadata.table_uuid
                    )));
                }
            }
            UpdateRequirement::AssertViewUuid { .. } => {
                return Err(Error::invalid_argument(
                    "assert-view-uuid does not apply to a table",
                ));
            }
            UpdateRequirement::AssertRefSnapshotId { snapshot_id } => {
                if self.metadata.current_snapshot_id != *snapshot_id {
                    return Err(Error::reference_conflict(format!(
                        "snapshot mismatch: expected {snapshot_id:?}, found {:?}",
                        self.metadata.current_snapshot_id
                    )));
                }
            }
            UpdateRequirement::AssertLastAssignedFieldId {
                last_assigned_field_id,
            } => {
                if self.metadata.last_column_id != *last_assigned_field_id {
                    return Err(Error::reference_conflict(format!(
                        "last assigned field ID mismatch: expected {last_assigned_field_id}, found {}",
                        self.metadata.last_column_id
                    )));
                }
            }
            UpdateRequirement::AssertCurrentSchemaId { current_schema_id } => {
                if self.metadata.current_schema_id != *current_schema_id {
                    return Err(Error::reference_conflict(format!(
                        "current schema ID mismatch: expected {current_schema_id}, found {}",
                        self.metadata.current_schema_id
                    )));
                }
            }
            UpdateRequirement::AssertLastAssignedPartitionId {
                last_assigned_partition_id,
            } => {
                if self.metadata.last_partition_id != *last_assigned_partition_id {
                    return Err(Error::reference_conflict(format!(
                        "last assigned partition ID mismatch: expected {last_assigned_partition_id}, found {}",
                        self.metadata.last_partition_id
                    )));
                }
            }
            UpdateRequirement::AssertDefaultSpecId { default_spec_id } => {
                if self.metadata.default_spec_id != *default_spec_id {
                    return Err(Error::reference_conflict(format!(
                        "default spec ID mismatch: expected {default_spec_id}, found {}",
                        self.metadata.default_spec_id
                    )));
                }
            }
            UpdateRequirement::AssertDefaultSortOrderId {
                default_sort_order_id,
            } => {
                if self.metadata.default_sort_order_id != *default_sort_order_id {
                    return Err(Error::reference_conflict(format!(
                        "default sort order ID mismatch: expected {default_sort_order_id}, found {}",
                        self.metadata.default_sort_order_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies updates to the draft, in listed order.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for updates that do not validate or do not apply
    /// to a table.
    pub fn apply_updates(&mut self, updates: &[MetadataUpdate]) -> Result<()> {
        for update in updates {
            self.apply_update(update)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn apply_update(&mut self, update: &MetadataUpdate) -> Result<()> {
        match update {
            MetadataUpdate::AssignUuid { uuid } => {
                if self.metadata.table_uuid != *uuid {
                    self.metadata.table_uuid = *uuid;
                    self.changed = true;
                }
            }
            MetadataUpdate::UpgradeFormatVersion { format_version } => {
                if *format_version < self.metadata.format_version {
                    return Err(Error::invalid_argument(format!(
                        "format-version cannot be downgraded from {} to {format_version}",
                        self.metadata.format_version
                    )));
                }
                if *format_version > self.metadata.format_version {
                    self.metadata.format_version = *format_version;
                    self.changed = true;
                }
            }
            MetadataUpdate::SetLocation { location } => {
                if self.metadata.location != *location {
                    self.metadata.location.clone_from(location);
                    self.changed = true;
                }
            }
            MetadataUpdate::AddSchema {
                schema,
                last_column_id,
            } => {
                if let Some(last_column_id) = last_column_id {
                    if *last_column_id < self.metadata.last_column_id {
                        return Err(Error::invalid_argument(
                            "last-column-id cannot move backwards",
                        ));
                    }
                }
                if let Some(existing) = self
                    .metadata
                    .schemas
                    .iter()
                    .find(|s| s.same_structure(schema))
                {
                    // Adding a schema that already exists is a no-op.
                    self.last_added_schema_id = Some(existing.schema_id);
                } else {
                    let id_taken = self
                        .metadata
                        .schemas
                        .iter()
                        .any(|s| s.schema_id == schema.schema_id);
                    let schema_id = if id_taken {
                        self.metadata
                            .schemas
                            .iter()
                            .map(|s| s.schema_id)
                            .max()
                            .unwrap_or(-1)
                            + 1
                    } else {
                        schema.schema_id
                    };
                    let added = Schema {
                        schema_id,
                        ..schema.clone()
                    };
                    if let Some(max_field_id) = added.max_field_id() {
                        if max_field_id > self.metadata.last_column_id {
                            self.metadata.last_column_id = max_field_id;
                        }
                    }
                    if let Some(last_column_id) = last_column_id {
                        self.metadata.last_column_id = *last_column_id;
                    }
                    self.metadata.schemas.push(added);
                    self.last_added_schema_id = Some(schema_id);
                    self.changed = true;
                }
            }
            MetadataUpdate::SetCurrentSchema { schema_id } => {
                let schema_id = if *schema_id == -1 {
                    self.last_added_schema_id.ok_or_else(|| {
                        Error::invalid_argument(
                            "set-current-schema -1 without a preceding add-schema",
                        )
                    })?
                } else {
                    *schema_id
                };
                if self.metadata.schema_by_id(schema_id).is_none() {
                    return Err(Error::invalid_argument(format!(
                        "schema {schema_id} does not exist"
                    )));
                }
                if self.metadata.current_schema_id != schema_id {
                    self.metadata.current_schema_id = schema_id;
                    self.changed = true;
                }
            }
            MetadataUpdate::AddPartitionSpec { spec } => {
                if let Some(existing) = self
                    .metadata
                    .partition_specs
                    .iter()
                    .find(|s| s.same_structure(spec))
                {
                    self.last_added_spec_id = Some(existing.spec_id);
                } else {
                    if let Some(max_field_id) = spec.fields.iter().map(|f| f.field_id).max() {
                        if max_field_id > self.metadata.last_partition_id {
                            self.metadata.last_partition_id = max_field_id;
                        }
                    }
                    self.metadata.partition_specs.push(spec.clone());
                    self.last_added_spec_id = Some(spec.spec_id);
                    self.changed = true;
                }
            }
            MetadataUpdate::SetDefaultSpec { spec_id } => {
                let spec_id = if *spec_id == -1 {
                    self.last_added_spec_id.ok_or_else(|| {
                        Error::invalid_argument(
                            "set-default-spec -1 without a preceding add-partition-spec",
                        )
                    })?
                } else {
                    *spec_id
                };
                if !self
                    .metadata
                    .partition_specs
                    .iter()
                    .any(|s| s.spec_id == spec_id)
                {
                    return Err(Error::invalid_argument(format!(
                        "partition spec {spec_id} does not exist"
                    )));
                }
                if self.metadata.default_spec_id != spec_id {
                    self.metadata.default_spec_id = spec_id;
                    self.changed = true;
                }
            }
            MetadataUpdate::AddSortOrder { sort_order } => {
                if let Some(existing) = self
                    .metadata
                    .sort_orders
                    .iter()
                    .find(|o| o.same_structure(sort_order))
                {
                    self.last_added_order_id = Some(existing.order_id);
                } else {
                    self.metadata.sort_orders.push(sort_order.clone());
                    self.last_added_order_id = Some(sort_order.order_id);
                    self.changed = true;
                }
            }
            MetadataUpdate::SetDefaultSortOrder { sort_order_id } => {
                let sort_order_id = if *sort_order_id == -1 {
                    self.last_added_order_id.ok_or_else(|| {
                        Error::invalid_argument(
                            "set-default-sort-order -1 without a preceding add-sort-order",
                        )
                    })?
                } else {
                    *sort_order_id
                };
                if !self
                    .metadata
                    .sort_orders
                    .iter()
                    .any(|o| o.order_id == sort_order_id)
                {
                    return Err(Error::invalid_argument(format!(
                        "sort order {sort_order_id} does not exist"
                    )));
                }
                if self.metadata.default_sort_order_id != sort_order_id {
                    self.metadata.default_sort_order_id = sort_order_id;
                    self.changed = true;
                }
            }
            MetadataUpdate::AddSnapshot { snapshot } => {
                if self
                    .metadata
                    .snapshots
                    .iter()
                    .any(|s| s.snapshot_id == snapshot.snapshot_id)
                {
                    return Err(Error::invalid_argument(format!(
                        "snapshot {} already exists",
                        snapshot.snapshot_id
                    )));
                }
                self.metadata.last_sequence_number = self
                    .metadata
                    .last_sequence_number
                    .max(snapshot.sequence_number);
                self.metadata.current_snapshot_id = Some(snapshot.snapshot_id);
                self.metadata.snapshot_log.push(SnapshotLogEntry {
                    snapshot_id: snapshot.snapshot_id,
                    timestamp_ms: snapshot.timestamp_ms,
                });
                self.metadata.snapshots.push(snapshot.clone());
                self.changed = true;
            }
            MetadataUpdate::SetProperties { updates } => {
                check_reserved_properties(updates.keys())?;
                for (key, value) in updates {
                    if self.metadata.properties.get(key) != Some(value) {
                        self.metadata.properties.insert(key.clone(), value.clone());
                        self.changed = true;
                    }
                }
            }
            MetadataUpdate::RemoveProperties { removals } => {
                check_reserved_properties(removals.iter())?;
                for key in removals {
                    if self.metadata.properties.remove(key).is_some() {
                        self.changed = true;
                    }
                }
            }
            MetadataUpdate::AddViewVersion { .. } | MetadataUpdate::SetCurrentViewVersion { .. } => {
                return Err(Error::invalid_argument(format!(
                    "update does not apply to a table: {update:?}"
                )));
            }
        }
        Ok(())
    }
}

/// The update state machine for an Iceberg view.
#[derive(Debug)]
pub struct ViewUpdateState {
    metadata: ViewMetadata,
    exists: bool,
    changed: bool,
    last_added_schema_id: Option<i32>,
    last_added_version_id: Option<i64>,
}

impl ViewUpdateState {
    /// Starts from the draft of an existing view.
    #[must_use]
    pub fn for_existing(metadata: ViewMetadata) -> Self {
        Self {
            metadata,
            exists: true,
            changed: false,
            last_added_schema_id: None,
            last_added_version_id: None,
        }
    }

    /// Starts from a fresh draft for a view being created.
    #[must_use]
    pub fn for_create() -> Self {
        Self {
            metadata: ViewMetadata::empty(),
            exists: false,
            changed: true,
            last_added_schema_id: None,
            last_added_version_id: None,
        }
    }

    /// The current draft.
    #[must_use]
    pub fn metadata(&self) -> &ViewMetadata {
        &self.metadata
    }

    /// True when any applied update changed the draft.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.changed
    }

    /// Finalizes the draft.
    #[must_use]
    pub fn into_metadata(self) -> ViewMetadata {
        self.metadata
    }

    /// Validates all requirements against the draft.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when `assert-create` fails, `ReferenceConflict` for
    /// other violated assertions, `InvalidArgument` for table-only
    /// assertions.
    pub fn check_requirements(&self, requirements: &[UpdateRequirement]) -> Result<()> {
        for requirement in requirements {
            match requirement {
                UpdateRequirement::AssertCreate => {
                    if self.exists {
                        return Err(Error::already_exists("view already exists"));
                    }
                }
                UpdateRequirement::AssertViewUuid { uuid } => {
                    if self.metadata.view_uuid != *uuid {
                        return Err(Error::reference_conflict(format!(
                            "view UUID mismatch: expected {uuid}, found {}",
                            self.metadata.view_uuid
                        )));
                    }
                }
                other => {
                    return Err(Error::invalid_argument(format!(
                        "requirement does not apply to a view: {other:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies updates to the draft, in listed order.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for updates that do not validate or do not apply
    /// to a view.
    pub fn apply_updates(&mut self, updates: &[MetadataUpdate]) -> Result<()> {
        for update in updates {
            self.apply_update(update)?;
        }
        Ok(())
    }

    fn apply_update(&mut self, update: &MetadataUpdate) -> Result<()> {
        match update {
            MetadataUpdate::AssignUuid { uuid } => {
                if self.metadata.view_uuid != *uuid {
                    self.metadata.view_uuid = *uuid;
                    self.changed = true;
                }
            }
            MetadataUpdate::UpgradeFormatVersion { format_version } => {
                if *format_version < self.metadata.format_version {
                    return Err(Error::invalid_argument(
                        "format-version cannot be downgraded",
                    ));
                }
                if *format_version > self.metadata.format_version {
                    self.metadata.format_version = *format_version;
                    self.changed = true;
                }
            }
            MetadataUpdate::SetLocation { location } => {
                if self.metadata.location != *location {
                    self.metadata.location.clone_from(location);
                    self.changed = true;
                }
            }
            MetadataUpdate::AddSchema { schema, .. } => {
                if let Some(existing) = self
                    .metadata
                    .schemas
                    .iter()
                    .find(|s| s.same_structure(schema))
                {
                    self.last_added_schema_id = Some(existing.schema_id);
                } else {
                    self.metadata.schemas.push(schema.clone());
                    self.last_added_schema_id = Some(schema.schema_id);
                    self.changed = true;
                }
            }
            MetadataUpdate::SetCurrentSchema { .. } => {
                // The view's current schema is tracked per version.
            }
            MetadataUpdate::AddViewVersion { view_version } => {
                let id_taken = self
                    .metadata
                    .versions
                    .iter()
                    .any(|v| v.version_id == view_version.version_id);
                let version_id = if id_taken {
                    self.metadata
                        .versions
                        .iter()
                        .map(|v| v.version_id)
                        .max()
                        .unwrap_or(0)
                        + 1
                } else {
                    view_version.version_id
                };
                let mut added = view_version.clone();
                added.version_id = version_id;
                self.metadata.versions.push(added);
                self.last_added_version_id = Some(version_id);
                self.changed = true;
            }
            MetadataUpdate::SetCurrentViewVersion { view_version_id } => {
                let version_id = if *view_version_id == -1 {
                    self.last_added_version_id.ok_or_else(|| {
                        Error::invalid_argument(
                            "set-current-view-version -1 without a preceding add-view-version",
                        )
                    })?
                } else {
                    *view_version_id
                };
                if !self
                    .metadata
                    .versions
                    .iter()
                    .any(|v| v.version_id == version_id)
                {
                    return Err(Error::invalid_argument(format!(
                        "view version {version_id} does not exist"
                    )));
                }
                if self.metadata.current_version_id != version_id {
                    self.metadata.current_version_id = version_id;
                    self.changed = true;
                }
            }
            MetadataUpdate::SetProperties { updates } => {
                check_reserved_properties(updates.keys())?;
                for (key, value) in updates {
                    if self.metadata.properties.get(key) != Some(value) {
                        self.metadata.properties.insert(key.clone(), value.clone());
                        self.changed = true;
                    }
                }
            }
            MetadataUpdate::RemoveProperties { removals } => {
                check_reserved_properties(removals.iter())?;
                for key in removals {
                    if self.metadata.properties.remove(key).is_some() {
                        self.changed = true;
                    }
                }
            }
            other => {
                return Err(Error::invalid_argument(format!(
                    "update does not apply to a view: {other:?}"
                )));
            }
        }
        Ok(())
    }
}

fn check_reserved_properties<'a>(keys: impl Iterator<Item = &'a String>) -> Result<()> {
    for key in keys {
        if key.starts_with(RESERVED_PROPERTY_PREFIX) {
            return Err(Error::invalid_argument(format!(
                "property '{key}' uses the reserved '{RESERVED_PROPERTY_PREFIX}' namespace"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{SchemaField, Snapshot};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn schema(schema_id: i32, field_names: &[&str]) -> Schema {
        Schema {
            schema_id,
            schema_type: "struct".to_string(),
            fields: field_names
                .iter()
                .enumerate()
                .map(|(i, name)| SchemaField {
                    id: i32::try_from(i).unwrap() + 1,
                    name: (*name).to_string(),
                    required: true,
                    field_type: serde_json::Value::String("long".to_string()),
                })
                .collect(),
        }
    }

    fn existing_table() -> TableUpdateState {
        let mut state = TableUpdateState::for_create();
        state
            .apply_updates(&[
                MetadataUpdate::SetLocation {
                    location: "s3://wh/db/t".to_string(),
                },
                MetadataUpdate::AddSchema {
                    schema: schema(0, &["id"]),
                    last_column_id: None,
                },
                MetadataUpdate::SetCurrentSchema { schema_id: -1 },
            ])
            .unwrap();
        TableUpdateState::for_existing(state.into_metadata(1_700_000_000_000))
    }

    #[test]
    fn create_flow_produces_a_draft() {
        let mut state = TableUpdateState::for_create();
        state
            .apply_updates(&[
                MetadataUpdate::SetLocation {
                    location: "s3://wh/db/t".to_string(),
                },
                MetadataUpdate::AddSchema {
                    schema: schema(0, &["id", "name"]),
                    last_column_id: None,
                },
                MetadataUpdate::SetCurrentSchema { schema_id: -1 },
            ])
            .unwrap();
        assert!(state.has_changes());
        let metadata = state.into_metadata(42);
        assert_eq!(metadata.location, "s3://wh/db/t");
        assert_eq!(metadata.last_column_id, 2);
        assert_eq!(metadata.current_schema_id, 0);
        assert_eq!(metadata.last_updated_ms, 42);
    }

    #[test]
    fn assert_create_fails_on_existing_table() {
        let state = existing_table();
        let err = state
            .check_requirements(&[UpdateRequirement::AssertCreate])
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn uuid_and_schema_requirements() {
        let state = existing_table();
        let uuid = state.metadata().table_uuid;

        state
            .check_requirements(&[
                UpdateRequirement::AssertTableUuid { uuid },
                UpdateRequirement::AssertCurrentSchemaId {
                    current_schema_id: 0,
                },
                UpdateRequirement::AssertRefSnapshotId { snapshot_id: None },
            ])
            .unwrap();

        let err = state
            .check_requirements(&[UpdateRequirement::AssertTableUuid {
                uuid: Uuid::new_v4(),
            }])
            .unwrap_err();
        assert!(matches!(err, Error::ReferenceConflict { .. }));

        let err = state
            .check_requirements(&[UpdateRequirement::AssertCurrentSchemaId {
                current_schema_id: 9,
            }])
            .unwrap_err();
        assert!(matches!(err, Error::ReferenceConflict { .. }));
    }

    #[test]
    fn adding_an_existing_schema_is_a_no_op() {
        let mut state = existing_table();
        state
            .apply_updates(&[MetadataUpdate::AddSchema {
                schema: schema(5, &["id"]),
                last_column_id: None,
            }])
            .unwrap();
        assert!(!state.has_changes());
        assert_eq!(state.metadata().schemas.len(), 1);
    }

    #[test]
    fn adding_a_new_schema_changes_the_draft() {
        let mut state = existing_table();
        state
            .apply_updates(&[
                MetadataUpdate::AddSchema {
                    schema: schema(1, &["id", "extra"]),
                    last_column_id: None,
                },
                MetadataUpdate::SetCurrentSchema { schema_id: -1 },
            ])
            .unwrap();
        assert!(state.has_changes());
        assert_eq!(state.metadata().schemas.len(), 2);
        assert_eq!(state.metadata().current_schema_id, 1);
        assert_eq!(state.metadata().last_column_id, 2);
    }

    #[test]
    fn taken_schema_id_gets_reassigned() {
        let mut state = existing_table();
        state
            .apply_updates(&[MetadataUpdate::AddSchema {
                schema: schema(0, &["other"]),
                last_column_id: None,
            }])
            .unwrap();
        let ids: Vec<i32> = state.metadata().schemas.iter().map(|s| s.schema_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn add_snapshot_updates_current_and_log() {
        let mut state = existing_table();
        state
            .apply_updates(&[MetadataUpdate::AddSnapshot {
                snapshot: Snapshot {
                    snapshot_id: 99,
                    parent_snapshot_id: None,
                    sequence_number: 3,
                    timestamp_ms: 1_700_000_001_000,
                    manifest_list: "s3://wh/db/t/metadata/snap-99.avro".to_string(),
                    summary: HashMap::new(),
                    schema_id: Some(0),
                },
            }])
            .unwrap();
        assert!(state.has_changes());
        let metadata = state.metadata();
        assert_eq!(metadata.current_snapshot_id, Some(99));
        assert_eq!(metadata.last_sequence_number, 3);
        assert_eq!(metadata.snapshot_log.len(), 1);

        let err = state
            .apply_updates(&[MetadataUpdate::AddSnapshot {
                snapshot: Snapshot {
                    snapshot_id: 99,
                    parent_snapshot_id: None,
                    sequence_number: 4,
                    timestamp_ms: 1_700_000_002_000,
                    manifest_list: "s3://wh/db/t/metadata/snap-99b.avro".to_string(),
                    summary: HashMap::new(),
                    schema_id: Some(0),
                },
            }])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn property_updates_detect_no_ops_and_reserved_keys() {
        let mut state = existing_table();
        state
            .apply_updates(&[MetadataUpdate::SetProperties {
                updates: HashMap::from([("owner".to_string(), "data".to_string())]),
            }])
            .unwrap();
        assert!(state.has_changes());

        let mut state = TableUpdateState::for_existing(state.into_metadata(1));
        state
            .apply_updates(&[MetadataUpdate::SetProperties {
                updates: HashMap::from([("owner".to_string(), "data".to_string())]),
            }])
            .unwrap();
        assert!(!state.has_changes(), "re-setting the same value is a no-op");

        let err = state
            .apply_updates(&[MetadataUpdate::SetProperties {
                updates: HashMap::from([("tarn.commit.id".to_string(), "x".to_string())]),
            }])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn format_version_cannot_downgrade() {
        let mut state = existing_table();
        let err = state
            .apply_updates(&[MetadataUpdate::UpgradeFormatVersion { format_version: 1 }])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn view_updates_are_rejected_on_tables() {
        let mut state = existing_table();
        let err = state
            .apply_updates(&[MetadataUpdate::SetCurrentViewVersion {
                view_version_id: 1,
            }])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn view_create_flow() {
        let mut state = ViewUpdateState::for_create();
        state
            .apply_updates(&[
                MetadataUpdate::SetLocation {
                    location: "s3://wh/db/v".to_string(),
                },
                MetadataUpdate::AddSchema {
                    schema: schema(0, &["id"]),
                    last_column_id: None,
                },
                MetadataUpdate::AddViewVersion {
                    view_version: crate::metadata::ViewVersion {
                        version_id: 1,
                        timestamp_ms: 1_700_000_000_000,
                        schema_id: 0,
                        summary: HashMap::new(),
                        representations: vec![],
                        default_namespace: vec!["db".to_string()],
                    },
                },
                MetadataUpdate::SetCurrentViewVersion {
                    view_version_id: -1,
                },
            ])
            .unwrap();
        assert!(state.has_changes());
        let metadata = state.into_metadata();
        assert_eq!(metadata.current_version_id, 1);
        assert_eq!(metadata.versions.len(), 1);
    }

    #[test]
    fn table_requirements_are_rejected_on_views() {
        let state = ViewUpdateState::for_create();
        let err = state
            .check_requirements(&[UpdateRequirement::AssertCurrentSchemaId {
                current_schema_id: 0,
            }])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
