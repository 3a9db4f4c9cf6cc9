//! The catalog service: Iceberg-aware commits and snapshot retrieval on
//! top of the version store.
//!
//! A catalog commit loads the prior content of every touched key at one
//! resolved commit, runs each operation through the metadata update state
//! machine, emits the new metadata files into the warehouse, and lands a
//! single versioned commit with one `Put` per effectively-changed key.
//! Operations whose update list produces no change contribute nothing; a
//! commit where every operation is a no-op writes no commit at all.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use tarn_core::{
    Bucket, Clock, Conflict, ConflictKind, ContentKey, Error, ObjId, ObjectIo, Result,
    StorageAdapter,
};
use tarn_iceberg::{
    IcebergCodec, MetadataUpdate, TableMetadata, TableUpdateState, UpdateRequirement,
    ViewMetadata, ViewUpdateState,
};
use tarn_versioned::{
    CommitMeta, CommitOp, CommitParams, Content, ContentType, ContentWithKey,
    IcebergTableContent, IcebergViewContent, RefSpec, Requirement, ResolvedRef, VersionStore,
};

use crate::config::CatalogConfig;
use crate::snapshot::{snapshot_id_from_content, EntitySnapshot, TableSnapshot, ViewSnapshot};
use crate::tasks::TaskCache;

/// Output format of a retrieved or committed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// The native JSON form: the derived snapshot plus the effective
    /// reference.
    Native,
    /// The Iceberg metadata JSON form with catalog pass-through
    /// properties.
    IcebergMetadata,
}

/// One keyed operation of a catalog commit.
#[derive(Debug, Clone)]
pub struct CatalogOperation {
    /// The key the operation targets.
    pub key: ContentKey,
    /// The entity kind the operation targets.
    pub content_type: ContentType,
    /// Metadata updates, applied in order.
    pub updates: Vec<MetadataUpdate>,
    /// Assertions checked against the prior state before any update.
    pub requirements: Vec<UpdateRequirement>,
}

/// A multi-table catalog commit.
#[derive(Debug, Clone, Default)]
pub struct CatalogCommitRequest {
    /// The operations, each targeting one key.
    pub operations: Vec<CatalogOperation>,
}

/// A rendered snapshot handed back to the caller.
#[derive(Debug, Clone)]
pub struct SnapshotResponse {
    /// The key the snapshot belongs to.
    pub key: ContentKey,
    /// The reference (and effective commit) the snapshot was served from.
    pub effective: ResolvedRef,
    /// The derived snapshot.
    pub snapshot: EntitySnapshot,
    /// Suggested file name for the rendered document.
    pub file_name: String,
    /// The rendered document in the requested format.
    pub document: serde_json::Value,
}

enum SnapshotBody {
    Table(TableMetadata),
    View(ViewMetadata),
}

enum PlannedOp {
    Apply {
        key: ContentKey,
        content: Content,
        body: SnapshotBody,
        prior_payload: Option<ObjId>,
        message_line: String,
    },
    Noop {
        key: ContentKey,
        snapshot: EntitySnapshot,
    },
}

/// The catalog pipeline over a version store, warehouse object IO, the
/// Iceberg codec, and the derived-snapshot task cache.
pub struct CatalogService<S> {
    versions: Arc<VersionStore<S>>,
    store: Arc<S>,
    object_io: Arc<dyn ObjectIo>,
    codec: Arc<dyn IcebergCodec>,
    tasks: Arc<TaskCache<EntitySnapshot>>,
    clock: Arc<dyn Clock>,
    config: CatalogConfig,
}

impl<S: StorageAdapter> CatalogService<S> {
    /// Wires the catalog service; every collaborator is injected.
    #[must_use]
    pub fn new(
        versions: Arc<VersionStore<S>>,
        store: Arc<S>,
        object_io: Arc<dyn ObjectIo>,
        codec: Arc<dyn IcebergCodec>,
        tasks: Arc<TaskCache<EntitySnapshot>>,
        clock: Arc<dyn Clock>,
        config: CatalogConfig,
    ) -> Self {
        Self {
            versions,
            store,
            object_io,
            codec,
            tasks,
            clock,
            config,
        }
    }

    /// Retrieves the derived snapshot for one key.
    ///
    /// # Errors
    ///
    /// `NotFound` when the key holds no content at the reference (or
    /// holds a namespace, which has no snapshot).
    pub async fn retrieve_snapshot(
        &self,
        spec: &RefSpec,
        key: &ContentKey,
        format: SnapshotFormat,
    ) -> Result<SnapshotResponse> {
        let (effective, found) = self.versions.get_content(spec, key).await?;
        let snapshot = self.materialize(&found.content).await?;
        self.render(key.clone(), &effective, snapshot, format)
    }

    /// Retrieves derived snapshots for several keys against one resolved
    /// commit.
    ///
    /// The reference is resolved exactly once; keys without content are
    /// simply absent from the result.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing reference; per-key materialization
    /// failures surface as their own errors.
    pub async fn retrieve_snapshots(
        &self,
        spec: &RefSpec,
        keys: &[ContentKey],
        format: SnapshotFormat,
    ) -> Result<Vec<SnapshotResponse>> {
        let response = self.versions.get_contents(spec, keys).await?;
        let effective = response.effective.clone();
        let materialized = futures::future::join_all(
            response
                .contents
                .iter()
                .map(|found| self.materialize(&found.content)),
        )
        .await;
        let mut out = Vec::with_capacity(materialized.len());
        for (found, snapshot) in response.contents.into_iter().zip(materialized) {
            out.push(self.render(found.key, &effective, snapshot?, format)?);
        }
        Ok(out)
    }

    /// Executes a multi-table catalog commit against a branch.
    ///
    /// All locations are validated before anything is written; the
    /// versioned commit is atomic across all operations; derived
    /// snapshots are cached and persisted best-effort after success.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for bad updates or out-of-warehouse locations,
    /// `AlreadyExists` for violated `assert-create`, `ContentConflict`
    /// for type mismatches, `ReferenceConflict` for concurrent movement
    /// of the branch.
    pub async fn commit(
        &self,
        branch: &str,
        expected_head: Option<ObjId>,
        request: CatalogCommitRequest,
        format: SnapshotFormat,
    ) -> Result<(ResolvedRef, Vec<SnapshotResponse>)> {
        if request.operations.is_empty() {
            return Err(Error::invalid_argument("catalog commit has no operations"));
        }

        // Validate every SetLocation before emitting anything anywhere.
        for op in &request.operations {
            for update in &op.updates {
                if let Some(location) = update.location() {
                    self.config.validate_location(&*self.object_io, location)?;
                }
            }
        }

        let keys: Vec<ContentKey> = request.operations.iter().map(|op| op.key.clone()).collect();
        let spec = match expected_head {
            Some(head) => RefSpec::named_at(branch, head),
            None => RefSpec::named(branch),
        };
        let contents = self.versions.get_contents(&spec, &keys).await?;
        let effective = contents.effective.clone();
        let prior: BTreeMap<ContentKey, ContentWithKey> = contents
            .contents
            .into_iter()
            .map(|found| (found.key.clone(), found))
            .collect();

        let mut planned = Vec::with_capacity(request.operations.len());
        for op in &request.operations {
            planned.push(self.plan_operation(op, prior.get(&op.key)).await?);
        }

        let applying: Vec<&PlannedOp> = planned
            .iter()
            .filter(|p| matches!(p, PlannedOp::Apply { .. }))
            .collect();
        if applying.is_empty() {
            // Nothing effectively changed: no commit is written.
            let mut responses = Vec::new();
            for plan in planned {
                if let PlannedOp::Noop { key, snapshot } = plan {
                    responses.push(self.render(key, &effective, snapshot, format)?);
                }
            }
            return Ok((effective, responses));
        }

        let message = commit_message(&applying);
        let operations: Vec<CommitOp> = applying
            .iter()
            .map(|plan| match plan {
                PlannedOp::Apply {
                    key,
                    content,
                    prior_payload,
                    ..
                } => CommitOp::Put {
                    key: key.clone(),
                    content: content.clone(),
                    requirement: Some(match prior_payload {
                        Some(payload) => Requirement::HeadMatches(*payload),
                        None => Requirement::MustNotExist,
                    }),
                },
                PlannedOp::Noop { .. } => unreachable!("filtered above"),
            })
            .collect();

        let result = self
            .versions
            .commit(CommitParams {
                branch: branch.to_string(),
                expected_head: Some(effective.head),
                meta: CommitMeta::by("tarn-catalog", message),
                operations,
            })
            .await?;

        let new_effective = ResolvedRef {
            name: effective.name.clone(),
            kind: effective.kind,
            head: result.head,
        };

        let mut responses = Vec::with_capacity(planned.len());
        for plan in planned {
            match plan {
                PlannedOp::Apply {
                    key, content, body, ..
                } => {
                    let content = match content.content_id() {
                        Some(_) => content,
                        None => {
                            let assigned = result
                                .assigned_content_ids
                                .get(&key)
                                .cloned()
                                .ok_or_else(|| {
                                    Error::internal(format!(
                                        "no content id was assigned for key '{key}'"
                                    ))
                                })?;
                            content.with_content_id(assigned)
                        }
                    };
                    let snapshot = build_snapshot(&content, body)?;
                    self.store_snapshot(&snapshot);
                    responses.push(self.render(key, &new_effective, snapshot, format)?);
                }
                PlannedOp::Noop { key, snapshot } => {
                    responses.push(self.render(key, &new_effective, snapshot, format)?);
                }
            }
        }
        Ok((new_effective, responses))
    }

    /// Runs one operation through its state machine and plans the commit
    /// operation, emitting the metadata file for effective changes.
    async fn plan_operation(
        &self,
        op: &CatalogOperation,
        prior: Option<&ContentWithKey>,
    ) -> Result<PlannedOp> {
        let assert_create = op.requirements.iter().any(UpdateRequirement::is_assert_create);
        if let Some(prior) = prior {
            if assert_create {
                return Err(Error::already_exists(format!(
                    "key '{}' already holds a {}",
                    op.key,
                    entity_name(prior.content.content_type())
                )));
            }
            if prior.content.content_type() != op.content_type {
                return Err(Error::content_conflict(vec![Conflict::new(
                    op.key.clone(),
                    ConflictKind::PayloadDiffers,
                    format!(
                        "cannot update {} '{}' as a {}",
                        entity_name(prior.content.content_type()),
                        op.key,
                        entity_name(op.content_type)
                    ),
                )]));
            }
        }

        match op.content_type {
            ContentType::IcebergTable => self.plan_table_operation(op, prior).await,
            ContentType::IcebergView => self.plan_view_operation(op, prior).await,
            ContentType::Namespace | ContentType::Udf => Err(Error::invalid_argument(format!(
                "catalog commits do not support {} operations",
                entity_name(op.content_type)
            ))),
        }
    }

    async fn plan_table_operation(
        &self,
        op: &CatalogOperation,
        prior: Option<&ContentWithKey>,
    ) -> Result<PlannedOp> {
        let (mut state, prior_content_id, prior_payload) = match prior {
            Some(prior) => {
                let snapshot = self.materialize(&prior.content).await?;
                let EntitySnapshot::Table(table) = snapshot else {
                    return Err(Error::internal(format!(
                        "snapshot of table key '{}' is not a table snapshot",
                        op.key
                    )));
                };
                (
                    TableUpdateState::for_existing(table.metadata),
                    prior.content.content_id().map(ToString::to_string),
                    Some(prior.payload),
                )
            }
            None => (TableUpdateState::for_create(), None, None),
        };

        state.check_requirements(&op.requirements)?;
        if prior.is_none() && !op.updates.iter().any(|u| u.location().is_some()) {
            // New tables without an explicit location land under the
            // warehouse at their key path.
            state.apply_updates(&[MetadataUpdate::SetLocation {
                location: self.config.default_location(&op.key),
            }])?;
        }
        state.apply_updates(&op.updates)?;

        if prior.is_some() && !state.has_changes() {
            let prior = prior.expect("checked above");
            let snapshot = self.materialize(&prior.content).await?;
            tracing::debug!(key = %op.key, "catalog operation is a no-op, skipping");
            return Ok(PlannedOp::Noop {
                key: op.key.clone(),
                snapshot,
            });
        }

        let metadata = state.into_metadata(self.clock.now_millis());
        let metadata_location =
            metadata_json_location(&metadata.location, metadata.last_sequence_number);
        let bytes = self.codec.table_to_json(&metadata)?;
        self.object_io
            .write_object(&metadata_location, bytes)
            .await
            .map_err(|e| Error::internal(format!("metadata emission failed: {e}")))?;

        let content = Content::IcebergTable(IcebergTableContent {
            content_id: prior_content_id,
            metadata_location,
            snapshot_id: metadata.current_snapshot_id.unwrap_or(-1),
            schema_id: metadata.current_schema_id,
            spec_id: metadata.default_spec_id,
            sort_order_id: metadata.default_sort_order_id,
        });
        Ok(PlannedOp::Apply {
            key: op.key.clone(),
            message_line: format!(
                "{} table {}",
                if prior.is_some() { "Update" } else { "Create" },
                op.key
            ),
            content,
            body: SnapshotBody::Table(metadata),
            prior_payload,
        })
    }

    async fn plan_view_operation(
        &self,
        op: &CatalogOperation,
        prior: Option<&ContentWithKey>,
    ) -> Result<PlannedOp> {
        let (mut state, prior_content_id, prior_payload) = match prior {
            Some(prior) => {
                let snapshot = self.materialize(&prior.content).await?;
                let EntitySnapshot::View(view) = snapshot else {
                    return Err(Error::internal(format!(
                        "snapshot of view key '{}' is not a view snapshot",
                        op.key
                    )));
                };
                (
                    ViewUpdateState::for_existing(view.metadata),
                    prior.content.content_id().map(ToString::to_string),
                    Some(prior.payload),
                )
            }
            None => (ViewUpdateState::for_create(), None, None),
        };

        state.check_requirements(&op.requirements)?;
        if prior.is_none() && !op.updates.iter().any(|u| u.location().is_some()) {
            state.apply_updates(&[MetadataUpdate::SetLocation {
                location: self.config.default_location(&op.key),
            }])?;
        }
        state.apply_updates(&op.updates)?;

        if prior.is_some() && !state.has_changes() {
            let prior = prior.expect("checked above");
            let snapshot = self.materialize(&prior.content).await?;
            tracing::debug!(key = %op.key, "catalog operation is a no-op, skipping");
            return Ok(PlannedOp::Noop {
                key: op.key.clone(),
                snapshot,
            });
        }

        let metadata = state.into_metadata();
        let metadata_location =
            metadata_json_location(&metadata.location, metadata.current_version_id);
        let bytes = self.codec.view_to_json(&metadata)?;
        self.object_io
            .write_object(&metadata_location, bytes)
            .await
            .map_err(|e| Error::internal(format!("metadata emission failed: {e}")))?;

        let content = Content::IcebergView(IcebergViewContent {
            content_id: prior_content_id,
            metadata_location,
            version_id: metadata.current_version_id,
        });
        Ok(PlannedOp::Apply {
            key: op.key.clone(),
            message_line: format!(
                "{} view {}",
                if prior.is_some() { "Update" } else { "Create" },
                op.key
            ),
            content,
            body: SnapshotBody::View(metadata),
            prior_payload,
        })
    }

    /// Materializes the derived snapshot of a content blob through the
    /// task cache: persisted snapshots are reused, otherwise the metadata
    /// file is read and parsed exactly once per snapshot ID.
    async fn materialize(&self, content: &Content) -> Result<EntitySnapshot> {
        let snapshot_id = snapshot_id_from_content(content)?;
        let store = Arc::clone(&self.store);
        let object_io = Arc::clone(&self.object_io);
        let codec = Arc::clone(&self.codec);
        let content = content.clone();
        self.tasks
            .get(snapshot_id, async move {
                if let Ok(bytes) = store.get(Bucket::ContentAttachments, &snapshot_id).await {
                    if let Ok(snapshot) = serde_json::from_slice::<EntitySnapshot>(&bytes) {
                        return Ok(snapshot);
                    }
                }
                let snapshot = match &content {
                    Content::IcebergTable(table) => {
                        let bytes = object_io
                            .read_object(&table.metadata_location)
                            .await
                            .map_err(|e| {
                                Error::internal(format!("failed to read table metadata: {e}"))
                            })?;
                        let metadata = codec.table_from_json(&bytes)?;
                        EntitySnapshot::Table(TableSnapshot {
                            id: snapshot_id,
                            content_id: table.content_id.clone().unwrap_or_default(),
                            metadata_location: table.metadata_location.clone(),
                            metadata,
                        })
                    }
                    Content::IcebergView(view) => {
                        let bytes = object_io
                            .read_object(&view.metadata_location)
                            .await
                            .map_err(|e| {
                                Error::internal(format!("failed to read view metadata: {e}"))
                            })?;
                        let metadata = codec.view_from_json(&bytes)?;
                        EntitySnapshot::View(ViewSnapshot {
                            id: snapshot_id,
                            content_id: view.content_id.clone().unwrap_or_default(),
                            metadata_location: view.metadata_location.clone(),
                            metadata,
                        })
                    }
                    Content::Namespace(_) | Content::Udf(_) => {
                        return Err(Error::internal(
                            "content without snapshots reached materialization",
                        ));
                    }
                };
                persist_snapshot(store, &snapshot);
                Ok(snapshot)
            })
            .await
    }

    /// Caches and persists a snapshot produced by a commit, best-effort:
    /// the commit result is never blocked on it, and a lost write only
    /// costs a re-parse later.
    fn store_snapshot(&self, snapshot: &EntitySnapshot) {
        if self.tasks.prime(snapshot.id(), snapshot.clone()).is_err() {
            return;
        }
        persist_snapshot(Arc::clone(&self.store), snapshot);
    }

    fn render(
        &self,
        key: ContentKey,
        effective: &ResolvedRef,
        snapshot: EntitySnapshot,
        format: SnapshotFormat,
    ) -> Result<SnapshotResponse> {
        let (file_name, document) = match format {
            SnapshotFormat::Native => {
                let file_name = format!(
                    "{}_{}.tarn-metadata.json",
                    key.elements().join("/"),
                    snapshot.id()
                );
                let document = serde_json::json!({
                    "snapshot": snapshot,
                    "reference": effective,
                });
                (file_name, document)
            }
            SnapshotFormat::IcebergMetadata => {
                let file_name = format!("00000-{}.metadata.json", snapshot.id());
                let mut document = match &snapshot {
                    EntitySnapshot::Table(s) => serde_json::to_value(&s.metadata),
                    EntitySnapshot::View(s) => serde_json::to_value(&s.metadata),
                }
                .map_err(|e| Error::internal(format!("failed to render metadata: {e}")))?;
                let properties = document
                    .as_object_mut()
                    .and_then(|m| m.get_mut("properties"))
                    .and_then(serde_json::Value::as_object_mut)
                    .ok_or_else(|| Error::internal("rendered metadata has no properties"))?;
                properties.insert(
                    "tarn.catalog.content-id".to_string(),
                    snapshot.content_id().into(),
                );
                properties.insert(
                    "tarn.catalog.snapshot-id".to_string(),
                    snapshot.id().to_string().into(),
                );
                properties.insert(
                    "tarn.commit.id".to_string(),
                    effective.head.to_string().into(),
                );
                properties.insert(
                    "tarn.commit.ref".to_string(),
                    effective
                        .name
                        .clone()
                        .unwrap_or_else(|| effective.head.to_string())
                        .into(),
                );
                (file_name, document)
            }
        };
        Ok(SnapshotResponse {
            key,
            effective: effective.clone(),
            snapshot,
            file_name,
            document,
        })
    }
}

/// Writes a derived snapshot into the `content_attachments` bucket in the
/// background so later processes skip recomputation.
fn persist_snapshot<S: StorageAdapter>(store: Arc<S>, snapshot: &EntitySnapshot) {
    let Ok(bytes) = serde_json::to_vec(snapshot) else {
        return;
    };
    let id = snapshot.id();
    tokio::spawn(async move {
        if let Err(err) = store
            .put(Bucket::ContentAttachments, &id, Bytes::from(bytes))
            .await
        {
            if !matches!(err, tarn_core::StoreError::AlreadyExists { .. }) {
                tracing::warn!(snapshot = %id, "failed to persist derived snapshot: {err}");
            }
        }
    });
}

fn build_snapshot(content: &Content, body: SnapshotBody) -> Result<EntitySnapshot> {
    let id = snapshot_id_from_content(content)?;
    let content_id = content
        .content_id()
        .ok_or_else(|| Error::internal("content id missing after commit"))?
        .to_string();
    match (content, body) {
        (Content::IcebergTable(table), SnapshotBody::Table(metadata)) => {
            Ok(EntitySnapshot::Table(TableSnapshot {
                id,
                content_id,
                metadata_location: table.metadata_location.clone(),
                metadata,
            }))
        }
        (Content::IcebergView(view), SnapshotBody::View(metadata)) => {
            Ok(EntitySnapshot::View(ViewSnapshot {
                id,
                content_id,
                metadata_location: view.metadata_location.clone(),
                metadata,
            }))
        }
        _ => Err(Error::internal("content and snapshot body diverge")),
    }
}

fn commit_message(applying: &[&PlannedOp]) -> String {
    let lines: Vec<&str> = applying
        .iter()
        .filter_map(|plan| match plan {
            PlannedOp::Apply { message_line, .. } => Some(message_line.as_str()),
            PlannedOp::Noop { .. } => None,
        })
        .collect();
    if lines.len() == 1 {
        lines[0].to_string()
    } else {
        let mut message = format!("Catalog commit with {} operations\n", lines.len());
        for line in lines {
            message.push_str("\n* ");
            message.push_str(line);
        }
        message
    }
}

fn metadata_json_location(location: &str, sequence: i64) -> String {
    format!(
        "{}/metadata/{:05}-{}.metadata.json",
        location.trim_end_matches('/'),
        sequence,
        Uuid::new_v4()
    )
}

fn entity_name(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::IcebergTable => "table",
        ContentType::IcebergView => "view",
        ContentType::Namespace => "namespace",
        ContentType::Udf => "function",
    }
}
