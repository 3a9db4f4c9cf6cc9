//! End-to-end tests for the catalog pipeline: create/update commits,
//! warehouse location validation, no-op short-circuiting, and
//! deduplicated snapshot materialization.

use std::collections::BTreeMap;
use std::sync::Arc;

use tarn_catalog::{
    CatalogCommitRequest, CatalogConfig, CatalogOperation, CatalogService, SnapshotFormat,
    TaskCache, TaskCacheConfig,
};
use tarn_core::{
    Clock, ContentKey, Error, ManualClock, MemoryAdapter, MemoryObjectIo, ObjectIo,
};
use tarn_iceberg::{
    IcebergCodec, JsonIcebergCodec, MetadataUpdate, Schema, SchemaField, TableMetadata,
    UpdateRequirement,
};
use tarn_versioned::{
    CommitMeta, CommitOp, CommitParams, Content, ContentType, IcebergTableContent, RefSpec,
    VersionStore, VersionStoreConfig,
};

struct Fixture {
    catalog: CatalogService<MemoryAdapter>,
    versions: Arc<VersionStore<MemoryAdapter>>,
    object_io: Arc<MemoryObjectIo>,
}

impl Fixture {
    async fn new() -> Self {
        let store = Arc::new(MemoryAdapter::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let versions = Arc::new(VersionStore::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            VersionStoreConfig::default(),
        ));
        versions
            .refs()
            .initialize("main", BTreeMap::new())
            .await
            .expect("initialize repository");

        let object_io = Arc::new(MemoryObjectIo::new());
        let catalog = CatalogService::new(
            Arc::clone(&versions),
            store,
            Arc::clone(&object_io) as Arc<dyn ObjectIo>,
            Arc::new(JsonIcebergCodec::new()),
            Arc::new(TaskCache::new(clock.clone(), TaskCacheConfig::default())),
            clock,
            CatalogConfig::new("s3://wh"),
        );
        Self {
            catalog,
            versions,
            object_io,
        }
    }

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

    fn create_table_op(key: &ContentKey, field_names: &[&str]) -> CatalogOperation {
        CatalogOperation {
            key: key.clone(),
            content_type: ContentType::IcebergTable,
            updates: vec![
                MetadataUpdate::AddSchema {
                    schema: Self::schema(0, field_names),
                    last_column_id: None,
                },
                MetadataUpdate::SetCurrentSchema { schema_id: -1 },
            ],
            requirements: vec![UpdateRequirement::AssertCreate],
        }
    }
}

#[tokio::test]
async fn create_table_then_update_metadata() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t1"]);

    // Create: expect a new head, a stored blob, and a derived snapshot.
    let (effective_1, responses) = fx
        .catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![Fixture::create_table_op(&key, &["id"])],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap();
    let h1 = effective_1.head;
    assert!(!h1.is_zero());
    assert_eq!(responses.len(), 1);
    let s1 = responses[0].snapshot.id();

    let (_, found) = fx
        .versions
        .get_content(&RefSpec::named("main"), &key)
        .await
        .unwrap();
    let location_1 = match &found.content {
        Content::IcebergTable(t) => t.metadata_location.clone(),
        other => panic!("unexpected content {other:?}"),
    };
    assert!(location_1.starts_with("s3://wh/db/t1/metadata/"));
    assert_eq!(fx.object_io.writes(), 1);

    // Update: add a schema and make it current.
    let (effective_2, responses) = fx
        .catalog
        .commit(
            "main",
            Some(h1),
            CatalogCommitRequest {
                operations: vec![CatalogOperation {
                    key: key.clone(),
                    content_type: ContentType::IcebergTable,
                    updates: vec![
                        MetadataUpdate::AddSchema {
                            schema: Fixture::schema(1, &["id", "name"]),
                            last_column_id: None,
                        },
                        MetadataUpdate::SetCurrentSchema { schema_id: -1 },
                    ],
                    requirements: vec![],
                }],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap();
    let h2 = effective_2.head;
    assert_ne!(h2, h1);
    assert_eq!(fx.versions.get_ref("main").await.unwrap().head, h2);

    let s2 = responses[0].snapshot.id();
    assert_ne!(s2, s1, "a new metadata file yields a new snapshot id");

    let (_, found) = fx
        .versions
        .get_content(&RefSpec::named("main"), &key)
        .await
        .unwrap();
    let location_2 = match &found.content {
        Content::IcebergTable(t) => t.metadata_location.clone(),
        other => panic!("unexpected content {other:?}"),
    };
    assert_ne!(location_2, location_1);
    assert_eq!(fx.object_io.writes(), 2);
}

#[tokio::test]
async fn location_outside_warehouse_is_rejected_before_any_write() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t1"]);
    let h0 = fx.versions.get_ref("main").await.unwrap().head;

    let err = fx
        .catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![CatalogOperation {
                    key,
                    content_type: ContentType::IcebergTable,
                    updates: vec![
                        MetadataUpdate::SetLocation {
                            location: "s3://other-bucket/x".to_string(),
                        },
                        MetadataUpdate::AddSchema {
                            schema: Fixture::schema(0, &["id"]),
                            last_column_id: None,
                        },
                    ],
                    requirements: vec![UpdateRequirement::AssertCreate],
                }],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidArgument { .. }));
    assert_eq!(fx.object_io.writes(), 0, "no metadata file was written");
    assert_eq!(
        fx.versions.get_ref("main").await.unwrap().head,
        h0,
        "branch head is unchanged"
    );
}

#[tokio::test]
async fn concurrent_snapshot_requests_read_the_metadata_file_once() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "ext"]);

    // Register a table that the catalog has never materialized: write the
    // metadata file and the content blob directly.
    let codec = JsonIcebergCodec::new();
    let mut metadata = TableMetadata::empty();
    metadata.location = "s3://wh/db/ext".to_string();
    metadata.schemas.push(Fixture::schema(0, &["id"]));
    metadata.last_column_id = 1;
    let metadata_location = "s3://wh/db/ext/metadata/00000-seed.metadata.json".to_string();
    fx.object_io
        .write_object(&metadata_location, codec.table_to_json(&metadata).unwrap())
        .await
        .unwrap();

    fx.versions
        .commit(CommitParams {
            branch: "main".to_string(),
            expected_head: None,
            meta: CommitMeta::by("tests", "register external table"),
            operations: vec![CommitOp::Put {
                key: key.clone(),
                content: Content::IcebergTable(IcebergTableContent {
                    content_id: None,
                    metadata_location,
                    snapshot_id: -1,
                    schema_id: 0,
                    spec_id: 0,
                    sort_order_id: 0,
                }),
                requirement: None,
            }],
        })
        .await
        .unwrap();

    let reads_before = fx.object_io.reads();
    let spec = RefSpec::named("main");
    let (a, b) = tokio::join!(
        fx.catalog
            .retrieve_snapshot(&spec, &key, SnapshotFormat::Native),
        fx.catalog
            .retrieve_snapshot(&spec, &key, SnapshotFormat::Native),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(
        fx.object_io.reads() - reads_before,
        1,
        "both callers share one metadata read"
    );
    assert_eq!(a.snapshot, b.snapshot);
    assert_eq!(a.document, b.document);
}

#[tokio::test]
async fn no_op_updates_do_not_write_a_commit() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t1"]);

    let (effective, _) = fx
        .catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![Fixture::create_table_op(&key, &["id"])],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap();
    let h1 = effective.head;
    let writes_before = fx.object_io.writes();

    // Re-adding the same schema and re-setting the current schema changes
    // nothing; the commit is short-circuited.
    let (effective, responses) = fx
        .catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![CatalogOperation {
                    key: key.clone(),
                    content_type: ContentType::IcebergTable,
                    updates: vec![
                        MetadataUpdate::AddSchema {
                            schema: Fixture::schema(0, &["id"]),
                            last_column_id: None,
                        },
                        MetadataUpdate::SetCurrentSchema { schema_id: 0 },
                    ],
                    requirements: vec![],
                }],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap();

    assert_eq!(effective.head, h1, "no new commit was written");
    assert_eq!(fx.versions.get_ref("main").await.unwrap().head, h1);
    assert_eq!(fx.object_io.writes(), writes_before, "no metadata emitted");
    assert_eq!(responses.len(), 1, "the current snapshot is still returned");
}

#[tokio::test]
async fn multi_table_commit_is_atomic() {
    let fx = Fixture::new().await;
    let t1 = ContentKey::of(&["db", "t1"]);
    let t2 = ContentKey::of(&["db", "t2"]);

    let (effective, responses) = fx
        .catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![
                    Fixture::create_table_op(&t1, &["id"]),
                    Fixture::create_table_op(&t2, &["id", "ts"]),
                ],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap();
    assert_eq!(responses.len(), 2);

    // One commit carries both puts.
    let log = fx
        .versions
        .commit_log(&RefSpec::named("main"), None, 10)
        .await
        .unwrap();
    assert_eq!(log.commits.len(), 1);
    assert_eq!(log.commits[0].0, effective.head);
    assert_eq!(log.commits[0].1.operations.len(), 2);
    assert!(log.commits[0].1.message.contains("Catalog commit with 2 operations"));

    let contents = fx
        .versions
        .get_contents(&RefSpec::named("main"), &[t1, t2])
        .await
        .unwrap();
    assert_eq!(contents.contents.len(), 2);
}

#[tokio::test]
async fn assert_create_fails_on_existing_key() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t1"]);
    fx.catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![Fixture::create_table_op(&key, &["id"])],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap();

    let err = fx
        .catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![Fixture::create_table_op(&key, &["id"])],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
}

#[tokio::test]
async fn updating_a_table_as_a_view_is_a_content_conflict() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t1"]);
    fx.catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![Fixture::create_table_op(&key, &["id"])],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap();

    let err = fx
        .catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![CatalogOperation {
                    key: key.clone(),
                    content_type: ContentType::IcebergView,
                    updates: vec![],
                    requirements: vec![],
                }],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap_err();
    match err {
        Error::ContentConflict { conflicts } => {
            assert_eq!(conflicts.len(), 1);
            assert!(conflicts[0].message.contains("cannot update table"));
        }
        other => panic!("expected content conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_catalog_commits_conflict_cleanly() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t1"]);
    let h0 = fx.versions.get_ref("main").await.unwrap().head;

    fx.catalog
        .commit(
            "main",
            Some(h0),
            CatalogCommitRequest {
                operations: vec![Fixture::create_table_op(&key, &["id"])],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap();

    // A second commit pinned to the stale head fails without touching the
    // branch.
    let head_after_first = fx.versions.get_ref("main").await.unwrap().head;
    let err = fx
        .catalog
        .commit(
            "main",
            Some(h0),
            CatalogCommitRequest {
                operations: vec![Fixture::create_table_op(&ContentKey::of(&["db", "t2"]), &["id"])],
            },
            SnapshotFormat::Native,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReferenceConflict { .. }));
    assert_eq!(fx.versions.get_ref("main").await.unwrap().head, head_after_first);
}

#[tokio::test]
async fn iceberg_format_embeds_pass_through_properties() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t1"]);

    let (effective, responses) = fx
        .catalog
        .commit(
            "main",
            None,
            CatalogCommitRequest {
                operations: vec![Fixture::create_table_op(&key, &["id"])],
            },
            SnapshotFormat::IcebergMetadata,
        )
        .await
        .unwrap();

    let response = &responses[0];
    assert!(response.file_name.ends_with(".metadata.json"));
    let properties = response.document["properties"]
        .as_object()
        .expect("properties object");
    assert_eq!(
        properties["tarn.catalog.snapshot-id"],
        response.snapshot.id().to_string()
    );
    assert_eq!(
        properties["tarn.commit.id"],
        effective.head.to_string()
    );
    assert_eq!(properties["tarn.commit.ref"], "main");
    assert!(properties.contains_key("tarn.catalog.content-id"));
}
