//! Integration tests for the version store: commits, merges, transplants,
//! and reference-consistent reads over the in-memory adapter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tarn_core::{ContentKey, Error, ManualClock, MemoryAdapter, ObjId};
use tarn_versioned::{
    CommitMeta, CommitOp, CommitParams, Content, MergeParams, MergeStrategy, NamespaceContent,
    RefKind, RefSpec, Requirement, TransplantParams, VersionStore, VersionStoreConfig,
};

struct Fixture {
    store: VersionStore<MemoryAdapter>,
}

impl Fixture {
    async fn new() -> Self {
        let store = VersionStore::new(
            Arc::new(MemoryAdapter::new()),
            Arc::new(ManualClock::new()),
            VersionStoreConfig::default(),
        );
        store
            .refs()
            .initialize("main", BTreeMap::new())
            .await
            .expect("initialize repository");
        Self { store }
    }

    fn content(marker: &str) -> Content {
        Content::Namespace(NamespaceContent {
            content_id: None,
            elements: vec![marker.to_string()],
            properties: BTreeMap::new(),
        })
    }

    async fn put(&self, branch: &str, key: &ContentKey, marker: &str) -> ObjId {
        self.store
            .commit(CommitParams {
                branch: branch.to_string(),
                expected_head: None,
                meta: CommitMeta::by("tests", format!("put {key}")),
                operations: vec![CommitOp::Put {
                    key: key.clone(),
                    content: Self::content(marker),
                    requirement: None,
                }],
            })
            .await
            .expect("commit")
            .head
    }

    async fn head(&self, branch: &str) -> ObjId {
        self.store.get_ref(branch).await.expect("get ref").head
    }
}

#[tokio::test]
async fn commit_advances_head_and_links_parent() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t1"]);

    let h0 = fx.head("main").await;
    assert!(h0.is_zero());

    let h1 = fx.put("main", &key, "one").await;
    assert_eq!(fx.head("main").await, h1);

    let h2 = fx.put("main", &key, "two").await;
    assert_eq!(fx.head("main").await, h2);

    // The parent chain of the new head contains the previous head.
    let log = fx
        .store
        .commit_log(&RefSpec::named("main"), None, 10)
        .await
        .unwrap();
    let ids: Vec<ObjId> = log.commits.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![h2, h1]);
    assert_eq!(log.commits[0].1.parents, vec![h1]);
}

#[tokio::test]
async fn commit_id_matches_canonical_hash() {
    let fx = Fixture::new().await;
    let head = fx.put("main", &ContentKey::of(&["db", "t"]), "x").await;
    let commit = fx.store.engine().fetch_commit(&head).await.unwrap();
    assert_eq!(commit.id().unwrap(), head);
}

#[tokio::test]
async fn put_then_delete_returns_not_found() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t1"]);
    fx.put("main", &key, "one").await;

    fx.store
        .commit(CommitParams {
            branch: "main".into(),
            expected_head: None,
            meta: CommitMeta::by("tests", "delete db.t1"),
            operations: vec![CommitOp::Delete {
                key: key.clone(),
                requirement: None,
            }],
        })
        .await
        .unwrap();

    let err = fx
        .store
        .get_content(&RefSpec::named("main"), &key)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn concurrent_conflicting_commits_leave_no_partial_state() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["x"]);
    let h0 = fx.head("main").await;

    // First writer lands against H0.
    let first = fx
        .store
        .commit(CommitParams {
            branch: "main".into(),
            expected_head: Some(h0),
            meta: CommitMeta::by("writer-1", "put x"),
            operations: vec![CommitOp::Put {
                key: key.clone(),
                content: Fixture::content("first"),
                requirement: None,
            }],
        })
        .await
        .unwrap();

    // Second writer still expects H0 and must fail.
    let err = fx
        .store
        .commit(CommitParams {
            branch: "main".into(),
            expected_head: Some(h0),
            meta: CommitMeta::by("writer-2", "put x"),
            operations: vec![CommitOp::Put {
                key: key.clone(),
                content: Fixture::content("second"),
                requirement: None,
            }],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReferenceConflict { .. }));

    // The branch still points at the winner; the loser left nothing behind.
    assert_eq!(fx.head("main").await, first.head);
    let (_, content) = fx
        .store
        .get_content(&RefSpec::named("main"), &key)
        .await
        .unwrap();
    match content.content {
        Content::Namespace(ns) => assert_eq!(ns.elements, vec!["first".to_string()]),
        other => panic!("unexpected content {other:?}"),
    }
}

#[tokio::test]
async fn requirement_violations_aggregate_into_one_error() {
    let fx = Fixture::new().await;
    let existing = ContentKey::of(&["present"]);
    fx.put("main", &existing, "v").await;

    let err = fx
        .store
        .commit(CommitParams {
            branch: "main".into(),
            expected_head: None,
            meta: CommitMeta::by("tests", "conflicting requirements"),
            operations: vec![
                CommitOp::Put {
                    key: existing.clone(),
                    content: Fixture::content("w"),
                    requirement: Some(Requirement::MustNotExist),
                },
                CommitOp::Unchanged {
                    key: ContentKey::of(&["absent"]),
                    requirement: Requirement::MustExist,
                },
            ],
        })
        .await
        .unwrap_err();

    let conflicts = err.conflicts();
    assert_eq!(conflicts.len(), 2);
    assert_eq!(
        conflicts[0].key.as_ref().unwrap(),
        &existing,
        "conflicts are reported in operation key order"
    );
}

#[tokio::test]
async fn head_matches_requirement_guards_updates() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t"]);
    fx.put("main", &key, "one").await;
    let (_, current) = fx
        .store
        .get_content(&RefSpec::named("main"), &key)
        .await
        .unwrap();

    // Matching payload passes.
    fx.store
        .commit(CommitParams {
            branch: "main".into(),
            expected_head: None,
            meta: CommitMeta::by("tests", "guarded update"),
            operations: vec![CommitOp::Put {
                key: key.clone(),
                content: Fixture::content("two"),
                requirement: Some(Requirement::HeadMatches(current.payload)),
            }],
        })
        .await
        .unwrap();

    // The stale payload no longer matches.
    let err = fx
        .store
        .commit(CommitParams {
            branch: "main".into(),
            expected_head: None,
            meta: CommitMeta::by("tests", "stale update"),
            operations: vec![CommitOp::Put {
                key: key.clone(),
                content: Fixture::content("three"),
                requirement: Some(Requirement::HeadMatches(current.payload)),
            }],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContentConflict { .. }));
}

#[tokio::test]
async fn content_id_is_preserved_across_updates() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["db", "t"]);
    fx.put("main", &key, "one").await;
    let (_, first) = fx
        .store
        .get_content(&RefSpec::named("main"), &key)
        .await
        .unwrap();
    let first_id = first.content.content_id().unwrap().to_string();

    fx.put("main", &key, "two").await;
    let (_, second) = fx
        .store
        .get_content(&RefSpec::named("main"), &key)
        .await
        .unwrap();
    assert_eq!(second.content.content_id().unwrap(), first_id);
}

#[tokio::test]
async fn multi_get_resolves_every_key_at_one_commit() {
    let fx = Fixture::new().await;
    let a = ContentKey::of(&["a"]);
    let b = ContentKey::of(&["b"]);
    fx.put("main", &a, "1").await;
    let pinned = fx.put("main", &b, "2").await;

    let response = fx
        .store
        .get_contents(&RefSpec::named("main"), &[a.clone(), b.clone()])
        .await
        .unwrap();
    assert_eq!(response.effective.head, pinned);
    assert_eq!(response.contents.len(), 2);

    // Later commits do not disturb a pinned read.
    fx.put("main", &a, "3").await;
    let pinned_read = fx
        .store
        .get_contents(&RefSpec::named_at("main", pinned), &[a.clone()])
        .await
        .unwrap();
    assert_eq!(pinned_read.effective.head, pinned);
    match &pinned_read.contents[0].content {
        Content::Namespace(ns) => assert_eq!(ns.elements, vec!["1".to_string()]),
        other => panic!("unexpected content {other:?}"),
    }
}

#[tokio::test]
async fn merge_of_disjoint_keys_creates_two_parent_commit() {
    let fx = Fixture::new().await;
    let h0 = fx.put("main", &ContentKey::of(&["seed"]), "s").await;

    fx.store
        .refs()
        .create_ref("feat", RefKind::Branch, h0)
        .await
        .unwrap();

    let hf = fx.put("feat", &ContentKey::of(&["a"]), "from-feat").await;
    let hm = fx.put("main", &ContentKey::of(&["b"]), "from-main").await;

    let result = fx
        .store
        .merge(MergeParams {
            source: RefSpec::named("feat"),
            target_branch: "main".into(),
            default_strategy: MergeStrategy::Normal,
            key_behaviors: HashMap::new(),
            meta: CommitMeta::by("tests", "merge feat into main"),
            dry_run: false,
        })
        .await
        .unwrap();

    let merged = result.created.expect("a merge commit");
    assert_eq!(fx.head("main").await, merged);

    let commit = fx.store.engine().fetch_commit(&merged).await.unwrap();
    assert_eq!(commit.parents, vec![hm, hf]);

    // Both keys are live on the merged head.
    let response = fx
        .store
        .get_contents(
            &RefSpec::named("main"),
            &[ContentKey::of(&["a"]), ContentKey::of(&["b"])],
        )
        .await
        .unwrap();
    assert_eq!(response.contents.len(), 2);
}

#[tokio::test]
async fn merge_conflict_under_default_strategy_leaves_target_unchanged() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["a"]);
    let h0 = fx.put("main", &key, "base").await;

    fx.store
        .refs()
        .create_ref("feat", RefKind::Branch, h0)
        .await
        .unwrap();
    fx.put("feat", &key, "feat-side").await;
    let hm = fx.put("main", &key, "main-side").await;

    let err = fx
        .store
        .merge(MergeParams {
            source: RefSpec::named("feat"),
            target_branch: "main".into(),
            default_strategy: MergeStrategy::Normal,
            key_behaviors: HashMap::new(),
            meta: CommitMeta::by("tests", "merge feat into main"),
            dry_run: false,
        })
        .await
        .unwrap_err();

    match &err {
        Error::ContentConflict { conflicts } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].key.as_ref().unwrap(), &key);
        }
        other => panic!("expected content conflict, got {other:?}"),
    }
    assert_eq!(fx.head("main").await, hm);
}

#[tokio::test]
async fn merge_conflict_resolves_with_per_key_override() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["a"]);
    let h0 = fx.put("main", &key, "base").await;

    fx.store
        .refs()
        .create_ref("feat", RefKind::Branch, h0)
        .await
        .unwrap();
    fx.put("feat", &key, "feat-side").await;
    fx.put("main", &key, "main-side").await;

    let result = fx
        .store
        .merge(MergeParams {
            source: RefSpec::named("feat"),
            target_branch: "main".into(),
            default_strategy: MergeStrategy::Normal,
            key_behaviors: HashMap::from([(key.clone(), MergeStrategy::PreferSource)]),
            meta: CommitMeta::by("tests", "merge feat into main"),
            dry_run: false,
        })
        .await
        .unwrap();
    assert!(result.created.is_some());

    let (_, content) = fx
        .store
        .get_content(&RefSpec::named("main"), &key)
        .await
        .unwrap();
    match content.content {
        Content::Namespace(ns) => assert_eq!(ns.elements, vec!["feat-side".to_string()]),
        other => panic!("unexpected content {other:?}"),
    }
}

#[tokio::test]
async fn merging_an_ancestor_is_a_no_op() {
    let fx = Fixture::new().await;
    let h0 = fx.put("main", &ContentKey::of(&["a"]), "1").await;

    fx.store
        .refs()
        .create_ref("feat", RefKind::Branch, h0)
        .await
        .unwrap();
    let h1 = fx.put("main", &ContentKey::of(&["b"]), "2").await;

    // feat's head (h0) is an ancestor of main's head (h1).
    let result = fx
        .store
        .merge(MergeParams {
            source: RefSpec::named("feat"),
            target_branch: "main".into(),
            default_strategy: MergeStrategy::Normal,
            key_behaviors: HashMap::new(),
            meta: CommitMeta::by("tests", "merge ancestor"),
            dry_run: false,
        })
        .await
        .unwrap();
    assert_eq!(result.head, h1);
    assert!(result.created.is_none());
    assert_eq!(fx.head("main").await, h1);
}

#[tokio::test]
async fn transplant_applies_commits_in_order() {
    let fx = Fixture::new().await;
    let h0 = fx.put("main", &ContentKey::of(&["seed"]), "s").await;

    fx.store
        .refs()
        .create_ref("work", RefKind::Branch, h0)
        .await
        .unwrap();
    let c1 = fx.put("work", &ContentKey::of(&["a"]), "1").await;
    let c2 = fx.put("work", &ContentKey::of(&["b"]), "2").await;

    let result = fx
        .store
        .transplant(TransplantParams {
            target_branch: "main".into(),
            commits: vec![c1, c2],
            squash: false,
            meta: CommitMeta::by("tests", "transplant work"),
        })
        .await
        .unwrap();
    assert!(result.created.is_some());
    assert_eq!(result.applied_keys.len(), 2);

    // One synthesized commit per source step.
    let log = fx
        .store
        .commit_log(&RefSpec::named("main"), None, 10)
        .await
        .unwrap();
    assert_eq!(log.commits.len(), 3);
    assert_eq!(log.commits[0].1.message, "put b");
    assert_eq!(log.commits[1].1.message, "put a");
}

#[tokio::test]
async fn transplant_squash_synthesizes_one_commit() {
    let fx = Fixture::new().await;
    let h0 = fx.put("main", &ContentKey::of(&["seed"]), "s").await;

    fx.store
        .refs()
        .create_ref("work", RefKind::Branch, h0)
        .await
        .unwrap();
    let c1 = fx.put("work", &ContentKey::of(&["a"]), "1").await;
    let c2 = fx.put("work", &ContentKey::of(&["b"]), "2").await;

    fx.store
        .transplant(TransplantParams {
            target_branch: "main".into(),
            commits: vec![c1, c2],
            squash: true,
            meta: CommitMeta::by("tests", "squashed transplant"),
        })
        .await
        .unwrap();

    let log = fx
        .store
        .commit_log(&RefSpec::named("main"), None, 10)
        .await
        .unwrap();
    assert_eq!(log.commits.len(), 2);
    assert_eq!(log.commits[0].1.message, "squashed transplant");
    assert_eq!(log.commits[0].1.operations.len(), 2);
}

#[tokio::test]
async fn transplant_conflicts_when_target_diverged() {
    let fx = Fixture::new().await;
    let key = ContentKey::of(&["a"]);
    let h0 = fx.put("main", &key, "base").await;

    fx.store
        .refs()
        .create_ref("work", RefKind::Branch, h0)
        .await
        .unwrap();
    let c1 = fx.put("work", &key, "work-side").await;
    let hm = fx.put("main", &key, "main-side").await;

    let err = fx
        .store
        .transplant(TransplantParams {
            target_branch: "main".into(),
            commits: vec![c1],
            squash: false,
            meta: CommitMeta::by("tests", "conflicting transplant"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContentConflict { .. }));
    assert_eq!(fx.head("main").await, hm);
}

#[tokio::test]
async fn diff_is_empty_on_self_and_symmetric_between_refs() {
    let fx = Fixture::new().await;
    let h0 = fx.put("main", &ContentKey::of(&["a"]), "1").await;

    fx.store
        .refs()
        .create_ref("feat", RefKind::Branch, h0)
        .await
        .unwrap();
    fx.put("feat", &ContentKey::of(&["b"]), "2").await;

    let same = fx
        .store
        .diff(&RefSpec::named("main"), &RefSpec::named("main"))
        .await
        .unwrap();
    assert!(same.is_empty());

    let forward = fx
        .store
        .diff(&RefSpec::named("main"), &RefSpec::named("feat"))
        .await
        .unwrap();
    let backward = fx
        .store
        .diff(&RefSpec::named("feat"), &RefSpec::named("main"))
        .await
        .unwrap();
    assert_eq!(forward.len(), 1);
    assert_eq!(backward.len(), 1);
    assert_eq!(forward[0].key, backward[0].key);
    assert_eq!(forward[0].to, backward[0].from);
    assert_eq!(forward[0].from, backward[0].to);
}

#[tokio::test]
async fn entries_lists_keys_with_prefix_and_pagination() {
    let fx = Fixture::new().await;
    for i in 0..5 {
        fx.put("main", &ContentKey::of(&["db", format!("t{i}").as_str()]), "x")
            .await;
    }
    fx.put("main", &ContentKey::of(&["other", "t"]), "y").await;

    let prefix = ContentKey::of(&["db"]);
    let page = fx
        .store
        .entries(&RefSpec::named("main"), Some(&prefix), None, 3)
        .await
        .unwrap();
    assert_eq!(page.entries.len(), 3);
    let token = page.next.expect("more entries");

    let rest = fx
        .store
        .entries(&RefSpec::named("main"), Some(&prefix), Some(&token), 10)
        .await
        .unwrap();
    assert_eq!(rest.entries.len(), 2);
    assert!(rest.next.is_none());
}

#[tokio::test]
async fn commits_are_rejected_on_tags() {
    let fx = Fixture::new().await;
    let h0 = fx.put("main", &ContentKey::of(&["a"]), "1").await;
    fx.store
        .refs()
        .create_ref("v1", RefKind::Tag, h0)
        .await
        .unwrap();

    let err = fx
        .store
        .commit(CommitParams {
            branch: "v1".into(),
            expected_head: None,
            meta: CommitMeta::by("tests", "commit to tag"),
            operations: vec![CommitOp::Put {
                key: ContentKey::of(&["b"]),
                content: Fixture::content("2"),
                requirement: None,
            }],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}
