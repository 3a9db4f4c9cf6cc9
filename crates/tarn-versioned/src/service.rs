//! The commit service: conflict-checked commits, merge, transplant, diff,
//! and reference-consistent reads.
//!
//! All mutation serialization is the storage adapter's CAS. A commit
//! attempt that loses the race reloads the branch and re-validates its
//! requirements against the new head, up to a bounded retry budget;
//! exhaustion surfaces as `ReferenceConflict`. The service owns no
//! per-reference lock, deliberately: an in-process mutex would be bypassed
//! by every other process sharing the backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tarn_core::{
    Bucket, Clock, Conflict, ConflictKind, ContentKey, Error, ObjId, Result, StorageAdapter,
};

use crate::index::{self, DiffEntry, IndexConfig, IndexEntry, ScanToken};
use crate::log::{CommitEngine, CommitMeta};
use crate::objects::{
    decode_object, hash_object, CommitObj, Content, ContentType, OpKind, Operation, RefKind,
    RefObj, TAG_CONTENT,
};
use crate::refs::{RefCasOutcome, RefManager, RefPage};

/// Tuning knobs for the version store.
#[derive(Debug, Clone)]
pub struct VersionStoreConfig {
    /// CAS retry budget for commit, merge, and transplant.
    pub commit_retries: u32,
    /// Whether tags may be moved after creation.
    pub movable_tags: bool,
    /// Key-index tuning.
    pub index: IndexConfig,
    /// Backoff policy for transient backend failures.
    pub retry: tarn_core::RetryConfig,
}

impl Default for VersionStoreConfig {
    fn default() -> Self {
        Self {
            commit_retries: 5,
            movable_tags: false,
            index: IndexConfig::default(),
            retry: tarn_core::RetryConfig::default(),
        }
    }
}

/// A client-supplied assertion about the prior state of a key, checked at
/// commit time against the branch head the commit lands on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// The key must not exist.
    MustNotExist,
    /// The key must exist.
    MustExist,
    /// The key must currently hold the given content blob.
    HeadMatches(ObjId),
}

/// One keyed operation of a commit request.
#[derive(Debug, Clone)]
pub enum CommitOp {
    /// Store a content blob at the key.
    Put {
        /// The key to write.
        key: ContentKey,
        /// The blob to store; its content ID is assigned on first Put and
        /// preserved across updates.
        content: Content,
        /// Optional prior-state assertion.
        requirement: Option<Requirement>,
    },
    /// Remove the key.
    Delete {
        /// The key to remove.
        key: ContentKey,
        /// Optional prior-state assertion.
        requirement: Option<Requirement>,
    },
    /// Assert on a key without changing it.
    Unchanged {
        /// The key to check.
        key: ContentKey,
        /// The assertion to check.
        requirement: Requirement,
    },
}

impl CommitOp {
    /// Returns the key this operation targets.
    #[must_use]
    pub fn key(&self) -> &ContentKey {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } | Self::Unchanged { key, .. } => key,
        }
    }

    fn requirement(&self) -> Option<&Requirement> {
        match self {
            Self::Put { requirement, .. } | Self::Delete { requirement, .. } => requirement.as_ref(),
            Self::Unchanged { requirement, .. } => Some(requirement),
        }
    }
}

/// A commit request against a branch.
#[derive(Debug, Clone)]
pub struct CommitParams {
    /// The branch to commit to.
    pub branch: String,
    /// When set, the commit fails with `ReferenceConflict` unless the
    /// branch head still equals this value.
    pub expected_head: Option<ObjId>,
    /// Authorship and message.
    pub meta: CommitMeta,
    /// The keyed operations, at most one per key.
    pub operations: Vec<CommitOp>,
}

/// The outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitResult {
    /// The new branch head.
    pub head: ObjId,
    /// The written commit.
    pub commit: CommitObj,
    /// Content IDs assigned to keys that were put without one.
    pub assigned_content_ids: HashMap<ContentKey, String>,
}

/// Per-key resolution strategy for merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Divergent modifications are conflicts.
    Normal,
    /// The source side always wins.
    Force,
    /// Conflicting keys are silently dropped from the merge.
    DropOnConflict,
    /// The source side wins on conflict.
    PreferSource,
    /// The target side wins on conflict.
    PreferTarget,
}

/// A merge request.
#[derive(Debug, Clone)]
pub struct MergeParams {
    /// The reference (or detached commit) to merge from.
    pub source: RefSpec,
    /// The branch to merge into.
    pub target_branch: String,
    /// Default per-key strategy.
    pub default_strategy: MergeStrategy,
    /// Per-key strategy overrides.
    pub key_behaviors: HashMap<ContentKey, MergeStrategy>,
    /// Authorship and message for the merge commit.
    pub meta: CommitMeta,
    /// When true, detect conflicts and report the plan without committing.
    pub dry_run: bool,
}

/// The outcome of a merge or transplant.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The resulting head of the target branch.
    pub head: ObjId,
    /// The commit created, absent for a no-op (or dry-run) merge.
    pub created: Option<ObjId>,
    /// Keys the merge applied.
    pub applied_keys: Vec<ContentKey>,
}

/// A transplant (cherry-pick) request.
#[derive(Debug, Clone)]
pub struct TransplantParams {
    /// The branch to apply the commits to.
    pub target_branch: String,
    /// The source commits, in application order.
    pub commits: Vec<ObjId>,
    /// When true, synthesize one squashed commit instead of one per step.
    pub squash: bool,
    /// Authorship and message for squashed commits.
    pub meta: CommitMeta,
}

/// How a caller names the commit to read or merge from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSpec {
    /// A named reference, optionally pinned to a commit on it.
    Named {
        /// The reference name.
        name: String,
        /// Pinned commit; when absent, the current head is used.
        hash: Option<ObjId>,
    },
    /// A bare commit hash.
    Detached(ObjId),
}

impl RefSpec {
    /// Names a branch (or tag) head.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            hash: None,
        }
    }

    /// Names a commit pinned on a reference.
    #[must_use]
    pub fn named_at(name: impl Into<String>, hash: ObjId) -> Self {
        Self::Named {
            name: name.into(),
            hash: Some(hash),
        }
    }

    /// Names a bare commit.
    #[must_use]
    pub const fn detached(hash: ObjId) -> Self {
        Self::Detached(hash)
    }
}

/// The kind of a resolved reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolvedKind {
    /// A branch head (or a commit pinned on one).
    Branch,
    /// A tag head.
    Tag,
    /// A bare commit hash.
    Detached,
}

/// The reference a read was actually served from.
///
/// `head` is the effective commit hash; every key of a multi-key read is
/// resolved against exactly this commit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResolvedRef {
    /// The reference name, absent for detached reads.
    pub name: Option<String>,
    /// What kind of reference was resolved.
    pub kind: ResolvedKind,
    /// The effective commit.
    pub head: ObjId,
}

/// A keyed content blob returned from a read.
#[derive(Debug, Clone)]
pub struct ContentWithKey {
    /// The key.
    pub key: ContentKey,
    /// The blob stored at the key.
    pub content: Content,
    /// The blob's storage ID.
    pub payload: ObjId,
}

/// The result of a reference-consistent multi-key read.
#[derive(Debug, Clone)]
pub struct ContentsResponse {
    /// The commit all keys were resolved against.
    pub effective: ResolvedRef,
    /// The found contents; missing keys are simply absent.
    pub contents: Vec<ContentWithKey>,
}

/// One entry of a key listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// The key.
    pub key: ContentKey,
    /// The content type stored at the key.
    pub content_type: ContentType,
    /// The stable content ID stored at the key.
    pub content_id: String,
}

/// One page of a key listing.
#[derive(Debug, Clone)]
pub struct EntriesPage {
    /// The reference the listing was served from.
    pub effective: ResolvedRef,
    /// The entries on this page, in key order.
    pub entries: Vec<EntryInfo>,
    /// Token to resume from, absent on the last page.
    pub next: Option<String>,
}

/// One page of a commit log walk.
#[derive(Debug, Clone)]
pub struct LogPage {
    /// Commits, newest first.
    pub commits: Vec<(ObjId, CommitObj)>,
    /// Token to resume from, absent when the root was reached.
    pub next: Option<ObjId>,
}

/// The versioned store facade: commits, merges, transplants, and reads.
pub struct VersionStore<S> {
    store: Arc<S>,
    engine: CommitEngine<S>,
    refs: RefManager<S>,
    config: VersionStoreConfig,
}

impl<S: StorageAdapter> VersionStore<S> {
    /// Creates a version store over the given adapter and clock.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: VersionStoreConfig) -> Self {
        let engine = CommitEngine::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.index.clone(),
            config.retry.clone(),
        );
        let refs = RefManager::new(Arc::clone(&store), clock, config.movable_tags);
        Self {
            store,
            engine,
            refs,
            config,
        }
    }

    /// The reference manager.
    #[must_use]
    pub fn refs(&self) -> &RefManager<S> {
        &self.refs
    }

    /// The commit engine, for direct DAG access.
    #[must_use]
    pub fn engine(&self) -> &CommitEngine<S> {
        &self.engine
    }

    /// Resolves a reference spec to the effective commit.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing reference or detached commit.
    pub async fn resolve(&self, spec: &RefSpec) -> Result<ResolvedRef> {
        match spec {
            RefSpec::Named { name, hash } => {
                let reference = self.refs.get_ref(name).await?;
                let kind = match reference.kind {
                    RefKind::Branch => ResolvedKind::Branch,
                    RefKind::Tag => ResolvedKind::Tag,
                };
                Ok(ResolvedRef {
                    name: Some(reference.name),
                    kind,
                    head: hash.unwrap_or(reference.head),
                })
            }
            RefSpec::Detached(hash) => {
                // Verify the commit exists before handing it out.
                self.engine.fetch_commit(hash).await?;
                Ok(ResolvedRef {
                    name: None,
                    kind: ResolvedKind::Detached,
                    head: *hash,
                })
            }
        }
    }

    /// Commits an ordered set of operations to a branch.
    ///
    /// Per-key requirements are validated against the head the commit
    /// actually lands on; violations aggregate into one `ContentConflict`.
    /// A lost CAS race reloads and re-validates, up to the retry budget.
    ///
    /// # Errors
    ///
    /// `ReferenceConflict` when the expected head does not match or the
    /// retry budget is exhausted; `ContentConflict` on requirement
    /// violations.
    pub async fn commit(&self, params: CommitParams) -> Result<CommitResult> {
        if params.operations.is_empty() {
            return Err(Error::invalid_argument("commit has no operations"));
        }
        let keys: Vec<ContentKey> = params.operations.iter().map(|op| op.key().clone()).collect();

        for attempt in 0..self.config.commit_retries {
            let reference = self.refs.get_ref(&params.branch).await?;
            if reference.kind != RefKind::Branch {
                return Err(Error::invalid_argument(format!(
                    "cannot commit to tag '{}'",
                    params.branch
                )));
            }
            let head = reference.head;
            if let Some(expected) = params.expected_head {
                if expected != head {
                    return Err(Error::reference_conflict(format!(
                        "branch '{}' is at {head}, expected {expected}",
                        params.branch
                    )));
                }
            }

            let current = self.engine.values_at(&head, &keys).await?;
            check_requirements(&params.operations, &current)?;

            let (operations, assigned) = self.build_operations(&params.operations, &current).await?;
            let parent = (!head.is_zero()).then_some(head);
            let (commit_id, commit) = self
                .engine
                .write_commit(parent, Vec::new(), params.meta.clone(), operations)
                .await?;

            match self.refs.update_ref(&params.branch, &head, commit_id).await? {
                RefCasOutcome::Updated(_) => {
                    return Ok(CommitResult {
                        head: commit_id,
                        commit,
                        assigned_content_ids: assigned,
                    });
                }
                RefCasOutcome::Mismatch { current_head } => {
                    tracing::warn!(
                        branch = %params.branch,
                        attempt,
                        observed = %current_head,
                        "commit lost the reference race, retrying"
                    );
                }
            }
        }
        Err(Error::reference_conflict(format!(
            "commit to '{}' exhausted {} retries",
            params.branch, self.config.commit_retries
        )))
    }

    /// Writes content blobs and turns commit ops into log operations.
    async fn build_operations(
        &self,
        ops: &[CommitOp],
        current: &BTreeMap<ContentKey, IndexEntry>,
    ) -> Result<(Vec<Operation>, HashMap<ContentKey, String>)> {
        let mut operations = Vec::with_capacity(ops.len());
        let mut assigned = HashMap::new();
        for op in ops {
            match op {
                CommitOp::Put { key, content, .. } => {
                    let content_id = match content.content_id() {
                        Some(id) => id.to_string(),
                        None => match current.get(key) {
                            // Preserve the stable ID across updates.
                            Some(existing) => existing.content_id.clone(),
                            None => {
                                let id = uuid::Uuid::new_v4().to_string();
                                assigned.insert(key.clone(), id.clone());
                                id
                            }
                        },
                    };
                    let blob = content.clone().with_content_id(content_id.clone());
                    let (payload, bytes) = hash_object(TAG_CONTENT, &blob)?;
                    self.store
                        .put(Bucket::ContentAttachments, &payload, bytes)
                        .await
                        .map_err(|e| {
                            Error::internal(format!("failed to write content blob: {e}"))
                        })?;
                    operations.push(Operation {
                        key: key.clone(),
                        kind: OpKind::Put,
                        payload: Some(payload),
                        content_id: Some(content_id),
                        content_type: Some(blob.content_type()),
                    });
                }
                CommitOp::Delete { key, .. } => operations.push(Operation {
                    key: key.clone(),
                    kind: OpKind::Delete,
                    payload: None,
                    content_id: None,
                    content_type: None,
                }),
                CommitOp::Unchanged { key, .. } => operations.push(Operation {
                    key: key.clone(),
                    kind: OpKind::Unchanged,
                    payload: None,
                    content_id: None,
                    content_type: None,
                }),
            }
        }
        Ok((operations, assigned))
    }

    /// Merges `source` into `target_branch` using a three-way diff from
    /// their lowest common ancestor.
    ///
    /// Merging a source that is already an ancestor of the target is a
    /// no-op. The merge commit carries `parents = [target_head,
    /// source_head]`.
    ///
    /// # Errors
    ///
    /// `ContentConflict` when the default strategy leaves conflicts;
    /// `ReferenceConflict` when the CAS budget is exhausted.
    pub async fn merge(&self, params: MergeParams) -> Result<MergeResult> {
        for _attempt in 0..self.config.commit_retries {
            let target = self.refs.get_ref(&params.target_branch).await?;
            if target.kind != RefKind::Branch {
                return Err(Error::invalid_argument(format!(
                    "cannot merge into tag '{}'",
                    params.target_branch
                )));
            }
            let source = self.resolve(&params.source).await?;
            if source.head.is_zero()
                || self.engine.is_ancestor(&source.head, &target.head).await?
            {
                return Ok(MergeResult {
                    head: target.head,
                    created: None,
                    applied_keys: Vec::new(),
                });
            }

            let base = if target.head.is_zero() {
                None
            } else {
                self.engine.common_ancestor(&source.head, &target.head).await?
            };
            let base_root = match &base {
                Some(base_id) => self.engine.root_of(base_id).await?,
                None => None,
            };
            let source_root = self.engine.root_of(&source.head).await?;
            let target_root = self.engine.root_of(&target.head).await?;

            let source_changes = changes_by_key(
                index::diff(&*self.store, base_root.as_ref(), source_root.as_ref()).await?,
            );
            let target_changes = changes_by_key(
                index::diff(&*self.store, base_root.as_ref(), target_root.as_ref()).await?,
            );

            let mut operations = Vec::new();
            let mut applied_keys = Vec::new();
            let mut conflicts = Vec::new();
            for (key, source_change) in source_changes {
                match target_changes.get(&key) {
                    None => {
                        applied_keys.push(key.clone());
                        operations.push(change_to_operation(key, source_change));
                    }
                    Some(target_change) if same_change(target_change, &source_change) => {}
                    Some(_) => {
                        let strategy = params
                            .key_behaviors
                            .get(&key)
                            .copied()
                            .unwrap_or(params.default_strategy);
                        match strategy {
                            MergeStrategy::Normal => conflicts.push(Conflict::new(
                                key.clone(),
                                ConflictKind::PayloadDiffers,
                                format!("values of existing and expected content for key '{key}' are different"),
                            )),
                            MergeStrategy::Force | MergeStrategy::PreferSource => {
                                applied_keys.push(key.clone());
                                operations.push(change_to_operation(key, source_change));
                            }
                            MergeStrategy::DropOnConflict | MergeStrategy::PreferTarget => {}
                        }
                    }
                }
            }
            if !conflicts.is_empty() {
                return Err(Error::content_conflict(conflicts));
            }
            if operations.is_empty() || params.dry_run {
                return Ok(MergeResult {
                    head: target.head,
                    created: None,
                    applied_keys,
                });
            }

            let parent = (!target.head.is_zero()).then_some(target.head);
            let (merge_id, _) = self
                .engine
                .write_commit(parent, vec![source.head], params.meta.clone(), operations)
                .await?;
            match self
                .refs
                .update_ref(&params.target_branch, &target.head, merge_id)
                .await?
            {
                RefCasOutcome::Updated(_) => {
                    return Ok(MergeResult {
                        head: merge_id,
                        created: Some(merge_id),
                        applied_keys,
                    });
                }
                RefCasOutcome::Mismatch { current_head } => {
                    tracing::warn!(
                        target = %params.target_branch,
                        observed = %current_head,
                        "merge lost the reference race, retrying"
                    );
                }
            }
        }
        Err(Error::reference_conflict(format!(
            "merge into '{}' exhausted {} retries",
            params.target_branch, self.config.commit_retries
        )))
    }

    /// Applies an ordered list of source commits onto a branch
    /// (cherry-pick), either one synthesized commit per step or one
    /// squashed commit.
    ///
    /// # Errors
    ///
    /// `ContentConflict` when a step diverges from the target;
    /// `ReferenceConflict` when the CAS budget is exhausted.
    pub async fn transplant(&self, params: TransplantParams) -> Result<MergeResult> {
        if params.commits.is_empty() {
            return Err(Error::invalid_argument("transplant has no source commits"));
        }
        'retry: for _attempt in 0..self.config.commit_retries {
            let target = self.refs.get_ref(&params.target_branch).await?;
            if target.kind != RefKind::Branch {
                return Err(Error::invalid_argument(format!(
                    "cannot transplant onto tag '{}'",
                    params.target_branch
                )));
            }
            let head = target.head;
            let mut rolling = head;
            let mut squashed: BTreeMap<ContentKey, Operation> = BTreeMap::new();
            let mut applied_keys = Vec::new();
            let mut conflicts = Vec::new();

            for source_id in &params.commits {
                let source = self.engine.fetch_commit(source_id).await?;
                let base = source.parent().copied().unwrap_or(ObjId::ZERO);
                let mut step_ops = Vec::new();
                for op in &source.operations {
                    if op.kind == OpKind::Unchanged {
                        continue;
                    }
                    let base_entry = self.engine.value_at(&base, &op.key).await?;
                    let target_entry = if params.squash {
                        match squashed.get(&op.key) {
                            Some(acc) => operation_result(acc),
                            None => self.engine.value_at(&rolling, &op.key).await?,
                        }
                    } else {
                        self.engine.value_at(&rolling, &op.key).await?
                    };
                    let result_entry = operation_result(op);
                    if entry_payload(&target_entry) == entry_payload(&result_entry) {
                        // The target already holds the commit's outcome.
                        continue;
                    }
                    if entry_payload(&base_entry) != entry_payload(&target_entry) {
                        conflicts.push(Conflict::new(
                            op.key.clone(),
                            ConflictKind::PayloadDiffers,
                            format!("values of existing and expected content for key '{}' are different", op.key),
                        ));
                        continue;
                    }
                    applied_keys.push(op.key.clone());
                    if params.squash {
                        squashed.insert(op.key.clone(), op.clone());
                    } else {
                        step_ops.push(op.clone());
                    }
                }
                if !params.squash && conflicts.is_empty() && !step_ops.is_empty() {
                    let meta = CommitMeta {
                        author: source.author.clone(),
                        committer: params.meta.committer.clone(),
                        message: source.message.clone(),
                        metadata: source.metadata.clone(),
                    };
                    let parent = (!rolling.is_zero()).then_some(rolling);
                    let (next, _) = self
                        .engine
                        .write_commit(parent, Vec::new(), meta, step_ops)
                        .await?;
                    rolling = next;
                }
            }
            if !conflicts.is_empty() {
                return Err(Error::content_conflict(conflicts));
            }

            let new_head = if params.squash {
                if squashed.is_empty() {
                    return Ok(MergeResult {
                        head,
                        created: None,
                        applied_keys,
                    });
                }
                let parent = (!head.is_zero()).then_some(head);
                let (id, _) = self
                    .engine
                    .write_commit(
                        parent,
                        Vec::new(),
                        params.meta.clone(),
                        squashed.into_values().collect(),
                    )
                    .await?;
                id
            } else {
                if rolling == head {
                    return Ok(MergeResult {
                        head,
                        created: None,
                        applied_keys,
                    });
                }
                rolling
            };

            match self
                .refs
                .update_ref(&params.target_branch, &head, new_head)
                .await?
            {
                RefCasOutcome::Updated(_) => {
                    return Ok(MergeResult {
                        head: new_head,
                        created: Some(new_head),
                        applied_keys,
                    });
                }
                RefCasOutcome::Mismatch { .. } => continue 'retry,
            }
        }
        Err(Error::reference_conflict(format!(
            "transplant onto '{}' exhausted {} retries",
            params.target_branch, self.config.commit_retries
        )))
    }

    /// Computes the keyed differences between two references.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when either reference is missing.
    pub async fn diff(&self, from: &RefSpec, to: &RefSpec) -> Result<Vec<DiffEntry>> {
        let from = self.resolve(from).await?;
        let to = self.resolve(to).await?;
        let from_root = if from.head.is_zero() {
            None
        } else {
            self.engine.root_of(&from.head).await?
        };
        let to_root = if to.head.is_zero() {
            None
        } else {
            self.engine.root_of(&to.head).await?
        };
        index::diff(&*self.store, from_root.as_ref(), to_root.as_ref()).await
    }

    /// Reads several keys consistently against one resolved commit.
    ///
    /// The reference is resolved exactly once; the returned
    /// [`ResolvedRef::head`] is the commit every key was served from.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing reference; missing keys are simply
    /// absent from the result.
    pub async fn get_contents(
        &self,
        spec: &RefSpec,
        keys: &[ContentKey],
    ) -> Result<ContentsResponse> {
        let effective = self.resolve(spec).await?;
        let found = if effective.head.is_zero() {
            BTreeMap::new()
        } else {
            self.engine.values_at(&effective.head, keys).await?
        };
        let ordered: Vec<(ContentKey, IndexEntry)> = found.into_iter().collect();
        let payload_ids: Vec<ObjId> = ordered.iter().map(|(_, e)| e.payload).collect();
        let blobs = self
            .store
            .get_many(Bucket::ContentAttachments, &payload_ids)
            .await
            .map_err(|e| Error::internal(format!("failed to read content blobs: {e}")))?;
        let mut contents = Vec::with_capacity(ordered.len());
        for ((key, entry), bytes) in ordered.into_iter().zip(blobs) {
            let bytes = bytes.ok_or_else(|| {
                Error::internal(format!("content blob {} is missing", entry.payload))
            })?;
            contents.push(ContentWithKey {
                key,
                content: decode_object::<Content>("content blob", &bytes)?,
                payload: entry.payload,
            });
        }
        Ok(ContentsResponse {
            effective,
            contents,
        })
    }

    /// Reads one key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the key has no content at the reference.
    pub async fn get_content(
        &self,
        spec: &RefSpec,
        key: &ContentKey,
    ) -> Result<(ResolvedRef, ContentWithKey)> {
        let mut response = self.get_contents(spec, std::slice::from_ref(key)).await?;
        match response.contents.pop() {
            Some(content) => Ok((response.effective, content)),
            None => Err(Error::not_found(format!("key '{key}'"))),
        }
    }

    /// Walks the commit log of a reference, newest first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing reference.
    pub async fn commit_log(
        &self,
        spec: &RefSpec,
        token: Option<ObjId>,
        limit: usize,
    ) -> Result<LogPage> {
        let effective = self.resolve(spec).await?;
        if effective.head.is_zero() {
            return Ok(LogPage {
                commits: Vec::new(),
                next: None,
            });
        }
        let (commits, next) = self.engine.log_page(&effective.head, token, limit).await?;
        Ok(LogPage { commits, next })
    }

    /// Lists the keys live at a reference, in key order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a token that does not belong to this
    /// reference's index.
    pub async fn entries(
        &self,
        spec: &RefSpec,
        prefix: Option<&ContentKey>,
        token: Option<&str>,
        limit: usize,
    ) -> Result<EntriesPage> {
        let effective = self.resolve(spec).await?;
        let root = if effective.head.is_zero() {
            None
        } else {
            self.engine.root_of(&effective.head).await?
        };
        let token = token.map(str::parse::<ScanToken>).transpose()?;
        let (found, next) = index::scan(&*self.store, root.as_ref(), prefix, token, limit).await?;
        Ok(EntriesPage {
            effective,
            entries: found
                .into_iter()
                .map(|(key, entry)| EntryInfo {
                    key,
                    content_type: entry.content_type,
                    content_id: entry.content_id,
                })
                .collect(),
            next: next.map(|t| t.to_string()),
        })
    }

    /// Lists references; see [`RefManager::list_refs`].
    ///
    /// # Errors
    ///
    /// Returns `Internal` on storage failures.
    pub async fn list_refs(
        &self,
        filter_prefix: Option<&str>,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<RefPage> {
        self.refs.list_refs(filter_prefix, page_token, limit).await
    }

    /// Looks up a reference by name; see [`RefManager::get_ref`].
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the reference does not exist.
    pub async fn get_ref(&self, name: &str) -> Result<RefObj> {
        self.refs.get_ref(name).await
    }
}

fn check_requirements(
    ops: &[CommitOp],
    current: &BTreeMap<ContentKey, IndexEntry>,
) -> Result<()> {
    let mut conflicts = Vec::new();
    for op in ops {
        let key = op.key();
        let existing = current.get(key);
        match op.requirement() {
            None => {}
            Some(Requirement::MustNotExist) => {
                if existing.is_some() {
                    conflicts.push(Conflict::new(
                        key.clone(),
                        ConflictKind::KeyExists,
                        format!("key '{key}' already exists"),
                    ));
                }
            }
            Some(Requirement::MustExist) => {
                if existing.is_none() {
                    conflicts.push(Conflict::new(
                        key.clone(),
                        ConflictKind::KeyDoesNotExist,
                        format!("key '{key}' does not exist"),
                    ));
                }
            }
            Some(Requirement::HeadMatches(expected)) => match existing {
                None => conflicts.push(Conflict::new(
                    key.clone(),
                    ConflictKind::KeyDoesNotExist,
                    format!("key '{key}' does not exist"),
                )),
                Some(entry) if entry.payload != *expected => conflicts.push(Conflict::new(
                    key.clone(),
                    ConflictKind::PayloadDiffers,
                    format!("payload of key '{key}' differs from the expected state"),
                )),
                Some(_) => {}
            },
        }
    }
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(Error::content_conflict(conflicts))
    }
}

fn changes_by_key(diff: Vec<DiffEntry>) -> BTreeMap<ContentKey, Option<IndexEntry>> {
    diff.into_iter().map(|entry| (entry.key, entry.to)).collect()
}

fn same_change(a: &Option<IndexEntry>, b: &Option<IndexEntry>) -> bool {
    entry_payload(a) == entry_payload(b)
}

fn entry_payload(entry: &Option<IndexEntry>) -> Option<ObjId> {
    entry.as_ref().map(|e| e.payload)
}

fn change_to_operation(key: ContentKey, change: Option<IndexEntry>) -> Operation {
    match change {
        Some(entry) => Operation {
            key,
            kind: OpKind::Put,
            payload: Some(entry.payload),
            content_id: Some(entry.content_id),
            content_type: Some(entry.content_type),
        },
        None => Operation {
            key,
            kind: OpKind::Delete,
            payload: None,
            content_id: None,
            content_type: None,
        },
    }
}

fn operation_result(op: &Operation) -> Option<IndexEntry> {
    match op.kind {
        OpKind::Put => Some(IndexEntry {
            content_id: op.content_id.clone().unwrap_or_default(),
            payload: op.payload.unwrap_or(ObjId::ZERO),
            content_type: op.content_type.unwrap_or(ContentType::IcebergTable),
        }),
        OpKind::Delete | OpKind::Unchanged => None,
    }
}
