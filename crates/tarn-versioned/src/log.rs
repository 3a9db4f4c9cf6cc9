//! Commit construction and DAG traversal.
//!
//! Writing a commit is deterministic: load the parent's key-index root,
//! apply the operations in listed order, serialize, hash, then write the
//! new index segments followed by the commit itself. Re-writing an existing
//! commit with identical bytes is a success, so crashed writers can retry
//! blindly.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use tarn_core::store::with_retry;
use tarn_core::{Bucket, Clock, ContentKey, Error, ObjId, Result, RetryConfig, StorageAdapter};

use crate::index::{self, IndexConfig, IndexEntry};
use crate::objects::{decode_object, hash_object, CommitObj, Operation, TAG_COMMIT};

/// Authorship and message metadata for a new commit.
#[derive(Debug, Clone, Default)]
pub struct CommitMeta {
    /// Who authored the change.
    pub author: String,
    /// Who committed the change.
    pub committer: String,
    /// Commit message.
    pub message: String,
    /// Free-form commit metadata.
    pub metadata: BTreeMap<String, String>,
}

impl CommitMeta {
    /// Creates metadata with the same author and committer.
    #[must_use]
    pub fn by(author: impl Into<String>, message: impl Into<String>) -> Self {
        let author = author.into();
        Self {
            committer: author.clone(),
            author,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Builds and fetches commits against a storage adapter.
pub struct CommitEngine<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    index_config: IndexConfig,
    retry: RetryConfig,
}

impl<S: StorageAdapter> CommitEngine<S> {
    /// Creates an engine over the given adapter.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        index_config: IndexConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            clock,
            index_config,
            retry,
        }
    }

    /// Writes a new commit on top of `parent` (`None` for a root commit).
    ///
    /// `extra_parents` become the additional parents of a merge commit.
    /// New index segments are written before the commit so a reader never
    /// observes a commit with dangling index pointers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when two operations target the same key,
    /// and `Internal` on storage failures.
    pub async fn write_commit(
        &self,
        parent: Option<ObjId>,
        extra_parents: Vec<ObjId>,
        meta: CommitMeta,
        operations: Vec<Operation>,
    ) -> Result<(ObjId, CommitObj)> {
        let mut seen: HashSet<&ContentKey> = HashSet::new();
        for op in &operations {
            if !seen.insert(&op.key) {
                return Err(Error::invalid_argument(format!(
                    "duplicate operation for key {}",
                    op.key
                )));
            }
        }

        let parent_root = match &parent {
            Some(parent_id) => self.fetch_commit(parent_id).await?.key_index_root,
            None => None,
        };
        let (key_index_root, segment_writes) =
            index::apply(&*self.store, &self.index_config, parent_root.as_ref(), &operations)
                .await?;

        let mut parents: Vec<ObjId> = Vec::with_capacity(1 + extra_parents.len());
        if let Some(parent_id) = parent {
            parents.push(parent_id);
        }
        parents.extend(extra_parents);

        let commit = CommitObj {
            parents,
            author: meta.author,
            committer: meta.committer,
            commit_time_ms: self.clock.now_millis(),
            message: meta.message,
            operations,
            key_index_root,
            metadata: meta.metadata,
        };
        let (id, bytes) = hash_object(TAG_COMMIT, &commit)?;

        for (segment_id, segment_bytes) in segment_writes {
            self.store
                .put(Bucket::KeyIndexSegments, &segment_id, segment_bytes)
                .await
                .map_err(|e| Error::internal(format!("failed to write index segment: {e}")))?;
        }
        self.store
            .put(Bucket::Commits, &id, bytes)
            .await
            .map_err(|e| Error::internal(format!("failed to write commit {id}: {e}")))?;

        tracing::debug!(commit = %id, ops = commit.operations.len(), "wrote commit");
        Ok((id, commit))
    }

    /// Fetches a commit by ID, retrying transient backend failures.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the commit does not exist.
    pub async fn fetch_commit(&self, id: &ObjId) -> Result<CommitObj> {
        let fetched = with_retry(&self.retry, &*self.clock, "fetch-commit", || {
            self.store.get(Bucket::Commits, id)
        })
        .await;
        match fetched {
            Ok(bytes) => decode_object("commit", &bytes),
            Err(tarn_core::StoreError::NotFound { .. }) => {
                Err(Error::not_found(format!("commit {id}")))
            }
            Err(e) => Err(Error::internal(format!("failed to read commit {id}: {e}"))),
        }
    }

    /// Fetches many commits, preserving order; misses are `None`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on storage failures.
    pub async fn fetch_many(&self, ids: &[ObjId]) -> Result<Vec<Option<CommitObj>>> {
        let loaded = self
            .store
            .get_many(Bucket::Commits, ids)
            .await
            .map_err(|e| Error::internal(format!("failed to read commits: {e}")))?;
        loaded
            .into_iter()
            .map(|bytes| bytes.map(|b| decode_object("commit", &b)).transpose())
            .collect()
    }

    /// Returns the key-index root at `head` (`ObjId::ZERO` means empty).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the head commit does not exist.
    pub async fn root_of(&self, head: &ObjId) -> Result<Option<ObjId>> {
        if head.is_zero() {
            return Ok(None);
        }
        Ok(self.fetch_commit(head).await?.key_index_root)
    }

    /// Resolves a single key at `head`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the head commit does not exist.
    pub async fn value_at(&self, head: &ObjId, key: &ContentKey) -> Result<Option<IndexEntry>> {
        let root = self.root_of(head).await?;
        index::lookup(&*self.store, root.as_ref(), key).await
    }

    /// Resolves many keys at `head`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the head commit does not exist.
    pub async fn values_at(
        &self,
        head: &ObjId,
        keys: &[ContentKey],
    ) -> Result<BTreeMap<ContentKey, IndexEntry>> {
        let root = self.root_of(head).await?;
        index::lookup_many(&*self.store, root.as_ref(), keys).await
    }

    /// Returns true when `ancestor` is reachable from `descendant`
    /// (including equality).
    ///
    /// # Errors
    ///
    /// Returns `Internal` on storage failures.
    pub async fn is_ancestor(&self, ancestor: &ObjId, descendant: &ObjId) -> Result<bool> {
        if ancestor.is_zero() {
            return Ok(true);
        }
        if descendant.is_zero() {
            return Ok(false);
        }
        let mut frontier = VecDeque::from([*descendant]);
        let mut visited = HashSet::new();
        while let Some(current) = frontier.pop_front() {
            if current == *ancestor {
                return Ok(true);
            }
            if !visited.insert(current) {
                continue;
            }
            let commit = self.fetch_commit(&current).await?;
            frontier.extend(commit.parents.iter().copied());
        }
        Ok(false)
    }

    /// Finds the lowest common ancestor of two commits, or `None` when the
    /// histories are unrelated.
    ///
    /// Both frontiers expand breadth-first in lockstep; the first commit
    /// seen from both sides wins.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on storage failures.
    pub async fn common_ancestor(&self, a: &ObjId, b: &ObjId) -> Result<Option<ObjId>> {
        if a.is_zero() || b.is_zero() {
            return Ok(None);
        }
        let mut seen_a: HashSet<ObjId> = HashSet::from([*a]);
        let mut seen_b: HashSet<ObjId> = HashSet::from([*b]);
        let mut frontier_a = VecDeque::from([*a]);
        let mut frontier_b = VecDeque::from([*b]);

        loop {
            if let Some(current) = frontier_a.pop_front() {
                if seen_b.contains(&current) {
                    return Ok(Some(current));
                }
                for parent in self.fetch_commit(&current).await?.parents {
                    if seen_a.insert(parent) {
                        frontier_a.push_back(parent);
                    }
                }
            }
            if let Some(current) = frontier_b.pop_front() {
                if seen_a.contains(&current) {
                    return Ok(Some(current));
                }
                for parent in self.fetch_commit(&current).await?.parents {
                    if seen_b.insert(parent) {
                        frontier_b.push_back(parent);
                    }
                }
            }
            if frontier_a.is_empty() && frontier_b.is_empty() {
                return Ok(None);
            }
        }
    }

    /// Walks the first-parent chain from `head`, returning up to `limit`
    /// commits and a token to resume from.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when a commit in the chain is missing.
    pub async fn log_page(
        &self,
        head: &ObjId,
        token: Option<ObjId>,
        limit: usize,
    ) -> Result<(Vec<(ObjId, CommitObj)>, Option<ObjId>)> {
        let mut out = Vec::new();
        let mut current = token.unwrap_or(*head);
        while !current.is_zero() {
            if out.len() == limit {
                return Ok((out, Some(current)));
            }
            let commit = self.fetch_commit(&current).await?;
            let next = commit.parent().copied();
            out.push((current, commit));
            match next {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok((out, None))
    }
}
