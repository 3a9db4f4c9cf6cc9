//! Named references: branches and tags.
//!
//! Every reference lives in its own CAS slot in the `refs` bucket, keyed by
//! a hash of its name. All mutation goes through compare-and-swap; the
//! engine holds no per-reference lock, so multi-process deployments contend
//! only on the backend.
//!
//! Listing is served from a name registry in the `ref_names` bucket. The
//! registry is an eventually-consistent index maintained alongside
//! create/delete; readers tolerate stale entries and re-verify every name
//! through `get_ref`.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

use tarn_core::{Bucket, CasOutcome, Clock, Error, ObjId, Result, StorageAdapter, StoreError};

use crate::objects::{decode_object, RefKind, RefNameRegistry, RefObj, RepositoryDesc};

/// Domain tag for reference slot IDs.
const TAG_REF_NAME: &str = "ref-name";

/// Domain tag for singleton slots.
const TAG_SINGLETON: &str = "singleton";

/// Attempts to fold a registry update before giving up and leaving it to
/// the next writer. Stale registries are tolerated by readers.
const REGISTRY_ATTEMPTS: u32 = 5;

/// Outcome of a reference CAS update.
#[derive(Debug, Clone)]
pub enum RefCasOutcome {
    /// The reference now points at the new head.
    Updated(RefObj),
    /// The head moved underneath the caller.
    Mismatch {
        /// The head observed at the time of the attempt.
        current_head: ObjId,
    },
}

/// One page of a reference listing.
#[derive(Debug, Clone)]
pub struct RefPage {
    /// The references on this page.
    pub refs: Vec<RefObj>,
    /// Token to resume from, absent on the last page.
    pub next: Option<String>,
}

/// Manages reference slots and the repository descriptor.
pub struct RefManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    movable_tags: bool,
}

impl<S: StorageAdapter> RefManager<S> {
    /// Creates a manager over the given adapter.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, movable_tags: bool) -> Self {
        Self {
            store,
            clock,
            movable_tags,
        }
    }

    fn ref_slot(name: &str) -> ObjId {
        ObjId::hash(TAG_REF_NAME, name.as_bytes())
    }

    fn registry_slot() -> ObjId {
        ObjId::hash(TAG_SINGLETON, b"ref-names")
    }

    fn repo_slot() -> ObjId {
        ObjId::hash(TAG_SINGLETON, b"repo-desc")
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::internal(format!("failed to serialize reference: {e}")))
    }

    /// Initializes the repository: writes the descriptor and creates the
    /// empty default branch.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when the repository is already initialized.
    pub async fn initialize(
        &self,
        default_branch: &str,
        properties: BTreeMap<String, String>,
    ) -> Result<RepositoryDesc> {
        let desc = RepositoryDesc {
            default_branch: default_branch.to_string(),
            created_at_ms: self.clock.now_millis(),
            movable_tags: self.movable_tags,
            properties,
        };
        let outcome = self
            .store
            .compare_and_swap(
                Bucket::RepoDesc,
                &Self::repo_slot(),
                None,
                Some(Self::encode(&desc)?),
            )
            .await
            .map_err(|e| Error::internal(format!("failed to write repository descriptor: {e}")))?;
        if !outcome.swapped() {
            return Err(Error::already_exists("repository is already initialized"));
        }
        self.create_ref(default_branch, RefKind::Branch, ObjId::ZERO)
            .await?;
        tracing::info!(default_branch, "initialized repository");
        Ok(desc)
    }

    /// Reads the repository descriptor.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the repository is not initialized.
    pub async fn repo_desc(&self) -> Result<RepositoryDesc> {
        match self.store.get(Bucket::RepoDesc, &Self::repo_slot()).await {
            Ok(bytes) => decode_object("repository descriptor", &bytes),
            Err(StoreError::NotFound { .. }) => {
                Err(Error::not_found("repository is not initialized"))
            }
            Err(e) => Err(Error::internal(format!(
                "failed to read repository descriptor: {e}"
            ))),
        }
    }

    /// Applies `mutate` to the repository descriptor via CAS, retrying a
    /// bounded number of times when a concurrent writer interferes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the repository is not initialized and
    /// `ReferenceConflict` when every CAS round is lost.
    pub async fn update_desc<F>(&self, mutate: F) -> Result<RepositoryDesc>
    where
        F: Fn(&mut RepositoryDesc),
    {
        for _ in 0..REGISTRY_ATTEMPTS {
            let slot = Self::repo_slot();
            let current_bytes = match self.store.get(Bucket::RepoDesc, &slot).await {
                Ok(bytes) => bytes,
                Err(StoreError::NotFound { .. }) => {
                    return Err(Error::not_found("repository is not initialized"));
                }
                Err(e) => {
                    return Err(Error::internal(format!(
                        "failed to read repository descriptor: {e}"
                    )));
                }
            };
            let mut desc: RepositoryDesc = decode_object("repository descriptor", &current_bytes)?;
            mutate(&mut desc);
            let outcome = self
                .store
                .compare_and_swap(
                    Bucket::RepoDesc,
                    &slot,
                    Some(current_bytes),
                    Some(Self::encode(&desc)?),
                )
                .await
                .map_err(|e| {
                    Error::internal(format!("failed to update repository descriptor: {e}"))
                })?;
            if outcome.swapped() {
                return Ok(desc);
            }
        }
        Err(Error::reference_conflict(
            "repository descriptor update lost every CAS round",
        ))
    }

    /// Creates a reference pointing at `head`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when the name is taken and
    /// `InvalidArgument` for a malformed name.
    pub async fn create_ref(&self, name: &str, kind: RefKind, head: ObjId) -> Result<RefObj> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::invalid_argument(format!(
                "invalid reference name '{name}'"
            )));
        }
        let reference = RefObj {
            name: name.to_string(),
            kind,
            head,
            created_at_ms: self.clock.now_millis(),
        };
        let outcome = self
            .store
            .compare_and_swap(
                Bucket::Refs,
                &Self::ref_slot(name),
                None,
                Some(Self::encode(&reference)?),
            )
            .await
            .map_err(|e| Error::internal(format!("failed to create reference: {e}")))?;
        if !outcome.swapped() {
            return Err(Error::already_exists(format!(
                "reference '{name}' already exists"
            )));
        }
        self.update_registry(name, true).await;
        Ok(reference)
    }

    /// Looks up a reference by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the reference does not exist.
    pub async fn get_ref(&self, name: &str) -> Result<RefObj> {
        match self.store.get(Bucket::Refs, &Self::ref_slot(name)).await {
            Ok(bytes) => decode_object("reference", &bytes),
            Err(StoreError::NotFound { .. }) => {
                Err(Error::not_found(format!("reference '{name}'")))
            }
            Err(e) => Err(Error::internal(format!(
                "failed to read reference '{name}': {e}"
            ))),
        }
    }

    /// Advances a reference from `expected_head` to `new_head` via CAS.
    ///
    /// A mismatch is a normal outcome; the commit service decides whether
    /// to retry. Tags reject updates unless the repository allows movable
    /// tags.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing reference and `ReferenceConflict`
    /// for an immutable tag.
    pub async fn update_ref(
        &self,
        name: &str,
        expected_head: &ObjId,
        new_head: ObjId,
    ) -> Result<RefCasOutcome> {
        let slot = Self::ref_slot(name);
        let current_bytes = match self.store.get(Bucket::Refs, &slot).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => {
                return Err(Error::not_found(format!("reference '{name}'")));
            }
            Err(e) => {
                return Err(Error::internal(format!(
                    "failed to read reference '{name}': {e}"
                )));
            }
        };
        let current: RefObj = decode_object("reference", &current_bytes)?;
        if current.kind == RefKind::Tag && !self.movable_tags {
            return Err(Error::reference_conflict(format!(
                "tag '{name}' is immutable"
            )));
        }
        if current.head != *expected_head {
            return Ok(RefCasOutcome::Mismatch {
                current_head: current.head,
            });
        }
        let updated = RefObj {
            head: new_head,
            ..current
        };
        let outcome = self
            .store
            .compare_and_swap(
                Bucket::Refs,
                &slot,
                Some(current_bytes),
                Some(Self::encode(&updated)?),
            )
            .await
            .map_err(|e| Error::internal(format!("failed to update reference '{name}': {e}")))?;
        match outcome {
            CasOutcome::Swapped => Ok(RefCasOutcome::Updated(updated)),
            CasOutcome::Mismatch { actual } => {
                let current_head = match actual {
                    Some(bytes) => decode_object::<RefObj>("reference", &bytes)?.head,
                    None => ObjId::ZERO,
                };
                Ok(RefCasOutcome::Mismatch { current_head })
            }
        }
    }

    /// Deletes a reference whose head is still `expected_head`.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceConflict` when the head moved and `NotFound` for
    /// a missing reference.
    pub async fn delete_ref(&self, name: &str, expected_head: &ObjId) -> Result<()> {
        let slot = Self::ref_slot(name);
        let current_bytes = match self.store.get(Bucket::Refs, &slot).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => {
                return Err(Error::not_found(format!("reference '{name}'")));
            }
            Err(e) => {
                return Err(Error::internal(format!(
                    "failed to read reference '{name}': {e}"
                )));
            }
        };
        let current: RefObj = decode_object("reference", &current_bytes)?;
        if current.head != *expected_head {
            return Err(Error::reference_conflict(format!(
                "reference '{name}' moved to {}",
                current.head
            )));
        }
        let outcome = self
            .store
            .compare_and_swap(Bucket::Refs, &slot, Some(current_bytes), None)
            .await
            .map_err(|e| Error::internal(format!("failed to delete reference '{name}': {e}")))?;
        if !outcome.swapped() {
            return Err(Error::reference_conflict(format!(
                "reference '{name}' changed during delete"
            )));
        }
        self.update_registry(name, false).await;
        Ok(())
    }

    /// Lists references, paginated and optionally filtered by name prefix.
    ///
    /// Names come from the registry; each one is re-verified through
    /// `get_ref`, so entries deleted by a concurrent writer are skipped.
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
        let registry = self.load_registry().await?;
        let mut refs = Vec::new();
        let mut next = None;
        for name in &registry.names {
            if let Some(prefix) = filter_prefix {
                if !name.starts_with(prefix) {
                    continue;
                }
            }
            if let Some(token) = page_token {
                if name.as_str() <= token {
                    continue;
                }
            }
            if refs.len() == limit {
                next = refs.last().map(|r: &RefObj| r.name.clone());
                break;
            }
            match self.get_ref(name).await {
                Ok(reference) => refs.push(reference),
                // Stale registry entry; the refs bucket is authoritative.
                Err(Error::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(RefPage { refs, next })
    }

    async fn load_registry(&self) -> Result<RefNameRegistry> {
        match self.store.get(Bucket::RefNames, &Self::registry_slot()).await {
            Ok(bytes) => decode_object("reference-name registry", &bytes),
            Err(StoreError::NotFound { .. }) => Ok(RefNameRegistry::default()),
            Err(e) => Err(Error::internal(format!(
                "failed to read reference-name registry: {e}"
            ))),
        }
    }

    /// Folds a name into (or out of) the registry, best-effort.
    ///
    /// Losing every CAS round leaves a stale registry, which readers
    /// already tolerate, so this never fails the caller's operation.
    async fn update_registry(&self, name: &str, add: bool) {
        for _ in 0..REGISTRY_ATTEMPTS {
            let slot = Self::registry_slot();
            let current = self.store.get(Bucket::RefNames, &slot).await;
            let (expected, mut registry) = match current {
                Ok(bytes) => match decode_object::<RefNameRegistry>("registry", &bytes) {
                    Ok(registry) => (Some(bytes), registry),
                    Err(_) => (Some(bytes), RefNameRegistry::default()),
                },
                Err(StoreError::NotFound { .. }) => (None, RefNameRegistry::default()),
                Err(_) => break,
            };
            let changed = if add {
                registry.names.insert(name.to_string())
            } else {
                registry.names.remove(name)
            };
            if !changed {
                return;
            }
            let Ok(encoded) = Self::encode(&registry) else {
                break;
            };
            match self
                .store
                .compare_and_swap(Bucket::RefNames, &slot, expected, Some(encoded))
                .await
            {
                Ok(CasOutcome::Swapped) => return,
                Ok(CasOutcome::Mismatch { .. }) => continue,
                Err(_) => break,
            }
        }
        tracing::warn!(name, add, "reference-name registry update lost; readers re-verify");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_core::{ManualClock, MemoryAdapter};

    fn manager() -> RefManager<MemoryAdapter> {
        RefManager::new(
            Arc::new(MemoryAdapter::new()),
            Arc::new(ManualClock::new()),
            false,
        )
    }

    fn commit_id(n: u8) -> ObjId {
        ObjId::hash("commit", &[n])
    }

    #[tokio::test]
    async fn create_then_get_roundtrip() {
        let refs = manager();
        let created = refs
            .create_ref("main", RefKind::Branch, commit_id(1))
            .await
            .unwrap();
        let loaded = refs.get_ref("main").await.unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.head, commit_id(1));
    }

    #[tokio::test]
    async fn duplicate_create_fails() {
        let refs = manager();
        refs.create_ref("main", RefKind::Branch, ObjId::ZERO)
            .await
            .unwrap();
        let err = refs
            .create_ref("main", RefKind::Branch, commit_id(9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let refs = manager();
        assert!(refs.create_ref("", RefKind::Branch, ObjId::ZERO).await.is_err());
        assert!(refs
            .create_ref("has space", RefKind::Branch, ObjId::ZERO)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn update_requires_matching_head() {
        let refs = manager();
        refs.create_ref("main", RefKind::Branch, commit_id(1))
            .await
            .unwrap();

        let outcome = refs
            .update_ref("main", &commit_id(1), commit_id(2))
            .await
            .unwrap();
        assert!(matches!(outcome, RefCasOutcome::Updated(_)));

        let outcome = refs
            .update_ref("main", &commit_id(1), commit_id(3))
            .await
            .unwrap();
        match outcome {
            RefCasOutcome::Mismatch { current_head } => assert_eq!(current_head, commit_id(2)),
            RefCasOutcome::Updated(_) => panic!("expected mismatch"),
        }
    }

    #[tokio::test]
    async fn tags_are_immutable_by_default() {
        let refs = manager();
        refs.create_ref("v1", RefKind::Tag, commit_id(1))
            .await
            .unwrap();
        let err = refs
            .update_ref("v1", &commit_id(1), commit_id(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReferenceConflict { .. }));
    }

    #[tokio::test]
    async fn movable_tags_can_be_updated() {
        let refs = RefManager::new(
            Arc::new(MemoryAdapter::new()),
            Arc::new(ManualClock::new()),
            true,
        );
        refs.create_ref("v1", RefKind::Tag, commit_id(1))
            .await
            .unwrap();
        let outcome = refs
            .update_ref("v1", &commit_id(1), commit_id(2))
            .await
            .unwrap();
        assert!(matches!(outcome, RefCasOutcome::Updated(_)));
    }

    #[tokio::test]
    async fn delete_checks_expected_head() {
        let refs = manager();
        refs.create_ref("feat", RefKind::Branch, commit_id(1))
            .await
            .unwrap();

        let err = refs.delete_ref("feat", &commit_id(9)).await.unwrap_err();
        assert!(matches!(err, Error::ReferenceConflict { .. }));

        refs.delete_ref("feat", &commit_id(1)).await.unwrap();
        assert!(matches!(
            refs.get_ref("feat").await.unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn list_refs_paginates_and_filters() {
        let refs = manager();
        for name in ["main", "feat/a", "feat/b", "feat/c"] {
            refs.create_ref(name, RefKind::Branch, ObjId::ZERO)
                .await
                .unwrap();
        }

        let page = refs.list_refs(Some("feat/"), None, 2).await.unwrap();
        assert_eq!(page.refs.len(), 2);
        assert_eq!(page.refs[0].name, "feat/a");
        let token = page.next.expect("more pages");

        let rest = refs.list_refs(Some("feat/"), Some(&token), 10).await.unwrap();
        assert_eq!(rest.refs.len(), 1);
        assert_eq!(rest.refs[0].name, "feat/c");
        assert!(rest.next.is_none());
    }

    #[tokio::test]
    async fn listing_tolerates_stale_registry_entries() {
        let store = Arc::new(MemoryAdapter::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let refs = RefManager::new(Arc::clone(&store), clock, false);
        refs.create_ref("main", RefKind::Branch, ObjId::ZERO)
            .await
            .unwrap();
        refs.create_ref("stale", RefKind::Branch, ObjId::ZERO)
            .await
            .unwrap();

        // Delete the ref slot behind the registry's back.
        let slot = RefManager::<MemoryAdapter>::ref_slot("stale");
        store.delete(Bucket::Refs, &slot).await.unwrap();

        let page = refs.list_refs(None, None, 10).await.unwrap();
        let names: Vec<&str> = page.refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["main"]);
    }

    #[tokio::test]
    async fn repository_properties_update_via_cas() {
        let refs = manager();
        refs.initialize("main", BTreeMap::new()).await.unwrap();

        let updated = refs
            .update_desc(|desc| {
                desc.properties
                    .insert("gc.enabled".to_string(), "true".to_string());
            })
            .await
            .unwrap();
        assert_eq!(updated.properties.get("gc.enabled").unwrap(), "true");
        assert_eq!(
            refs.repo_desc().await.unwrap().properties.get("gc.enabled").unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn initialize_writes_descriptor_and_default_branch() {
        let refs = manager();
        let desc = refs.initialize("main", BTreeMap::new()).await.unwrap();
        assert_eq!(desc.default_branch, "main");

        let main = refs.get_ref("main").await.unwrap();
        assert!(main.head.is_zero());

        let err = refs.initialize("main", BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));

        assert_eq!(refs.repo_desc().await.unwrap().default_branch, "main");
    }
}
