//! The paginated key index.
//!
//! Every commit references an immutable index of the keys live at that
//! commit. The index is stored as content-addressed **segments**: a small
//! index is a single sorted leaf; past the segment byte budget it splits
//! into a shallow stripe tree `{first_key, last_key, segment}` whose
//! children are leaves. Segments untouched by a commit keep their IDs, so
//! consecutive commits share structure and a key lookup costs one or two
//! `get` calls.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use tarn_core::{Bucket, ContentKey, Error, ObjId, Result, StorageAdapter};

use crate::objects::{decode_object, hash_object, ContentType, OpKind, Operation, TAG_INDEX_SEGMENT};

/// Tuning knobs for the key index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Target serialized size of one leaf segment.
    pub segment_budget_bytes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            segment_budget_bytes: 64 * 1024,
        }
    }
}

/// The value the index stores per live key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Stable content ID of the blob at this key.
    pub content_id: String,
    /// ID of the content blob.
    pub payload: ObjId,
    /// Type of the content blob.
    pub content_type: ContentType,
}

/// One key/value pair inside a leaf segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    /// The key.
    pub key: ContentKey,
    /// The value stored for the key.
    #[serde(flatten)]
    pub entry: IndexEntry,
}

/// A sorted leaf of the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSegment {
    /// Entries sorted by key.
    pub entries: Vec<SegmentEntry>,
}

/// A child pointer in a stripe node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeRef {
    /// Smallest key in the child segment.
    pub first_key: ContentKey,
    /// Largest key in the child segment.
    pub last_key: ContentKey,
    /// ID of the child leaf node.
    pub segment: ObjId,
}

/// A stored index node: either a leaf or a stripe tree over leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum IndexNode {
    /// A sorted leaf segment.
    Leaf(IndexSegment),
    /// Pointers to leaf segments in key order.
    Stripes {
        /// The child pointers.
        stripes: Vec<StripeRef>,
    },
}

/// One entry of an index diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// The key that differs.
    pub key: ContentKey,
    /// Value on the `from` side, absent when the key is missing there.
    pub from: Option<IndexEntry>,
    /// Value on the `to` side, absent when the key is missing there.
    pub to: Option<IndexEntry>,
}

/// Resume cursor for a streaming scan: the leaf being read plus the offset
/// of the next entry inside it. Stable across concurrent commits because
/// every commit references its own immutable root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanToken {
    /// The leaf segment to resume in.
    pub segment: ObjId,
    /// Offset of the next entry within that leaf.
    pub offset: usize,
}

impl fmt::Display for ScanToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}

impl FromStr for ScanToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (segment, offset) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_argument(format!("invalid scan token '{s}'")))?;
        Ok(Self {
            segment: segment.parse()?,
            offset: offset
                .parse()
                .map_err(|_| Error::invalid_argument(format!("invalid scan token '{s}'")))?,
        })
    }
}

async fn load_node<S: StorageAdapter>(store: &S, id: &ObjId) -> Result<IndexNode> {
    let bytes = store
        .get(Bucket::KeyIndexSegments, id)
        .await
        .map_err(|e| Error::internal(format!("failed to load index node {id}: {e}")))?;
    decode_object("index node", &bytes)
}

async fn load_leaf<S: StorageAdapter>(store: &S, id: &ObjId) -> Result<IndexSegment> {
    match load_node(store, id).await? {
        IndexNode::Leaf(segment) => Ok(segment),
        IndexNode::Stripes { .. } => Err(Error::internal(format!(
            "index node {id} is a stripe node where a leaf was expected"
        ))),
    }
}

/// Returns the ordered leaf IDs reachable from `root`.
async fn leaf_ids<S: StorageAdapter>(store: &S, root: Option<&ObjId>) -> Result<Vec<ObjId>> {
    let Some(root) = root else {
        return Ok(Vec::new());
    };
    match load_node(store, root).await? {
        IndexNode::Leaf(_) => Ok(vec![*root]),
        IndexNode::Stripes { stripes } => Ok(stripes.iter().map(|s| s.segment).collect()),
    }
}

fn search_leaf(segment: &IndexSegment, key: &ContentKey) -> Option<IndexEntry> {
    segment
        .entries
        .binary_search_by(|e| e.key.cmp(key))
        .ok()
        .map(|i| segment.entries[i].entry.clone())
}

/// Looks up a single key under `root`.
///
/// # Errors
///
/// Returns `Internal` on storage or decode failures.
pub async fn lookup<S: StorageAdapter>(
    store: &S,
    root: Option<&ObjId>,
    key: &ContentKey,
) -> Result<Option<IndexEntry>> {
    let Some(root) = root else {
        return Ok(None);
    };
    match load_node(store, root).await? {
        IndexNode::Leaf(segment) => Ok(search_leaf(&segment, key)),
        IndexNode::Stripes { stripes } => {
            let idx = stripes.partition_point(|s| s.last_key < *key);
            let Some(stripe) = stripes.get(idx) else {
                return Ok(None);
            };
            if *key < stripe.first_key {
                return Ok(None);
            }
            let segment = load_leaf(store, &stripe.segment).await?;
            Ok(search_leaf(&segment, key))
        }
    }
}

/// Looks up many keys under `root`, batching segment reads.
///
/// Missing keys are simply absent from the returned map.
///
/// # Errors
///
/// Returns `Internal` on storage or decode failures.
pub async fn lookup_many<S: StorageAdapter>(
    store: &S,
    root: Option<&ObjId>,
    keys: &[ContentKey],
) -> Result<BTreeMap<ContentKey, IndexEntry>> {
    let mut found = BTreeMap::new();
    let Some(root) = root else {
        return Ok(found);
    };
    match load_node(store, root).await? {
        IndexNode::Leaf(segment) => {
            for key in keys {
                if let Some(entry) = search_leaf(&segment, key) {
                    found.insert(key.clone(), entry);
                }
            }
        }
        IndexNode::Stripes { stripes } => {
            let mut per_stripe: BTreeMap<usize, Vec<&ContentKey>> = BTreeMap::new();
            for key in keys {
                let idx = stripes.partition_point(|s| s.last_key < *key);
                if let Some(stripe) = stripes.get(idx) {
                    if *key >= stripe.first_key {
                        per_stripe.entry(idx).or_default().push(key);
                    }
                }
            }
            let wanted: Vec<ObjId> = per_stripe.keys().map(|i| stripes[*i].segment).collect();
            let loaded = store
                .get_many(Bucket::KeyIndexSegments, &wanted)
                .await
                .map_err(|e| Error::internal(format!("failed to load index segments: {e}")))?;
            for ((idx, stripe_keys), bytes) in per_stripe.into_iter().zip(loaded) {
                let bytes = bytes.ok_or_else(|| {
                    Error::internal(format!(
                        "index segment {} is missing",
                        stripes[idx].segment
                    ))
                })?;
                let node: IndexNode = decode_object("index node", &bytes)?;
                let IndexNode::Leaf(segment) = node else {
                    return Err(Error::internal("nested stripe nodes are not supported"));
                };
                for key in stripe_keys {
                    if let Some(entry) = search_leaf(&segment, key) {
                        found.insert(key.clone(), entry);
                    }
                }
            }
        }
    }
    Ok(found)
}

fn entry_weight(entry: &SegmentEntry) -> usize {
    let key_len: usize = entry.key.elements().iter().map(|e| e.len() + 3).sum();
    // hex payload, content id, type tag, JSON framing
    key_len + entry.entry.content_id.len() + 110
}

fn chunk_entries(entries: Vec<SegmentEntry>, budget: usize) -> Vec<Vec<SegmentEntry>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_weight = 0;
    for entry in entries {
        let weight = entry_weight(&entry);
        if !current.is_empty() && current_weight + weight > budget {
            chunks.push(std::mem::take(&mut current));
            current_weight = 0;
        }
        current_weight += weight;
        current.push(entry);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

enum Stripe {
    Reused(StripeRef),
    Fresh(Vec<SegmentEntry>),
}

/// Applies `operations` to the index rooted at `root`, producing the new
/// root and the segment objects that must be written before the commit.
///
/// Unchanged segments are reused by ID; only touched stripes are rebuilt.
///
/// # Errors
///
/// Returns `Internal` on malformed operations (a `Put` without payload or
/// content ID) and on storage failures.
pub async fn apply<S: StorageAdapter>(
    store: &S,
    config: &IndexConfig,
    root: Option<&ObjId>,
    operations: &[Operation],
) -> Result<(Option<ObjId>, Vec<(ObjId, Bytes)>)> {
    let mut changes: BTreeMap<ContentKey, Option<IndexEntry>> = BTreeMap::new();
    for op in operations {
        match op.kind {
            OpKind::Put => {
                let payload = op.payload.ok_or_else(|| {
                    Error::internal(format!("put operation for {} has no payload", op.key))
                })?;
                let content_id = op.content_id.clone().ok_or_else(|| {
                    Error::internal(format!("put operation for {} has no content id", op.key))
                })?;
                let content_type = op.content_type.ok_or_else(|| {
                    Error::internal(format!("put operation for {} has no content type", op.key))
                })?;
                changes.insert(
                    op.key.clone(),
                    Some(IndexEntry {
                        content_id,
                        payload,
                        content_type,
                    }),
                );
            }
            OpKind::Delete => {
                changes.insert(op.key.clone(), None);
            }
            OpKind::Unchanged => {}
        }
    }
    if changes.is_empty() {
        return Ok((root.copied(), Vec::new()));
    }

    // Existing stripes, a single leaf treated as one stripe over everything.
    let existing: Vec<StripeRef> = match root {
        None => Vec::new(),
        Some(root_id) => match load_node(store, root_id).await? {
            IndexNode::Leaf(segment) => match (segment.entries.first(), segment.entries.last()) {
                (Some(first), Some(last)) => vec![StripeRef {
                    first_key: first.key.clone(),
                    last_key: last.key.clone(),
                    segment: *root_id,
                }],
                _ => Vec::new(),
            },
            IndexNode::Stripes { stripes } => stripes,
        },
    };

    // Route each change to the stripe that covers it; keys past the last
    // stripe go to the last one.
    let mut per_stripe: BTreeMap<usize, BTreeMap<ContentKey, Option<IndexEntry>>> = BTreeMap::new();
    if existing.is_empty() {
        per_stripe.insert(0, changes);
    } else {
        for (key, change) in changes {
            let idx = existing
                .partition_point(|s| s.last_key < key)
                .min(existing.len() - 1);
            per_stripe.entry(idx).or_default().insert(key, change);
        }
    }

    let mut stripes_out: Vec<Stripe> = Vec::new();
    if existing.is_empty() {
        let merged: Vec<SegmentEntry> = per_stripe
            .remove(&0)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, change)| change.map(|entry| SegmentEntry { key, entry }))
            .collect();
        if !merged.is_empty() {
            for chunk in chunk_entries(merged, config.segment_budget_bytes) {
                stripes_out.push(Stripe::Fresh(chunk));
            }
        }
    } else {
        for (idx, stripe) in existing.into_iter().enumerate() {
            match per_stripe.remove(&idx) {
                None => stripes_out.push(Stripe::Reused(stripe)),
                Some(stripe_changes) => {
                    let segment = load_leaf(store, &stripe.segment).await?;
                    let mut merged: BTreeMap<ContentKey, IndexEntry> = segment
                        .entries
                        .into_iter()
                        .map(|e| (e.key, e.entry))
                        .collect();
                    for (key, change) in stripe_changes {
                        match change {
                            Some(entry) => {
                                merged.insert(key, entry);
                            }
                            None => {
                                merged.remove(&key);
                            }
                        }
                    }
                    let merged: Vec<SegmentEntry> = merged
                        .into_iter()
                        .map(|(key, entry)| SegmentEntry { key, entry })
                        .collect();
                    for chunk in chunk_entries(merged, config.segment_budget_bytes) {
                        stripes_out.push(Stripe::Fresh(chunk));
                    }
                }
            }
        }
    }

    if stripes_out.is_empty() {
        return Ok((None, Vec::new()));
    }

    // Hash fresh leaves, then decide the root shape.
    let mut writes: Vec<(ObjId, Bytes)> = Vec::new();
    let mut refs: Vec<StripeRef> = Vec::new();
    for stripe in stripes_out {
        match stripe {
            Stripe::Reused(stripe_ref) => refs.push(stripe_ref),
            Stripe::Fresh(entries) => {
                let first_key = entries.first().expect("chunks are non-empty").key.clone();
                let last_key = entries.last().expect("chunks are non-empty").key.clone();
                let node = IndexNode::Leaf(IndexSegment { entries });
                let (id, bytes) = hash_object(TAG_INDEX_SEGMENT, &node)?;
                writes.push((id, bytes));
                refs.push(StripeRef {
                    first_key,
                    last_key,
                    segment: id,
                });
            }
        }
    }

    if refs.len() == 1 {
        // Collapse to the single leaf; it is already stored (or queued).
        return Ok((Some(refs[0].segment), writes));
    }

    let root_node = IndexNode::Stripes { stripes: refs };
    let (root_id, root_bytes) = hash_object(TAG_INDEX_SEGMENT, &root_node)?;
    writes.push((root_id, root_bytes));
    Ok((Some(root_id), writes))
}

/// Streams index entries in key order.
///
/// `prefix` restricts results to keys it is an element-wise prefix of;
/// `token` resumes a previous scan over the same root.
///
/// # Errors
///
/// Returns `InvalidArgument` when the token does not belong to this root.
pub async fn scan<S: StorageAdapter>(
    store: &S,
    root: Option<&ObjId>,
    prefix: Option<&ContentKey>,
    token: Option<ScanToken>,
    limit: usize,
) -> Result<(Vec<(ContentKey, IndexEntry)>, Option<ScanToken>)> {
    let leaves = leaf_ids(store, root).await?;
    let (mut leaf_idx, mut offset) = match token {
        None => (0, 0),
        Some(token) => {
            let idx = leaves
                .iter()
                .position(|id| *id == token.segment)
                .ok_or_else(|| Error::invalid_argument("scan token does not match this index"))?;
            (idx, token.offset)
        }
    };

    let mut out = Vec::new();
    while leaf_idx < leaves.len() {
        let segment = load_leaf(store, &leaves[leaf_idx]).await?;
        while offset < segment.entries.len() {
            if out.len() == limit {
                return Ok((
                    out,
                    Some(ScanToken {
                        segment: leaves[leaf_idx],
                        offset,
                    }),
                ));
            }
            let entry = &segment.entries[offset];
            offset += 1;
            if let Some(prefix) = prefix {
                if entry.key.starts_with(prefix) {
                    out.push((entry.key.clone(), entry.entry.clone()));
                } else if entry.key > *prefix {
                    // Sorted order: nothing past this point can match.
                    return Ok((out, None));
                }
            } else {
                out.push((entry.key.clone(), entry.entry.clone()));
            }
        }
        leaf_idx += 1;
        offset = 0;
    }
    Ok((out, None))
}

/// Computes the keyed differences between two index roots.
///
/// Segments with identical IDs on both sides are skipped without loading.
///
/// # Errors
///
/// Returns `Internal` on storage or decode failures.
pub async fn diff<S: StorageAdapter>(
    store: &S,
    from: Option<&ObjId>,
    to: Option<&ObjId>,
) -> Result<Vec<DiffEntry>> {
    if from == to {
        return Ok(Vec::new());
    }
    let from_leaves = leaf_ids(store, from).await?;
    let to_leaves = leaf_ids(store, to).await?;
    let shared: HashSet<ObjId> = from_leaves
        .iter()
        .copied()
        .collect::<HashSet<_>>()
        .intersection(&to_leaves.iter().copied().collect())
        .copied()
        .collect();

    let mut from_map = BTreeMap::new();
    for leaf in from_leaves.iter().filter(|id| !shared.contains(id)) {
        let segment = load_leaf(store, leaf).await?;
        for entry in segment.entries {
            from_map.insert(entry.key, entry.entry);
        }
    }
    let mut to_map = BTreeMap::new();
    for leaf in to_leaves.iter().filter(|id| !shared.contains(id)) {
        let segment = load_leaf(store, leaf).await?;
        for entry in segment.entries {
            to_map.insert(entry.key, entry.entry);
        }
    }

    let keys: std::collections::BTreeSet<ContentKey> =
        from_map.keys().chain(to_map.keys()).cloned().collect();
    Ok(keys
        .into_iter()
        .filter_map(|key| {
            let from = from_map.get(&key).cloned();
            let to = to_map.get(&key).cloned();
            (from != to).then_some(DiffEntry { key, from, to })
        })
        .collect())
}
