use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    hash::{hash_pair, to_hex, Hash},
    monitor::{BuildMonitor, BuildReport, BuildStage, ResourceObserver},
    proof::{generate_proof, ClaimProof},
    value::{EntitlementRecord, NormalizedValue},
    verify::verify_proof,
    BuildConfig, ClaimTreeError, LeafEncoding, Result,
};

/// A record bound to the position of its leaf in the node array.
///
/// Values are kept in original input order; sorting leaves by hash would
/// otherwise lose the mapping from record to proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleValue {
    /// The record in canonical form.
    pub value: NormalizedValue,
    /// Index of the record's leaf in the node array.
    pub tree_index: usize,
}

/// An immutable Merkle tree over entitlement records.
///
/// Nodes are stored as an implicit complete binary tree: root at 0, children
/// of `i` at `2i+1` and `2i+2`. The `N` leaves occupy the last `N` slots in
/// descending position order of their sorted hashes, and every internal node
/// is `hash_pair` of its children, so the root does not depend on input
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    tree: Vec<Hash>,
    values: Vec<MerkleValue>,
    encoding: LeafEncoding,
}

/// Output of leaf hashing for one record.
struct HashedLeaf {
    original_index: usize,
    leaf: Hash,
    value: NormalizedValue,
}

fn hash_batch(
    encoding: LeafEncoding,
    records: &[EntitlementRecord],
    offset: usize,
    out: &mut Vec<HashedLeaf>,
) -> Result<()> {
    for (i, record) in records.iter().enumerate() {
        let original_index = offset + i;
        let (value, leaf) = encoding
            .hash_record(record)
            .map_err(|e| e.at_record(original_index))?;
        out.push(HashedLeaf {
            original_index,
            leaf,
            value,
        });
    }
    Ok(())
}

/// Node array under construction. Stages run strictly in order: `new`
/// (sort), `place` over all leaves, `fold` over all internal nodes from the
/// highest index down, then `finish`.
struct Layout {
    leaves: Vec<HashedLeaf>,
    tree: Vec<Hash>,
    positions: Vec<usize>,
}

impl Layout {
    fn new(mut leaves: Vec<HashedLeaf>) -> Self {
        leaves.sort_unstable_by(|a, b| a.leaf.cmp(&b.leaf));
        let count = leaves.len();
        Self {
            leaves,
            tree: vec![[0u8; 32]; 2 * count - 1],
            positions: vec![0; count],
        }
    }

    fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    fn internal_count(&self) -> usize {
        self.leaves.len() - 1
    }

    /// Place sorted leaves `range`; the i-th sorted leaf goes to slot
    /// `len - 1 - i`.
    fn place(&mut self, range: Range<usize>) {
        let last = self.tree.len() - 1;
        for i in range {
            let leaf = &self.leaves[i];
            let slot = last - i;
            self.tree[slot] = leaf.leaf;
            self.positions[leaf.original_index] = slot;
        }
    }

    /// Compute internal nodes in `range`, highest index first. All nodes
    /// above `range.end` must already be computed.
    fn fold(&mut self, range: Range<usize>) {
        for i in range.rev() {
            let left = self.tree[2 * i + 1];
            let right = self.tree.get(2 * i + 2).copied().unwrap_or(left);
            self.tree[i] = hash_pair(&left, &right);
        }
    }

    fn finish(mut self, encoding: LeafEncoding) -> MerkleTree {
        self.leaves.sort_unstable_by_key(|leaf| leaf.original_index);
        let values = self
            .leaves
            .into_iter()
            .zip(self.positions)
            .map(|(leaf, tree_index)| MerkleValue {
                value: leaf.value,
                tree_index,
            })
            .collect();
        MerkleTree {
            tree: self.tree,
            values,
            encoding,
        }
    }
}

/// Split `0..len` into consecutive ranges of at most `step` items.
fn ranges(len: usize, step: usize) -> impl Iterator<Item = Range<usize>> {
    (0..len)
        .step_by(step)
        .map(move |start| start..(start + step).min(len))
}

/// Split `0..len` into ranges of at most `step` items, highest range first.
fn ranges_descending(len: usize, step: usize) -> impl Iterator<Item = Range<usize>> {
    let chunks = len.div_ceil(step);
    (0..chunks)
        .rev()
        .map(move |chunk| chunk * step..((chunk + 1) * step).min(len))
}

/// Suspension point between construction chunks.
async fn checkpoint() {
    tokio::task::yield_now().await;
}

fn empty_input() -> ClaimTreeError {
    ClaimTreeError::format("records", "cannot build a tree from zero records")
}

impl MerkleTree {
    /// Build a tree from `records`, yielding to the async runtime between
    /// chunks of work.
    ///
    /// Any record that fails normalization or encoding aborts the build; the
    /// error carries the record's position.
    pub async fn build(
        records: &[EntitlementRecord],
        encoding: LeafEncoding,
        config: &BuildConfig,
        observer: &dyn ResourceObserver,
    ) -> Result<Self> {
        Self::build_with_report(records, encoding, config, observer)
            .await
            .map(|(tree, _)| tree)
    }

    /// [`build`](Self::build), also returning the monitor's summary.
    #[instrument(skip_all, fields(records = records.len(), encoding = ?encoding))]
    pub async fn build_with_report(
        records: &[EntitlementRecord],
        encoding: LeafEncoding,
        config: &BuildConfig,
        observer: &dyn ResourceObserver,
    ) -> Result<(Self, BuildReport)> {
        if records.is_empty() {
            return Err(empty_input());
        }
        let total = records.len();
        let mut monitor = BuildMonitor::new(observer, config);

        let batch_size = config.batch_size_for(total);
        debug!(batch_size, "hashing leaves");
        let mut leaves = Vec::with_capacity(total);
        for range in ranges(total, batch_size) {
            hash_batch(encoding, &records[range.clone()], range.start, &mut leaves)?;
            monitor.checkpoint(BuildStage::HashLeaves, range.end, total);
            checkpoint().await;
        }

        let mut layout = Layout::new(leaves);
        checkpoint().await;

        let interval = config.yield_interval();
        let leaf_count = layout.leaf_count();
        for range in ranges(leaf_count, interval) {
            let done = range.end;
            layout.place(range);
            monitor.checkpoint(BuildStage::PlaceLeaves, done, leaf_count);
            checkpoint().await;
        }

        let internal = layout.internal_count();
        let mut done = 0;
        for range in ranges_descending(internal, interval) {
            done += range.len();
            layout.fold(range);
            monitor.checkpoint(BuildStage::BuildNodes, done, internal);
            checkpoint().await;
        }

        let tree = layout.finish(encoding);
        let report = monitor.finish(tree.len());
        Ok((tree, report))
    }

    /// Build a tree on the calling thread, hashing leaves on all available
    /// cores.
    ///
    /// Produces exactly the same tree as [`build`](Self::build). Leaf
    /// hashing is split over scoped worker threads; sorting, placement and
    /// folding stay serial.
    pub fn build_blocking(
        records: &[EntitlementRecord],
        encoding: LeafEncoding,
        config: &BuildConfig,
        observer: &dyn ResourceObserver,
    ) -> Result<Self> {
        Self::build_blocking_with_report(records, encoding, config, observer).map(|(tree, _)| tree)
    }

    /// [`build_blocking`](Self::build_blocking), also returning the
    /// monitor's summary.
    #[instrument(skip_all, fields(records = records.len(), encoding = ?encoding))]
    pub fn build_blocking_with_report(
        records: &[EntitlementRecord],
        encoding: LeafEncoding,
        config: &BuildConfig,
        observer: &dyn ResourceObserver,
    ) -> Result<(Self, BuildReport)> {
        if records.is_empty() {
            return Err(empty_input());
        }
        let total = records.len();
        let mut monitor = BuildMonitor::new(observer, config);

        let workers = num_cpus::get().clamp(1, total);
        let per_worker = total.div_ceil(workers);
        debug!(workers, per_worker, "hashing leaves in parallel");
        let batches: Vec<Result<Vec<HashedLeaf>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ranges(total, per_worker)
                .map(|range| {
                    let chunk = &records[range.clone()];
                    scope.spawn(move || {
                        let mut out = Vec::with_capacity(chunk.len());
                        hash_batch(encoding, chunk, range.start, &mut out).map(|()| out)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .collect()
        });

        let mut leaves = Vec::with_capacity(total);
        for batch in batches {
            leaves.extend(batch?);
            monitor.checkpoint(BuildStage::HashLeaves, leaves.len(), total);
        }

        let mut layout = Layout::new(leaves);
        let interval = config.yield_interval();
        let leaf_count = layout.leaf_count();
        for range in ranges(leaf_count, interval) {
            let done = range.end;
            layout.place(range);
            monitor.checkpoint(BuildStage::PlaceLeaves, done, leaf_count);
        }
        let internal = layout.internal_count();
        let mut done = 0;
        for range in ranges_descending(internal, interval) {
            done += range.len();
            layout.fold(range);
            monitor.checkpoint(BuildStage::BuildNodes, done, internal);
        }

        let tree = layout.finish(encoding);
        let report = monitor.finish(tree.len());
        Ok((tree, report))
    }

    /// Assemble a tree from already validated parts.
    pub(crate) fn from_parts(
        tree: Vec<Hash>,
        values: Vec<MerkleValue>,
        encoding: LeafEncoding,
    ) -> Self {
        Self {
            tree,
            values,
            encoding,
        }
    }

    /// The root digest.
    pub fn root(&self) -> Hash {
        self.tree[0]
    }

    /// The root digest as `0x`-prefixed hex.
    pub fn root_hex(&self) -> String {
        to_hex(&self.root())
    }

    /// Number of records (leaves).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false: a tree holds at least one record.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The full node array, root first.
    pub fn nodes(&self) -> &[Hash] {
        &self.tree
    }

    /// Records in original input order with their tree positions.
    pub fn values(&self) -> &[MerkleValue] {
        &self.values
    }

    /// Leaf layout this tree was built with.
    pub fn encoding(&self) -> LeafEncoding {
        self.encoding
    }

    /// Position in [`values`](Self::values) of the first record for
    /// `account`, compared after normalization.
    pub fn position_of(&self, account: &str) -> Option<usize> {
        let account = crate::value::normalize_identifier("account", account).ok()?;
        self.values
            .iter()
            .position(|entry| entry.value.account() == account)
    }

    /// Sibling digests from the node at `tree_index` up to the root.
    pub fn get_proof(&self, tree_index: usize) -> Result<Vec<Hash>> {
        generate_proof(&self.tree, tree_index)
    }

    /// Proof for the `value_index`-th record in original input order.
    pub fn proof_for_value(&self, value_index: usize) -> Result<Vec<Hash>> {
        let entry = self.value_at(value_index)?;
        self.get_proof(entry.tree_index)
    }

    /// Full proof document for the `value_index`-th record.
    pub fn claim_proof(&self, value_index: usize) -> Result<ClaimProof> {
        let entry = self.value_at(value_index)?;
        Ok(ClaimProof {
            value: entry.value.clone(),
            tree_index: entry.tree_index,
            proof: self.get_proof(entry.tree_index)?,
        })
    }

    fn value_at(&self, value_index: usize) -> Result<&MerkleValue> {
        self.values.get(value_index).ok_or(ClaimTreeError::Index {
            index: value_index,
            len: self.values.len(),
        })
    }

    /// Verify a raw record and proof against this tree's root.
    pub fn verify(&self, record: &EntitlementRecord, proof: &[Hash]) -> Result<bool> {
        verify_proof(&self.root(), self.encoding, record, proof)
    }

    /// Re-hash every leaf and internal node and compare with the stored
    /// array.
    ///
    /// [`load`](Self::load) trusts stored digests; call this when the blob
    /// store is not trusted for integrity.
    pub fn validate(&self) -> Result<()> {
        for (position, entry) in self.values.iter().enumerate() {
            let leaf = self
                .encoding
                .leaf_hash(&entry.value)
                .map_err(|e| e.at_record(position))?;
            if self.tree.get(entry.tree_index) != Some(&leaf) {
                return Err(ClaimTreeError::Format {
                    field: "tree",
                    record: Some(position),
                    reason: format!("leaf at index {} does not match its value", entry.tree_index),
                });
            }
        }
        let internal = self.values.len() - 1;
        for i in (0..internal).rev() {
            let left = self.tree[2 * i + 1];
            let right = self.tree.get(2 * i + 2).copied().unwrap_or(left);
            if self.tree[i] != hash_pair(&left, &right) {
                return Err(ClaimTreeError::format(
                    "tree",
                    format!("node {} does not match its children", i),
                ));
            }
        }
        Ok(())
    }
}
