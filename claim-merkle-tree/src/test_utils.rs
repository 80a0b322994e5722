//! Test utilities: record generators and log capture.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Once,
};

use crate::{
    monitor::{BuildStage, NoopObserver, ResourceObserver},
    BuildConfig, EntitlementRecord, LeafEncoding, MerkleTree,
};

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. Safe to call from every
/// test; only the first call installs the subscriber.
pub(crate) fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// `count` records with named accounts `user{i}.near` and amounts `i + 1`.
pub(crate) fn named_records(count: usize) -> Vec<EntitlementRecord> {
    (0..count)
        .map(|i| EntitlementRecord::new(format!("user{}.near", i), (i + 1).to_string()))
        .collect()
}

/// `count` records with hex lockup accounts, for the default encoding.
pub(crate) fn lockup_records(count: usize) -> Vec<EntitlementRecord> {
    (0..count)
        .map(|i| {
            EntitlementRecord::with_lockup(
                format!("user{}.near", i),
                format!("0x{:x}", i + 1),
                ((i + 1) * 1_000).to_string(),
            )
        })
        .collect()
}

/// The three-record example used across scenario tests.
pub(crate) fn alice_bob_charlie() -> Vec<EntitlementRecord> {
    vec![
        EntitlementRecord::new("alice.near", "100"),
        EntitlementRecord::new("bob.near", "200"),
        EntitlementRecord::new("charlie.near", "300"),
    ]
}

/// Build on the calling thread with default config and no monitoring.
pub(crate) fn build(records: &[EntitlementRecord], encoding: LeafEncoding) -> MerkleTree {
    MerkleTree::build_blocking(records, encoding, &BuildConfig::default(), &NoopObserver)
        .expect("build should succeed")
}

/// A config that checkpoints after nearly every item, to exercise batching.
pub(crate) fn tiny_batches() -> BuildConfig {
    BuildConfig {
        small_batch_size: 2,
        medium_batch_size: 3,
        large_batch_size: 4,
        medium_threshold: 8,
        large_threshold: 16,
        yield_interval: 3,
        progress_log_interval: 5,
        publish_batch_size: 2,
        ..Default::default()
    }
}

/// Observer counting checkpoints, per stage.
#[derive(Default)]
pub(crate) struct CountingObserver {
    hash_leaves: AtomicUsize,
    place_leaves: AtomicUsize,
    build_nodes: AtomicUsize,
}

impl CountingObserver {
    pub fn count(&self, stage: BuildStage) -> usize {
        self.counter(stage).load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        [BuildStage::HashLeaves, BuildStage::PlaceLeaves, BuildStage::BuildNodes]
            .into_iter()
            .map(|stage| self.count(stage))
            .sum()
    }

    fn counter(&self, stage: BuildStage) -> &AtomicUsize {
        match stage {
            BuildStage::HashLeaves => &self.hash_leaves,
            BuildStage::PlaceLeaves => &self.place_leaves,
            BuildStage::BuildNodes => &self.build_nodes,
        }
    }
}

impl ResourceObserver for CountingObserver {
    fn on_checkpoint(&self, stage: BuildStage, _done: usize, _total: usize) {
        self.counter(stage).fetch_add(1, Ordering::Relaxed);
    }
}
