//! Tuning knobs for tree construction and publishing.
//!
//! # Example
//!
//! ```
//! use claim_merkle_tree::BuildConfig;
//!
//! // Defaults suit inputs up to a few million records
//! let config = BuildConfig::default();
//! assert_eq!(config.batch_size_for(500), 1_000);
//!
//! // Tighter memory limits for a constrained worker
//! let config = BuildConfig {
//!     memory_warn_bytes: 256 * 1024 * 1024,
//!     reclaim_threshold_bytes: 512 * 1024 * 1024,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for [`MerkleTree`](crate::MerkleTree) builds.
///
/// None of these values affect the resulting tree; they only control how
/// often the builder checkpoints and when the monitor complains.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Leaf-hashing batch size below `medium_threshold` records.
    #[serde(default = "default_small_batch_size")]
    pub small_batch_size: usize,
    /// Batch size from `medium_threshold` up to `large_threshold` records.
    #[serde(default = "default_medium_batch_size")]
    pub medium_batch_size: usize,
    /// Batch size at or above `large_threshold` records.
    #[serde(default = "default_large_batch_size")]
    pub large_batch_size: usize,
    /// Record count from which `medium_batch_size` applies.
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: usize,
    /// Record count from which `large_batch_size` applies.
    #[serde(default = "default_large_threshold")]
    pub large_threshold: usize,

    /// Checkpoint every this many leaf placements or internal nodes.
    #[serde(default = "default_yield_interval")]
    pub yield_interval: usize,

    /// Resident memory above which the monitor logs a warning (0 = never).
    #[serde(default = "default_memory_warn_bytes")]
    pub memory_warn_bytes: u64,
    /// Resident memory above which the monitor asks the observer to reclaim
    /// memory (0 = never).
    #[serde(default = "default_reclaim_threshold_bytes")]
    pub reclaim_threshold_bytes: u64,
    /// Elapsed build time after which the monitor logs a warning (0 = never).
    #[serde(default = "default_slow_build_warn_secs")]
    pub slow_build_warn_secs: u64,
    /// Log progress every this many processed items (0 = never).
    #[serde(default = "default_progress_log_interval")]
    pub progress_log_interval: usize,

    /// Proof documents per `put_batch` call when publishing.
    #[serde(default = "default_publish_batch_size")]
    pub publish_batch_size: usize,
}

fn default_small_batch_size() -> usize { 1_000 }
fn default_medium_batch_size() -> usize { 5_000 }
fn default_large_batch_size() -> usize { 10_000 }
fn default_medium_threshold() -> usize { 10_000 }
fn default_large_threshold() -> usize { 100_000 }
fn default_yield_interval() -> usize { 50_000 }
fn default_memory_warn_bytes() -> u64 { 1024 * 1024 * 1024 } // 1 GB
fn default_reclaim_threshold_bytes() -> u64 { 2 * 1024 * 1024 * 1024 } // 2 GB
fn default_slow_build_warn_secs() -> u64 { 60 }
fn default_progress_log_interval() -> usize { 100_000 }
fn default_publish_batch_size() -> usize { 1_000 }

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            small_batch_size: default_small_batch_size(),
            medium_batch_size: default_medium_batch_size(),
            large_batch_size: default_large_batch_size(),
            medium_threshold: default_medium_threshold(),
            large_threshold: default_large_threshold(),
            yield_interval: default_yield_interval(),
            memory_warn_bytes: default_memory_warn_bytes(),
            reclaim_threshold_bytes: default_reclaim_threshold_bytes(),
            slow_build_warn_secs: default_slow_build_warn_secs(),
            progress_log_interval: default_progress_log_interval(),
            publish_batch_size: default_publish_batch_size(),
        }
    }
}

impl BuildConfig {
    /// Leaf-hashing batch size for an input of `record_count` records.
    ///
    /// Never returns 0.
    pub fn batch_size_for(&self, record_count: usize) -> usize {
        let size = if record_count >= self.large_threshold {
            self.large_batch_size
        } else if record_count >= self.medium_threshold {
            self.medium_batch_size
        } else {
            self.small_batch_size
        };
        size.max(1)
    }

    pub(crate) fn yield_interval(&self) -> usize {
        self.yield_interval.max(1)
    }

    pub(crate) fn publish_batch_size(&self) -> usize {
        self.publish_batch_size.max(1)
    }
}
