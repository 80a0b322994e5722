//! Publishing trees and proofs to a key/value blob store.
//!
//! Layout per project:
//!
//! - `{project}/tree.json` holds the [`TreeDump`](crate::TreeDump)
//! - `{project}/proofs/{account}.json` holds one [`ClaimProof`] per record,
//!   keyed by the normalized account

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::{
    proof::ClaimProof, tree::MerkleTree, value::normalize_identifier, BuildConfig, Result,
};

/// Key of the tree dump for `project_id`.
pub fn tree_key(project_id: &str) -> String {
    format!("{}/tree.json", project_id)
}

/// Key of the proof document for an already normalized `account`.
pub fn proof_key(project_id: &str, account: &str) -> String {
    format!("{}/proofs/{}.json", project_id, account)
}

/// Abstract blob storage.
///
/// Backends report failures as [`ClaimTreeError::Store`](crate::ClaimTreeError).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the blob at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Store `value` at `key`, replacing any previous blob.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Store several blobs. Default implementation falls back to
    /// sequential puts.
    async fn put_batch(&self, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        for (key, value) in items {
            self.put(&key, value).await?;
        }
        Ok(())
    }
}

/// Write the tree dump and every proof document for `project_id`.
///
/// Proofs are written before the tree, so a reader that finds the tree can
/// always find every proof. Returns the root as `0x` hex. When two records
/// share an account, the later record's proof wins.
#[instrument(skip(store, tree, config), fields(records = tree.len()))]
pub async fn publish(
    store: &dyn BlobStore,
    project_id: &str,
    tree: &MerkleTree,
    config: &BuildConfig,
) -> Result<String> {
    let batch_size = config.publish_batch_size();
    let mut batch = Vec::with_capacity(batch_size.min(tree.len()));
    let mut written = 0;
    for (value_index, entry) in tree.values().iter().enumerate() {
        let proof = tree.claim_proof(value_index)?;
        let key = proof_key(project_id, entry.value.account());
        batch.push((key, proof.to_json()?.into_bytes()));
        if batch.len() == batch_size {
            written += batch.len();
            store.put_batch(std::mem::take(&mut batch)).await?;
            debug!(written, "published proof batch");
        }
    }
    if !batch.is_empty() {
        written += batch.len();
        store.put_batch(batch).await?;
    }

    store
        .put(&tree_key(project_id), tree.to_json()?.into_bytes())
        .await?;
    let root = tree.root_hex();
    info!(written, root = %root, "published tree");
    Ok(root)
}

/// Load the published tree for `project_id`, if any.
pub async fn fetch_tree(store: &dyn BlobStore, project_id: &str) -> Result<Option<MerkleTree>> {
    let Some(bytes) = store.get(&tree_key(project_id)).await? else {
        return Ok(None);
    };
    let text = String::from_utf8(bytes)
        .map_err(|e| crate::ClaimTreeError::format("dump", format!("not utf-8: {}", e)))?;
    MerkleTree::from_json(&text).map(Some)
}

/// Load the proof document for `account`, normalizing the account first.
pub async fn fetch_proof(
    store: &dyn BlobStore,
    project_id: &str,
    account: &str,
) -> Result<Option<ClaimProof>> {
    let account = normalize_identifier("account", account)?;
    let Some(bytes) = store.get(&proof_key(project_id, &account)).await? else {
        return Ok(None);
    };
    let text = String::from_utf8(bytes)
        .map_err(|e| crate::ClaimTreeError::format("proof", format!("not utf-8: {}", e)))?;
    ClaimProof::from_json(&text).map(Some)
}

#[cfg(any(test, feature = "mem_store"))]
mod mem_store {
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            RwLock,
        },
    };

    use async_trait::async_trait;

    use super::BlobStore;
    use crate::{ClaimTreeError, Result};

    /// In-memory [`BlobStore`] for tests and local tooling.
    #[derive(Debug, Default)]
    pub struct MemBlobStore {
        blobs: RwLock<BTreeMap<String, Vec<u8>>>,
        puts: AtomicUsize,
    }

    impl MemBlobStore {
        /// Create an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of stored blobs.
        pub fn len(&self) -> usize {
            self.blobs.read().map(|blobs| blobs.len()).unwrap_or(0)
        }

        /// Whether the store holds no blobs.
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Keys in sorted order.
        pub fn keys(&self) -> Vec<String> {
            self.blobs
                .read()
                .map(|blobs| blobs.keys().cloned().collect())
                .unwrap_or_default()
        }

        /// Total `put` calls, including those made through `put_batch`.
        pub fn put_count(&self) -> usize {
            self.puts.load(Ordering::Relaxed)
        }
    }

    fn poisoned() -> ClaimTreeError {
        ClaimTreeError::Store("lock poisoned".to_string())
    }

    #[async_trait]
    impl BlobStore for MemBlobStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let blobs = self.blobs.read().map_err(|_| poisoned())?;
            Ok(blobs.get(key).cloned())
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
            self.puts.fetch_add(1, Ordering::Relaxed);
            let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
            blobs.insert(key.to_string(), value);
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "mem_store"))]
pub use mem_store::MemBlobStore;

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{monitor::NoopObserver, ClaimTreeError, EntitlementRecord, LeafEncoding};

    fn sample_tree() -> MerkleTree {
        let records = vec![
            EntitlementRecord::with_lockup("alice.near", "0xa1", "100"),
            EntitlementRecord::with_lockup("bob.near", "0xb2", "200"),
            EntitlementRecord::with_lockup("charlie.near", "0xc3", "300"),
        ];
        MerkleTree::build_blocking(
            &records,
            LeafEncoding::AccountLockupAmount,
            &BuildConfig::default(),
            &NoopObserver,
        )
        .expect("build tree")
    }

    #[test]
    fn test_keys() {
        assert_eq!(tree_key("drop-1"), "drop-1/tree.json");
        assert_eq!(proof_key("drop-1", "bob.near"), "drop-1/proofs/bob.near.json");
    }

    #[tokio::test]
    async fn test_publish_and_fetch() {
        let store = MemBlobStore::new();
        let tree = sample_tree();
        let config = BuildConfig {
            publish_batch_size: 2,
            ..Default::default()
        };
        let root = publish(&store, "drop-1", &tree, &config).await.expect("publish");
        assert_eq!(root, tree.root_hex());
        assert_eq!(store.len(), 4);
        assert_eq!(store.put_count(), 4);

        let fetched = fetch_tree(&store, "drop-1")
            .await
            .expect("fetch tree")
            .expect("tree was published");
        assert_eq!(fetched, tree);

        let proof = fetch_proof(&store, "drop-1", "BOB.near")
            .await
            .expect("fetch proof")
            .expect("proof was published");
        assert_eq!(proof, tree.claim_proof(1).expect("claim proof"));
        assert!(proof.verify(&tree.root(), tree.encoding()).expect("verify"));
    }

    #[tokio::test]
    async fn test_missing_blobs() {
        let store = MemBlobStore::new();
        assert!(fetch_tree(&store, "nothing").await.expect("fetch tree").is_none());
        assert!(fetch_proof(&store, "nothing", "alice.near").await.expect("fetch proof").is_none());
        assert_matches!(
            fetch_proof(&store, "nothing", "not an account").await,
            Err(ClaimTreeError::Format { field: "account", .. })
        );
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_a_format_error() {
        let store = MemBlobStore::new();
        store.put(&tree_key("drop-1"), b"{".to_vec()).await.expect("put blob");
        assert_matches!(
            fetch_tree(&store, "drop-1").await,
            Err(ClaimTreeError::Format { field: "dump", .. })
        );
    }

    struct FailingStore;

    #[async_trait]
    impl BlobStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn put(&self, key: &str, _value: Vec<u8>) -> Result<()> {
            Err(ClaimTreeError::Store(format!("refused {}", key)))
        }
    }

    #[tokio::test]
    async fn test_publish_propagates_store_errors() {
        let tree = sample_tree();
        assert_matches!(
            publish(&FailingStore, "drop-1", &tree, &BuildConfig::default()).await,
            Err(ClaimTreeError::Store(_))
        );
    }
}
