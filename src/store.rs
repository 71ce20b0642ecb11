//! Persistent evidence storage: key codec and sled adapter.
//!
//! The pool keeps two logically distinct sets in one sled tree, separated by
//! disjoint single-byte prefixes. Keys are `(prefix, height, hash)` with the
//! height big-endian, so bytewise ascending iteration equals `(height, hash)`
//! ascending iteration — the order proposers consume pending evidence in.

use crate::types::Evidence;
use crate::Hash;

/// Prefix for evidence that appeared in a committed block. The value under a
/// committed key is just the bincode-encoded commit height; the block itself
/// retains the full evidence.
pub const PREFIX_COMMITTED: u8 = 9;
/// Prefix for verified evidence awaiting inclusion in a block. The value is
/// the canonical evidence encoding.
pub const PREFIX_PENDING: u8 = 10;

/// Errors from storage operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn key_evidence(prefix: u8, height: u64, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(prefix);
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

/// Pending-set key for a piece of evidence.
pub fn key_pending(ev: &Evidence) -> Vec<u8> {
    key_evidence(PREFIX_PENDING, ev.height(), &ev.hash())
}

/// Committed-set key for a piece of evidence.
pub fn key_committed(ev: &Evidence) -> Vec<u8> {
    key_evidence(PREFIX_COMMITTED, ev.height(), &ev.hash())
}

/// Sled-backed evidence store.
///
/// Opens its own tree on a `sled::Db` shared with the rest of the node, so
/// the pool's key space stays disjoint from other subsystems regardless of
/// prefix values.
pub struct EvidenceStore {
    tree: sled::Tree,
}

impl EvidenceStore {
    /// Open the evidence tree on an existing database.
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        let tree = db
            .open_tree("evidence")
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(EvidenceStore { tree })
    }

    /// Open a temporary in-memory store (for testing).
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Self::open(&db)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    pub fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        self.tree
            .contains_key(key)
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tree
            .insert(key, value)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.tree
            .remove(key)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Iterate all entries under a prefix in ascending key order.
    pub fn scan_prefix(
        &self,
        prefix: u8,
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>), StoreError>> + '_ {
        self.tree.scan_prefix([prefix]).map(|item| {
            item.map(|(key, value)| (key.to_vec(), value.to_vec()))
                .map_err(|e| StoreError::Io(e.to_string()))
        })
    }

    /// Apply a batch atomically and flush it to disk before returning.
    ///
    /// In-memory structures (broadcast list, size counter) must only be
    /// updated after this succeeds.
    pub fn write_sync(&self, batch: sled::Batch) -> Result<(), StoreError> {
        self.tree
            .apply_batch(batch)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        self.tree
            .flush()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}
