//! Replicated consensus state and the read-only chain history stores.
//!
//! The pool caches the most recent replicated [`State`] (delivered by the
//! block executor on every commit) and reaches back into history through two
//! narrow read-only interfaces: [`StateStore`] for validator sets and
//! [`BlockStore`] for headers and commits. Neither store holds a reference
//! back to the pool.

use serde::{Deserialize, Serialize};

use crate::types::{BlockMeta, Commit, ValidatorSet};
use crate::Hash;

/// Consensus parameters governing evidence expiry.
///
/// Evidence is expired only once it is older than BOTH limits; a chain with
/// fast blocks does not silently shrink the time window and vice versa.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceParams {
    pub max_age_num_blocks: u64,
    /// Maximum age in milliseconds.
    pub max_age_duration_ms: u64,
}

impl Default for EvidenceParams {
    fn default() -> Self {
        EvidenceParams {
            max_age_num_blocks: crate::constants::DEFAULT_MAX_AGE_NUM_BLOCKS,
            max_age_duration_ms: crate::constants::DEFAULT_MAX_AGE_DURATION_MS,
        }
    }
}

/// The slice of replicated state the pool operates on.
#[derive(Clone, Debug)]
pub struct State {
    pub chain_id: Hash,
    pub last_block_height: u64,
    /// Header time of the last committed block, in ms.
    pub last_block_time: u64,
    pub evidence_params: EvidenceParams,
    /// The validator set that signed the last committed block.
    pub last_validators: ValidatorSet,
}

/// Errors from the read-only history stores.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("state store I/O error: {0}")]
    Io(String),
    #[error("no validator set at height {0}")]
    NoValidators(u64),
}

/// Read-only access to replicated state and historical validator sets.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<State, StateStoreError>;
    fn load_validators(&self, height: u64) -> Result<ValidatorSet, StateStoreError>;
}

/// Read-only access to committed block headers and commits.
///
/// `BlockMeta.header.time` is authoritative for evidence timestamps at
/// historical heights.
pub trait BlockStore: Send + Sync {
    fn load_block_meta(&self, height: u64) -> Option<BlockMeta>;
    fn load_block_commit(&self, height: u64) -> Option<Commit>;
}
