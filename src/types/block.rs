//! Block headers and commits — the slice of the chain the pool needs to
//! verify evidence and timestamp it at historical heights.

use serde::{Deserialize, Serialize};

use crate::types::validator::ValidatorSet;
use crate::Hash;

/// A block header. Header time is authoritative for evidence timestamps at
/// historical heights.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub chain_id: Hash,
    pub height: u64,
    /// Milliseconds since the UNIX epoch.
    pub time: u64,
    pub last_block_hash: Option<Hash>,
    /// Hash of the validator set that signs this block.
    pub validators_hash: Hash,
    pub proposer_address: Hash,
}

impl Header {
    /// Domain-separated content hash identifying this header.
    pub fn hash(&self) -> Hash {
        let last = self.last_block_hash.unwrap_or([0u8; 32]);
        crate::hash_domain(
            b"argus.header",
            &crate::hash_concat(&[
                &self.chain_id,
                &self.height.to_le_bytes(),
                &self.time.to_le_bytes(),
                &last,
                &self.validators_hash,
                &self.proposer_address,
            ]),
        )
    }
}

/// Compact block record served by the block store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_hash: Hash,
    pub header: Header,
}

/// One validator's precommit inside a commit. `signature == None` means the
/// validator was absent for this block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSig {
    pub validator_address: Hash,
    pub timestamp: u64,
    pub signature: Option<crate::crypto::Signature>,
}

/// The aggregated precommits that certify a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub height: u64,
    pub round: u32,
    pub block_hash: Hash,
    pub signatures: Vec<CommitSig>,
}

/// Data each commit signer signed (chain-bound, like votes).
pub fn commit_sign_data(chain_id: &Hash, commit: &Commit) -> Vec<u8> {
    let mut data = Vec::with_capacity(96);
    data.extend_from_slice(b"argus.commit");
    data.extend_from_slice(chain_id);
    data.extend_from_slice(&commit.height.to_le_bytes());
    data.extend_from_slice(&commit.round.to_le_bytes());
    data.extend_from_slice(&commit.block_hash);
    data
}

/// A header together with the commit that certifies it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHeader {
    pub header: Header,
    pub commit: Commit,
}

/// A signed header plus the validator set that signed it — the form a
/// light-client attack arrives in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightBlock {
    pub signed_header: SignedHeader,
    pub validator_set: ValidatorSet,
}
