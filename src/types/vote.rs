//! Consensus votes and their signable form.
//!
//! A validator double-signs by casting two votes of the same type at the same
//! `(height, round)` for different block hashes. The pool receives such pairs
//! from consensus and turns them into duplicate-vote evidence once the
//! offending height commits.

use serde::{Deserialize, Serialize};

use crate::crypto::{Signature, SigningPublicKey};
use crate::Hash;

/// The two vote phases subject to double-sign accountability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteType {
    Prevote,
    Precommit,
}

/// A signed consensus vote.
///
/// `block_hash == None` is a nil vote (the validator saw no valid proposal).
/// A nil vote and a block vote at the same `(height, round, type)` from the
/// same validator still conflict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: u64,
    pub round: u32,
    pub block_hash: Option<Hash>,
    /// Fingerprint of the voting validator's signing key.
    pub validator_address: Hash,
    /// Index of the validator in the validator set at `height`.
    pub validator_index: u32,
    /// Vote timestamp in milliseconds since the UNIX epoch.
    pub timestamp: u64,
    /// Signature over [`vote_sign_data`].
    pub signature: Signature,
}

impl Vote {
    /// Verify this vote's signature under the given chain id.
    pub fn verify(&self, chain_id: &Hash, public_key: &SigningPublicKey) -> bool {
        public_key.verify(&vote_sign_data(chain_id, self), &self.signature)
    }
}

/// Data signed for a vote (chain-bound to prevent cross-chain replay).
pub fn vote_sign_data(chain_id: &Hash, vote: &Vote) -> Vec<u8> {
    let type_byte = match vote.vote_type {
        VoteType::Prevote => 1u8,
        VoteType::Precommit => 2u8,
    };
    let mut data = Vec::with_capacity(128);
    data.extend_from_slice(b"argus.vote");
    data.extend_from_slice(chain_id);
    data.extend_from_slice(&vote.height.to_le_bytes());
    data.extend_from_slice(&vote.round.to_le_bytes());
    data.push(type_byte);
    match &vote.block_hash {
        Some(hash) => {
            data.push(1);
            data.extend_from_slice(hash);
        }
        None => data.push(0),
    }
    data.extend_from_slice(&vote.validator_address);
    data
}
