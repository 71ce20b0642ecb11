//! The evidence taxonomy: exactly two kinds of provable validator
//! misbehavior.
//!
//! Every variant exposes the height it happened at, the (block-derived)
//! timestamp it is anchored to, a deterministic content hash that is its
//! identity everywhere — storage key suffix, broadcast-list identity,
//! duplicate detection — and a canonical bincode encoding.

use serde::{Deserialize, Serialize};

use crate::types::validator::{Validator, ValidatorSet};
use crate::types::vote::{Vote, VoteType};
use crate::types::LightBlock;
use crate::Hash;

/// Evidence of a validator double-signing: two votes by the same validator
/// at the same `(height, round, type)` for different blocks.
///
/// The timestamp and validator-set figures are captured from the committed
/// block at the offending height, so they are final by construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateVoteEvidence {
    pub vote_a: Vote,
    pub vote_b: Vote,
    /// Total voting power of the validator set at the offending height.
    pub total_voting_power: u64,
    /// Voting power of the offender at the offending height.
    pub validator_power: u64,
    /// Header time of the block at the offending height, in ms.
    pub timestamp: u64,
}

impl DuplicateVoteEvidence {
    /// Form evidence from a conflicting vote pair plus the finalized block
    /// time and validator set at the offending height.
    ///
    /// The votes are stored in deterministic order (by voted block hash) so
    /// `(A, B)` and `(B, A)` reports hash identically. Returns `None` if the
    /// offender is not in the given validator set.
    pub fn new(
        vote_a: Vote,
        vote_b: Vote,
        block_time: u64,
        validators: &ValidatorSet,
    ) -> Option<Self> {
        let offender = validators.by_address(&vote_a.validator_address)?;
        let validator_power = offender.voting_power;
        let total_voting_power = validators.total_voting_power();
        let (vote_a, vote_b) = if block_sort_key(&vote_a) <= block_sort_key(&vote_b) {
            (vote_a, vote_b)
        } else {
            (vote_b, vote_a)
        };
        Some(DuplicateVoteEvidence {
            vote_a,
            vote_b,
            total_voting_power,
            validator_power,
            timestamp: block_time,
        })
    }
}

fn block_sort_key(vote: &Vote) -> Hash {
    vote.block_hash.unwrap_or([0u8; 32])
}

/// Evidence of a light-client attack: a header conflicting with the
/// canonical chain, signed by a subset of a historical validator set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientAttackEvidence {
    /// The conflicting signed header and the set that signed it.
    pub conflicting_block: LightBlock,
    /// Latest height at which the attacked light client and the chain agree.
    pub common_height: u64,
    /// The validators who signed both the honest and the conflicting header,
    /// in canonical order (descending power, address tie-break).
    pub byzantine_validators: Vec<Validator>,
    /// Total voting power of the validator set at the common height.
    pub total_voting_power: u64,
    /// Header time of the block at the common height, in ms.
    pub timestamp: u64,
}

/// Evidence of Byzantine behavior. The taxonomy is sealed: these two
/// variants are the only provable offenses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evidence {
    DuplicateVote(DuplicateVoteEvidence),
    LightClientAttack(LightClientAttackEvidence),
}

impl Evidence {
    /// The height the offense happened at.
    pub fn height(&self) -> u64 {
        match self {
            Evidence::DuplicateVote(dve) => dve.vote_a.height,
            Evidence::LightClientAttack(lca) => lca.common_height,
        }
    }

    /// The block-derived timestamp the offense is anchored to, in ms.
    pub fn time(&self) -> u64 {
        match self {
            Evidence::DuplicateVote(dve) => dve.timestamp,
            Evidence::LightClientAttack(lca) => lca.timestamp,
        }
    }

    /// Deterministic content hash; two items are the same evidence iff their
    /// hashes are equal.
    ///
    /// Duplicate-vote identity covers the offense itself (the two vote
    /// identities), not the captured power figures, so a peer's copy and a
    /// locally formed copy of the same offense deduplicate. Light-client
    /// attack identity is the hash of the conflicting header.
    pub fn hash(&self) -> Hash {
        match self {
            Evidence::DuplicateVote(dve) => {
                let a = vote_identity(&dve.vote_a);
                let b = vote_identity(&dve.vote_b);
                crate::hash_domain(
                    b"argus.evidence.duplicate_vote",
                    &crate::hash_concat(&[&a, &b]),
                )
            }
            Evidence::LightClientAttack(lca) => crate::hash_domain(
                b"argus.evidence.light_client_attack",
                &lca.conflicting_block.signed_header.header.hash(),
            ),
        }
    }

    /// Canonical encoding: the form persisted in the pending set and counted
    /// against a proposer's byte budget.
    pub fn bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn equal(&self, other: &Evidence) -> bool {
        self.hash() == other.hash()
    }
}

/// Canonical bytes of the offense half of a vote: everything a double-sign
/// is judged on, nothing that can vary between honest observers.
fn vote_identity(vote: &Vote) -> Vec<u8> {
    let type_byte = match vote.vote_type {
        VoteType::Prevote => 1u8,
        VoteType::Precommit => 2u8,
    };
    let mut data = Vec::with_capacity(80);
    data.push(type_byte);
    data.extend_from_slice(&vote.height.to_le_bytes());
    data.extend_from_slice(&vote.round.to_le_bytes());
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
