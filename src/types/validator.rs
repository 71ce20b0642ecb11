//! Validators and validator sets.
//!
//! Sets are kept in canonical order: descending voting power, ties broken by
//! ascending address. Light-client attack evidence carries its byzantine
//! validators in this order, and verification rejects any other.

use serde::{Deserialize, Serialize};

use crate::crypto::SigningPublicKey;
use crate::Hash;

/// A validator registered in the system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Fingerprint of the signing key; the validator's address.
    pub address: Hash,
    /// The validator's signing public key.
    pub public_key: SigningPublicKey,
    /// Voting power at the height the set was captured.
    pub voting_power: u64,
}

impl Validator {
    pub fn new(public_key: SigningPublicKey, voting_power: u64) -> Self {
        let address = public_key.fingerprint();
        Validator {
            address,
            public_key,
            voting_power,
        }
    }
}

/// Sort validators into canonical order: descending voting power, ascending
/// address on ties.
pub fn sort_by_voting_power(validators: &mut [Validator]) {
    validators.sort_by(|a, b| {
        b.voting_power
            .cmp(&a.voting_power)
            .then_with(|| a.address.cmp(&b.address))
    });
}

/// Whether the slice is already in canonical order.
pub fn is_sorted_by_voting_power(validators: &[Validator]) -> bool {
    validators.windows(2).all(|pair| {
        let (a, b) = (&pair[0], &pair[1]);
        a.voting_power > b.voting_power
            || (a.voting_power == b.voting_power && a.address <= b.address)
    })
}

/// The validator set at some height, in canonical order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    /// Build a set, sorting the validators into canonical order.
    pub fn new(mut validators: Vec<Validator>) -> Self {
        sort_by_voting_power(&mut validators);
        ValidatorSet { validators }
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn by_address(&self, address: &Hash) -> Option<&Validator> {
        self.validators.iter().find(|v| v.address == *address)
    }

    /// Sum of all voting power in the set.
    ///
    /// Computed on demand rather than cached so deserialized peer input
    /// cannot claim a total its members don't add up to.
    pub fn total_voting_power(&self) -> u64 {
        self.validators.iter().map(|v| v.voting_power).sum()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Content hash over (address, power) pairs in stored order.
    ///
    /// Headers commit to this hash; a set deserialized in non-canonical
    /// order hashes differently and fails the header cross-check.
    pub fn hash(&self) -> Hash {
        let parts: Vec<Vec<u8>> = self
            .validators
            .iter()
            .map(|v| {
                let mut part = Vec::with_capacity(40);
                part.extend_from_slice(&v.address);
                part.extend_from_slice(&v.voting_power.to_le_bytes());
                part
            })
            .collect();
        let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
        crate::hash_domain(b"argus.validator_set", &crate::hash_concat(&refs))
    }
}
