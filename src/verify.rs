//! Evidence verification against authoritative chain history.
//!
//! [`verify`] is the single entry point the pool calls for peer-supplied and
//! block-proposed evidence. Conflicting votes reported by consensus bypass
//! it: consensus already validated those votes, and the pool only forms
//! evidence from them once the offending height has committed.

use crate::state::{BlockStore, State, StateStore};
use crate::types::{
    commit_sign_data, is_sorted_by_voting_power, DuplicateVoteEvidence, Evidence, Header,
    LightClientAttackEvidence, ValidatorSet,
};
use crate::Hash;

/// Why a piece of evidence was rejected.
#[derive(Clone, Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("no committed header at height {0}")]
    MissingHeader(u64),
    #[error("no commit for the block at height {0}")]
    MissingCommit(u64),
    #[error("evidence time {evidence} does not match the header time {header} at its height")]
    TimeMismatch { evidence: u64, header: u64 },
    #[error(
        "evidence from height {height} is too old: \
         {age_blocks} blocks / {age_ms} ms past the limits {max_blocks} / {max_ms}"
    )]
    Expired {
        height: u64,
        age_blocks: u64,
        age_ms: u64,
        max_blocks: u64,
        max_ms: u64,
    },
    #[error("failed to load validators at height {height}: {reason}")]
    ValidatorLookup { height: u64, reason: String },
    #[error("{0}")]
    Invalid(String),
}

fn invalid(reason: impl Into<String>) -> VerifyError {
    VerifyError::Invalid(reason.into())
}

/// Recompute a piece of evidence against authoritative history.
///
/// Checks, in order: the block at the offending height exists and its header
/// time matches the evidence timestamp; the evidence is inside the expiry
/// window; and the variant-specific claims (validator set figures,
/// signatures, byzantine-set shape) hold.
pub fn verify(
    ev: &Evidence,
    state: &State,
    state_store: &dyn StateStore,
    block_store: &dyn BlockStore,
) -> Result<(), VerifyError> {
    let height = ev.height();
    let meta = block_store
        .load_block_meta(height)
        .ok_or(VerifyError::MissingHeader(height))?;
    if ev.time() != meta.header.time {
        return Err(VerifyError::TimeMismatch {
            evidence: ev.time(),
            header: meta.header.time,
        });
    }

    let params = &state.evidence_params;
    let age_blocks = state.last_block_height.saturating_sub(height);
    let age_ms = state.last_block_time.saturating_sub(ev.time());
    if age_blocks > params.max_age_num_blocks && age_ms > params.max_age_duration_ms {
        return Err(VerifyError::Expired {
            height,
            age_blocks,
            age_ms,
            max_blocks: params.max_age_num_blocks,
            max_ms: params.max_age_duration_ms,
        });
    }

    let validators =
        state_store
            .load_validators(height)
            .map_err(|e| VerifyError::ValidatorLookup {
                height,
                reason: e.to_string(),
            })?;

    match ev {
        Evidence::DuplicateVote(dve) => verify_duplicate_vote(dve, &state.chain_id, &validators),
        Evidence::LightClientAttack(lca) => {
            verify_light_client_attack(lca, &state.chain_id, &meta.header, &validators, block_store)
        }
    }
}

/// Check that two votes form a genuine double-sign and that both carry valid
/// signatures from a validator in the set at the offending height.
pub fn verify_duplicate_vote(
    dve: &DuplicateVoteEvidence,
    chain_id: &Hash,
    validators: &ValidatorSet,
) -> Result<(), VerifyError> {
    let a = &dve.vote_a;
    let b = &dve.vote_b;

    if a.validator_address != b.validator_address {
        return Err(invalid("votes are from different validators"));
    }
    if a.height != b.height {
        return Err(invalid("votes are from different heights"));
    }
    if a.round != b.round {
        return Err(invalid("votes are from different rounds"));
    }
    if a.vote_type != b.vote_type {
        return Err(invalid("votes are of different types"));
    }
    if a.block_hash == b.block_hash {
        return Err(invalid("votes are for the same block"));
    }

    let offender = validators
        .by_address(&a.validator_address)
        .ok_or_else(|| invalid("offending validator is not in the set at the evidence height"))?;
    if dve.validator_power != offender.voting_power {
        return Err(invalid(format!(
            "claimed validator power {} does not match the set's {}",
            dve.validator_power, offender.voting_power
        )));
    }
    let total = validators.total_voting_power();
    if dve.total_voting_power != total {
        return Err(invalid(format!(
            "claimed total voting power {} does not match the set's {}",
            dve.total_voting_power, total
        )));
    }

    if !a.verify(chain_id, &offender.public_key) {
        return Err(invalid("invalid signature on the first vote"));
    }
    if !b.verify(chain_id, &offender.public_key) {
        return Err(invalid("invalid signature on the second vote"));
    }
    Ok(())
}

/// Check a light-client attack: the conflicting header must genuinely
/// diverge from the canonical chain, and every claimed byzantine validator
/// must belong to the common-height set and have signed BOTH the honest
/// commit at the common height and the conflicting commit. Signing only the
/// conflicting header proves nothing on its own; an honest validator on a
/// different fork does the same.
pub fn verify_light_client_attack(
    lca: &LightClientAttackEvidence,
    chain_id: &Hash,
    common_header: &Header,
    common_validators: &ValidatorSet,
    block_store: &dyn BlockStore,
) -> Result<(), VerifyError> {
    if lca.byzantine_validators.is_empty() {
        return Err(invalid("byzantine validator set is empty"));
    }
    if !is_sorted_by_voting_power(&lca.byzantine_validators) {
        return Err(invalid(
            "byzantine validators are not sorted by descending voting power",
        ));
    }
    let total = common_validators.total_voting_power();
    if lca.total_voting_power != total {
        return Err(invalid(format!(
            "claimed total voting power {} does not match the common set's {}",
            lca.total_voting_power, total
        )));
    }

    let conflicting = &lca.conflicting_block;
    let header = &conflicting.signed_header.header;
    let commit = &conflicting.signed_header.commit;

    if header.chain_id != *chain_id {
        return Err(invalid("conflicting header belongs to a different chain"));
    }
    if header.height < lca.common_height {
        return Err(invalid("conflicting header is below the common height"));
    }
    if common_header.height != lca.common_height {
        return Err(invalid("common header is not at the common height"));
    }
    if commit.block_hash != header.hash() {
        return Err(invalid("commit does not certify the conflicting header"));
    }
    if conflicting.validator_set.hash() != header.validators_hash {
        return Err(invalid(
            "conflicting header does not commit to its attached validator set",
        ));
    }
    // The attack must actually diverge from what this node committed. If the
    // chain has no block at that height (pruned or beyond the tip) the
    // divergence cannot be checked locally and the remaining checks decide.
    if let Some(canonical) = block_store.load_block_meta(header.height) {
        if canonical.block_hash == header.hash() {
            return Err(invalid("conflicting header matches the canonical chain"));
        }
    }

    // What convicts a validator is the pair of signatures: the honest
    // commit at the common height AND the conflicting commit.
    let honest_commit = block_store
        .load_block_commit(lca.common_height)
        .ok_or(VerifyError::MissingCommit(lca.common_height))?;
    let honest_sign_data = commit_sign_data(chain_id, &honest_commit);
    let conflicting_sign_data = commit_sign_data(chain_id, commit);

    for byz in &lca.byzantine_validators {
        let member = common_validators.by_address(&byz.address).ok_or_else(|| {
            invalid("byzantine validator is not in the set at the common height")
        })?;
        if member.voting_power != byz.voting_power {
            return Err(invalid(format!(
                "byzantine validator power {} does not match the common set's {}",
                byz.voting_power, member.voting_power
            )));
        }
        let conflicting_sig = commit
            .signatures
            .iter()
            .find(|s| s.validator_address == byz.address)
            .and_then(|s| s.signature.as_ref())
            .ok_or_else(|| invalid("byzantine validator did not sign the conflicting commit"))?;
        if !member.public_key.verify(&conflicting_sign_data, conflicting_sig) {
            return Err(invalid(
                "invalid conflicting-commit signature from a byzantine validator",
            ));
        }
        let honest_sig = honest_commit
            .signatures
            .iter()
            .find(|s| s.validator_address == byz.address)
            .and_then(|s| s.signature.as_ref())
            .ok_or_else(|| invalid("byzantine validator did not sign the honest commit"))?;
        if !member.public_key.verify(&honest_sign_data, honest_sig) {
            return Err(invalid(
                "invalid honest-commit signature from a byzantine validator",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningKeypair;
    use crate::state::{EvidenceParams, StateStoreError};
    use crate::types::{
        vote_sign_data, BlockMeta, Commit, CommitSig, LightBlock, SignedHeader, Validator, Vote,
        VoteType,
    };
    use std::collections::HashMap;

    struct MapStateStore {
        state: State,
        validators: HashMap<u64, ValidatorSet>,
    }

    impl StateStore for MapStateStore {
        fn load(&self) -> Result<State, StateStoreError> {
            Ok(self.state.clone())
        }
        fn load_validators(&self, height: u64) -> Result<ValidatorSet, StateStoreError> {
            self.validators
                .get(&height)
                .cloned()
                .ok_or(StateStoreError::NoValidators(height))
        }
    }

    struct MapBlockStore {
        metas: HashMap<u64, BlockMeta>,
        commits: HashMap<u64, Commit>,
    }

    impl BlockStore for MapBlockStore {
        fn load_block_meta(&self, height: u64) -> Option<BlockMeta> {
            self.metas.get(&height).cloned()
        }
        fn load_block_commit(&self, height: u64) -> Option<Commit> {
            self.commits.get(&height).cloned()
        }
    }

    fn chain_id() -> Hash {
        crate::hash_domain(b"argus.chain", b"verify-tests")
    }

    fn header_at(height: u64, time: u64, validators: &ValidatorSet) -> Header {
        Header {
            chain_id: chain_id(),
            height,
            time,
            last_block_hash: None,
            validators_hash: validators.hash(),
            proposer_address: [0u8; 32],
        }
    }

    fn signed_vote(kp: &SigningKeypair, height: u64, block_hash: Option<Hash>) -> Vote {
        let mut vote = Vote {
            vote_type: VoteType::Precommit,
            height,
            round: 0,
            block_hash,
            validator_address: kp.public.fingerprint(),
            validator_index: 0,
            timestamp: 0,
            signature: kp.sign(b"placeholder"),
        };
        vote.signature = kp.sign(&vote_sign_data(&chain_id(), &vote));
        vote
    }

    struct Fixture {
        kp: SigningKeypair,
        validators: ValidatorSet,
        state: State,
        state_store: MapStateStore,
        block_store: MapBlockStore,
    }

    fn fixture() -> Fixture {
        let kp = SigningKeypair::generate();
        let validators = ValidatorSet::new(vec![Validator::new(kp.public.clone(), 10)]);
        let state = State {
            chain_id: chain_id(),
            last_block_height: 12,
            last_block_time: 60_000,
            evidence_params: EvidenceParams {
                max_age_num_blocks: 20,
                max_age_duration_ms: 120_000,
            },
            last_validators: validators.clone(),
        };
        let mut metas = HashMap::new();
        metas.insert(
            8,
            BlockMeta {
                block_hash: [8u8; 32],
                header: header_at(8, 40_000, &validators),
            },
        );
        // The honest commit certifying the canonical block at height 8,
        // signed by the full set.
        let mut honest_commit = Commit {
            height: 8,
            round: 0,
            block_hash: [8u8; 32],
            signatures: vec![],
        };
        let honest_sig = kp.sign(&commit_sign_data(&chain_id(), &honest_commit));
        honest_commit.signatures.push(CommitSig {
            validator_address: kp.public.fingerprint(),
            timestamp: 40_000,
            signature: Some(honest_sig),
        });
        let mut commits = HashMap::new();
        commits.insert(8, honest_commit);
        let mut val_map = HashMap::new();
        val_map.insert(8, validators.clone());
        Fixture {
            kp,
            validators: validators.clone(),
            state: state.clone(),
            state_store: MapStateStore {
                state,
                validators: val_map,
            },
            block_store: MapBlockStore { metas, commits },
        }
    }

    fn dve_at_8(f: &Fixture) -> Evidence {
        let a = signed_vote(&f.kp, 8, Some([1u8; 32]));
        let b = signed_vote(&f.kp, 8, Some([2u8; 32]));
        Evidence::DuplicateVote(
            DuplicateVoteEvidence::new(a, b, 40_000, &f.validators).unwrap(),
        )
    }

    #[test]
    fn valid_duplicate_vote_passes() {
        let f = fixture();
        let ev = dve_at_8(&f);
        verify(&ev, &f.state, &f.state_store, &f.block_store).unwrap();
    }

    #[test]
    fn missing_header_is_rejected() {
        let f = fixture();
        let a = signed_vote(&f.kp, 9, Some([1u8; 32]));
        let b = signed_vote(&f.kp, 9, Some([2u8; 32]));
        let ev = Evidence::DuplicateVote(
            DuplicateVoteEvidence::new(a, b, 40_000, &f.validators).unwrap(),
        );
        assert!(matches!(
            verify(&ev, &f.state, &f.state_store, &f.block_store),
            Err(VerifyError::MissingHeader(9))
        ));
    }

    #[test]
    fn time_mismatch_is_rejected() {
        let f = fixture();
        let a = signed_vote(&f.kp, 8, Some([1u8; 32]));
        let b = signed_vote(&f.kp, 8, Some([2u8; 32]));
        let ev = Evidence::DuplicateVote(
            DuplicateVoteEvidence::new(a, b, 40_001, &f.validators).unwrap(),
        );
        assert!(matches!(
            verify(&ev, &f.state, &f.state_store, &f.block_store),
            Err(VerifyError::TimeMismatch { .. })
        ));
    }

    #[test]
    fn expired_evidence_is_rejected() {
        let mut f = fixture();
        f.state.evidence_params = EvidenceParams {
            max_age_num_blocks: 2,
            max_age_duration_ms: 10_000,
        };
        let ev = dve_at_8(&f);
        // age: 4 blocks > 2, 20_000 ms > 10_000 ms
        assert!(matches!(
            verify(&ev, &f.state, &f.state_store, &f.block_store),
            Err(VerifyError::Expired { .. })
        ));
    }

    #[test]
    fn old_by_blocks_alone_is_not_expired() {
        let mut f = fixture();
        f.state.evidence_params = EvidenceParams {
            max_age_num_blocks: 2,
            max_age_duration_ms: 120_000,
        };
        let ev = dve_at_8(&f);
        verify(&ev, &f.state, &f.state_store, &f.block_store).unwrap();
    }

    #[test]
    fn same_block_votes_are_rejected() {
        let f = fixture();
        let a = signed_vote(&f.kp, 8, Some([1u8; 32]));
        let mut dve = DuplicateVoteEvidence::new(
            a.clone(),
            signed_vote(&f.kp, 8, Some([2u8; 32])),
            40_000,
            &f.validators,
        )
        .unwrap();
        dve.vote_b = a;
        let err = verify_duplicate_vote(&dve, &chain_id(), &f.validators).unwrap_err();
        assert!(err.to_string().contains("same block"));
    }

    #[test]
    fn tampered_power_figures_are_rejected() {
        let f = fixture();
        let Evidence::DuplicateVote(mut dve) = dve_at_8(&f) else {
            unreachable!()
        };
        dve.total_voting_power += 1;
        assert!(verify_duplicate_vote(&dve, &chain_id(), &f.validators).is_err());
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let f = fixture();
        let Evidence::DuplicateVote(mut dve) = dve_at_8(&f) else {
            unreachable!()
        };
        let outsider = SigningKeypair::generate();
        dve.vote_b.signature = outsider.sign(&vote_sign_data(&chain_id(), &dve.vote_b));
        assert!(verify_duplicate_vote(&dve, &chain_id(), &f.validators).is_err());
    }

    fn lca_fixture() -> (Fixture, Evidence) {
        let f = fixture();
        // Conflicting header at height 8 signed by the full (single-member) set.
        let mut header = header_at(8, 40_000, &f.validators);
        header.proposer_address = [9u8; 32]; // diverge from the canonical header
        let mut commit = Commit {
            height: 8,
            round: 0,
            block_hash: header.hash(),
            signatures: vec![],
        };
        let sig = f.kp.sign(&commit_sign_data(&chain_id(), &commit));
        commit.signatures.push(CommitSig {
            validator_address: f.kp.public.fingerprint(),
            timestamp: 40_000,
            signature: Some(sig),
        });
        let ev = Evidence::LightClientAttack(LightClientAttackEvidence {
            conflicting_block: LightBlock {
                signed_header: SignedHeader {
                    header,
                    commit,
                },
                validator_set: f.validators.clone(),
            },
            common_height: 8,
            byzantine_validators: f.validators.validators().to_vec(),
            total_voting_power: f.validators.total_voting_power(),
            timestamp: 40_000,
        });
        (f, ev)
    }

    #[test]
    fn valid_light_client_attack_passes() {
        let (f, ev) = lca_fixture();
        verify(&ev, &f.state, &f.state_store, &f.block_store).unwrap();
    }

    #[test]
    fn empty_byzantine_set_is_rejected() {
        let (f, ev) = lca_fixture();
        let Evidence::LightClientAttack(mut lca) = ev else {
            unreachable!()
        };
        lca.byzantine_validators.clear();
        let ev = Evidence::LightClientAttack(lca);
        let err = verify(&ev, &f.state, &f.state_store, &f.block_store).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn unsigned_byzantine_validator_is_rejected() {
        let (f, ev) = lca_fixture();
        let Evidence::LightClientAttack(mut lca) = ev else {
            unreachable!()
        };
        lca.conflicting_block.signed_header.commit.signatures.clear();
        let ev = Evidence::LightClientAttack(lca);
        let err = verify(&ev, &f.state, &f.state_store, &f.block_store).unwrap_err();
        assert!(err.to_string().contains("did not sign the conflicting commit"));
    }

    #[test]
    fn validator_who_only_signed_the_conflicting_header_is_rejected() {
        // Signing the conflicting header alone proves nothing; without a
        // signature on the honest commit at the common height the validator
        // may simply have been on a different fork.
        let (mut f, ev) = lca_fixture();
        f.block_store
            .commits
            .get_mut(&8)
            .expect("fixture has a commit at the common height")
            .signatures
            .clear();
        let err = verify(&ev, &f.state, &f.state_store, &f.block_store).unwrap_err();
        assert!(err.to_string().contains("did not sign the honest commit"));
    }

    #[test]
    fn forged_honest_commit_signature_is_rejected() {
        let (mut f, ev) = lca_fixture();
        let outsider = SigningKeypair::generate();
        let forged = {
            let honest_commit = f
                .block_store
                .commits
                .get(&8)
                .expect("fixture has a commit at the common height");
            outsider.sign(&commit_sign_data(&chain_id(), honest_commit))
        };
        f.block_store.commits.get_mut(&8).unwrap().signatures[0].signature = Some(forged);
        let err = verify(&ev, &f.state, &f.state_store, &f.block_store).unwrap_err();
        assert!(err.to_string().contains("honest-commit signature"));
    }

    #[test]
    fn missing_honest_commit_is_rejected() {
        let (mut f, ev) = lca_fixture();
        f.block_store.commits.remove(&8);
        assert!(matches!(
            verify(&ev, &f.state, &f.state_store, &f.block_store),
            Err(VerifyError::MissingCommit(8))
        ));
    }

    #[test]
    fn header_matching_canonical_chain_is_rejected() {
        let (mut f, ev) = lca_fixture();
        let Evidence::LightClientAttack(lca) = &ev else {
            unreachable!()
        };
        // Make the canonical chain agree with the "conflicting" header.
        let header = lca.conflicting_block.signed_header.header.clone();
        f.block_store.metas.insert(
            8,
            BlockMeta {
                block_hash: header.hash(),
                header,
            },
        );
        let err = verify(&ev, &f.state, &f.state_store, &f.block_store).unwrap_err();
        assert!(err.to_string().contains("canonical"));
    }
}
