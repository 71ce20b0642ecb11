//! The evidence pool: pending and committed sets, the consensus buffer, and
//! the per-block update engine.
//!
//! Concurrency model: a single coarse mutex guards the cached replicated
//! state, the consensus buffer and the expiry cursor; the size counter is
//! atomic; the store and the broadcast list carry their own synchronization.
//! `add_evidence`, `pending_evidence`, `size` and `state` may be called from
//! any thread; `report_conflicting_votes` from the consensus thread;
//! `update` and `check_evidence` only from the block executor, which
//! serializes them by construction.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::list::{BroadcastList, ListEntry};
use crate::state::{BlockStore, State, StateStore};
use crate::store::{self, EvidenceStore, StoreError};
use crate::types::{sort_by_voting_power, DuplicateVoteEvidence, Evidence, Vote};
use crate::verify;
use crate::Hash;

/// Errors surfaced to callers of the pool's user-initiated operations.
///
/// Re-submitting evidence that is already pending or already committed is a
/// silent no-op, not an error: the sender is merely behind.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Verification failed; the submitting peer may be punished upstream.
    #[error("invalid evidence: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to load state: {0}")]
    State(String),
}

struct PoolInner {
    /// Most recent replicated state, refreshed by every `update`.
    state: State,
    /// Conflicting vote pairs from consensus, awaiting the commit of the
    /// height they happened at. Never flows into the pending set except
    /// through `process_consensus_buffer`.
    consensus_buffer: Vec<(Vote, Vote)>,
    /// Earliest (height, time) past which pending items must be re-scanned
    /// for expiry.
    pruning_height: u64,
    pruning_time: u64,
}

/// Pool of verified evidence to be broadcast and proposed.
pub struct Pool {
    store: EvidenceStore,
    list: BroadcastList,
    /// Number of pending evidence items; kept equal to the pending set.
    evidence_size: AtomicU32,
    state_store: Arc<dyn StateStore>,
    block_store: Arc<dyn BlockStore>,
    inner: Mutex<PoolInner>,
}

impl Pool {
    /// Create an evidence pool on the given database.
    ///
    /// If a prior run left pending evidence behind, it is pruned for expiry
    /// and the survivors are loaded back into the size counter and the
    /// broadcast list, so a crash never desynchronizes them from the store.
    pub fn new(
        db: &sled::Db,
        state_store: Arc<dyn StateStore>,
        block_store: Arc<dyn BlockStore>,
    ) -> Result<Self, PoolError> {
        let evidence_store = EvidenceStore::open(db)?;
        let state = state_store
            .load()
            .map_err(|e| PoolError::State(e.to_string()))?;

        let pool = Pool {
            store: evidence_store,
            list: BroadcastList::new(),
            evidence_size: AtomicU32::new(0),
            state_store,
            block_store,
            inner: Mutex::new(PoolInner {
                state,
                consensus_buffer: Vec::new(),
                pruning_height: 0,
                pruning_time: 0,
            }),
        };

        let (pruning_height, pruning_time) = pool.remove_expired_pending_evidence();
        {
            let mut inner = pool.locked();
            inner.pruning_height = pruning_height;
            inner.pruning_time = pruning_time;
        }

        let (pending, _) = pool.list_evidence(store::PREFIX_PENDING, -1)?;
        pool.evidence_size
            .store(pending.len() as u32, Ordering::Relaxed);
        for ev in pending {
            pool.list.push_back(ev);
        }

        Ok(pool)
    }

    /// Verified, uncommitted evidence in `(height, hash)` order, up to
    /// `max_bytes` of canonical encoding (`-1` for no cap), together with
    /// the cumulative encoded size of what is returned.
    ///
    /// This is the operation a proposer calls with its remaining block byte
    /// budget.
    pub fn pending_evidence(&self, max_bytes: i64) -> (Vec<Evidence>, i64) {
        if self.size() == 0 {
            return (Vec::new(), 0);
        }
        match self.list_evidence(store::PREFIX_PENDING, max_bytes) {
            Ok(listed) => listed,
            Err(err) => {
                tracing::error!(%err, "failed to retrieve pending evidence");
                (Vec::new(), 0)
            }
        }
    }

    /// Reconcile the pool with a freshly committed block:
    ///
    /// 1. Form duplicate-vote evidence from buffered conflicting votes, now
    ///    that the block at their height has a final time and validator set.
    /// 2. Cache the new state (expiry parameters included).
    /// 3. Move evidence committed in this block from pending to committed.
    /// 4. Prune expired pending evidence once the expiry cursor is passed.
    ///
    /// # Panics
    ///
    /// Panics if `state.last_block_height` does not strictly increase; the
    /// block executor calling out of order is unrecoverable.
    pub fn update(&self, state: State, committed: &[Evidence]) {
        {
            let mut inner = self.locked();
            if state.last_block_height <= inner.state.last_block_height {
                panic!(
                    "evidence pool update with non-increasing height: {} <= {}",
                    state.last_block_height, inner.state.last_block_height,
                );
            }
            tracing::debug!(
                last_block_height = state.last_block_height,
                last_block_time = state.last_block_time,
                "updating evidence pool"
            );
            self.process_consensus_buffer(&mut inner, &state);
            inner.state = state.clone();
        }

        self.mark_committed(committed, state.last_block_height);

        let (pruning_height, pruning_time) = {
            let inner = self.locked();
            (inner.pruning_height, inner.pruning_time)
        };
        if self.size() > 0
            && state.last_block_height > pruning_height
            && state.last_block_time > pruning_time
        {
            let (height, time) = self.remove_expired_pending_evidence();
            let mut inner = self.locked();
            inner.pruning_height = height;
            inner.pruning_time = time;
        }
    }

    /// Verify evidence received from a peer and admit it to the pool.
    ///
    /// Re-submissions of pending or committed evidence return `Ok` without
    /// effect.
    pub fn add_evidence(&self, ev: Evidence) -> Result<(), PoolError> {
        tracing::debug!(height = ev.height(), "attempting to add evidence");

        // Already verified on a previous submission.
        if self.is_pending(&ev) {
            tracing::debug!(height = ev.height(), "evidence already pending; ignoring");
            return Ok(());
        }
        // The sending peer may simply be behind; not punishable.
        if self.is_committed(&ev) {
            tracing::debug!(height = ev.height(), "evidence already committed; ignoring");
            return Ok(());
        }

        let state = self.state();
        verify::verify(
            &ev,
            &state,
            self.state_store.as_ref(),
            self.block_store.as_ref(),
        )
        .map_err(|e| PoolError::Invalid(e.to_string()))?;

        self.add_pending(&ev)?;
        self.list.push_back(ev);

        tracing::info!("verified new evidence of byzantine behavior");
        Ok(())
    }

    /// Buffer a conflicting vote pair observed by consensus mid-height.
    ///
    /// The pair is not verified (consensus only hands over pairs it already
    /// validated) and nothing becomes pending until the next `update`, when
    /// the offending height's time and validator set are final.
    pub fn report_conflicting_votes(&self, vote_a: Vote, vote_b: Vote) {
        let mut inner = self.locked();
        inner.consensus_buffer.push((vote_a, vote_b));
    }

    /// Validate the evidence list of a proposed block.
    ///
    /// Items this pool already verified pass a fast equality check; anything
    /// else must not be committed, must verify, and is then admitted so the
    /// pool can serve it onward. Two items with equal hash inside one block
    /// are illegal regardless of pool state.
    pub fn check_evidence(&self, evidence: &[Evidence]) -> Result<(), PoolError> {
        let mut hashes: Vec<Hash> = Vec::with_capacity(evidence.len());
        for ev in evidence {
            if !self.fast_check(ev) {
                if self.is_committed(ev) {
                    return Err(PoolError::Invalid("evidence was already committed".into()));
                }
                let state = self.state();
                verify::verify(
                    ev,
                    &state,
                    self.state_store.as_ref(),
                    self.block_store.as_ref(),
                )
                .map_err(|e| PoolError::Invalid(e.to_string()))?;

                // The evidence is valid even if persisting it fails, so a
                // store error must not reject the block.
                match self.add_pending(ev) {
                    Ok(()) => self.list.push_back(ev.clone()),
                    Err(err) => {
                        tracing::error!(%err, "failed to add checked evidence to the pending set");
                    }
                }
                tracing::info!("verified new evidence of byzantine behavior");
            }

            let hash = ev.hash();
            if hashes.contains(&hash) {
                return Err(PoolError::Invalid("duplicate evidence".into()));
            }
            hashes.push(hash);
        }
        Ok(())
    }

    /// The oldest broadcastable evidence, if any.
    pub fn evidence_front(&self) -> Option<ListEntry> {
        self.list.front()
    }

    /// The oldest broadcastable evidence strictly after `seq`; the gossip
    /// loop iterates by feeding each returned sequence back in.
    pub fn evidence_after(&self, seq: u64) -> Option<ListEntry> {
        self.list.after(seq)
    }

    /// Wait until there is evidence to broadcast. Resolves immediately if
    /// the list is already non-empty.
    pub async fn wait_for_evidence(&self) {
        self.list.wait_non_empty().await;
    }

    /// Number of pending evidence items. O(1) and lock-free.
    pub fn size(&self) -> u32 {
        self.evidence_size.load(Ordering::Relaxed)
    }

    /// Snapshot of the cached replicated state.
    pub fn state(&self) -> State {
        self.locked().state.clone()
    }

    /// Whether this exact evidence is in the pending set. A store error is
    /// logged and answered `false`; verification will re-screen the item.
    pub fn is_pending(&self, ev: &Evidence) -> bool {
        match self.store.has(&store::key_pending(ev)) {
            Ok(found) => found,
            Err(err) => {
                tracing::error!(%err, "failed to look up pending evidence");
                false
            }
        }
    }

    /// Whether this exact evidence already appeared in a committed block.
    /// A store error is logged and answered `false`.
    pub fn is_committed(&self, ev: &Evidence) -> bool {
        match self.store.has(&store::key_committed(ev)) {
            Ok(found) => found,
            Err(err) => {
                tracing::error!(%err, "failed to look up committed evidence");
                false
            }
        }
    }

    fn locked(&self) -> MutexGuard<'_, PoolInner> {
        // The only panic while holding this lock is the update height
        // regression, which aborts reconciliation before any mutation;
        // recovering the guard is safe.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fast path for `check_evidence`: can the pool vouch for this item
    /// without re-verifying?
    ///
    /// For duplicate votes, presence in the pending set suffices. For
    /// light-client attacks the stored byzantine validator list must also
    /// match the proposed one in length, content and canonical order — a
    /// proposer must not smuggle a different offender list under a known
    /// conflicting header.
    fn fast_check(&self, ev: &Evidence) -> bool {
        let lca = match ev {
            Evidence::DuplicateVote(_) => return self.is_pending(ev),
            Evidence::LightClientAttack(lca) => lca,
        };

        let stored_bytes = match self.store.get(&store::key_pending(ev)) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return false,
            Err(err) => {
                tracing::error!(%err, "failed to load pending light client attack evidence");
                return false;
            }
        };
        let trusted = match bincode::deserialize::<Evidence>(&stored_bytes) {
            Ok(Evidence::LightClientAttack(trusted)) => trusted,
            Ok(Evidence::DuplicateVote(_)) => return false,
            Err(err) => {
                tracing::error!(%err, "failed to decode pending light client attack evidence");
                return false;
            }
        };

        if trusted.byzantine_validators.len() != lca.byzantine_validators.len() {
            return false;
        }
        let mut proposed = lca.byzantine_validators.clone();
        sort_by_voting_power(&mut proposed);
        trusted
            .byzantine_validators
            .iter()
            .zip(&proposed)
            .all(|(t, p)| t.address == p.address && t.voting_power == p.voting_power)
    }

    /// Persist evidence into the pending set and bump the size counter.
    /// Pre-condition: the caller checked `is_pending`.
    fn add_pending(&self, ev: &Evidence) -> Result<(), StoreError> {
        let bytes = ev
            .bytes()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set(&store::key_pending(ev), &bytes)?;
        self.evidence_size.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Move the block's evidence out of the pending set and record committed
    /// markers. Store errors are logged and skipped: the batch write gates
    /// every in-memory mutation, so the pool stays self-consistent.
    fn mark_committed(&self, evidence: &[Evidence], height: u64) {
        let mut batch = sled::Batch::default();
        let mut removed: HashSet<Hash> = HashSet::new();

        for ev in evidence {
            if self.is_pending(ev) {
                batch.remove(store::key_pending(ev));
                removed.insert(ev.hash());
            }

            // The block store retains the full evidence; the marker only
            // needs the height it was committed at.
            let marker = match bincode::serialize(&height) {
                Ok(marker) => marker,
                Err(err) => {
                    tracing::error!(%err, "failed to encode committed evidence marker");
                    continue;
                }
            };
            if let Err(err) = self.store.set(&store::key_committed(ev), &marker) {
                tracing::error!(%err, "failed to save committed evidence");
            }
            tracing::debug!(height = ev.height(), "marked evidence as committed");
        }

        if removed.is_empty() {
            return;
        }
        if let Err(err) = self.store.write_sync(batch) {
            tracing::error!(%err, "failed to batch delete pending evidence");
            return;
        }
        self.list.remove_hashes(&removed);
        self.evidence_size
            .fetch_sub(removed.len() as u32, Ordering::Relaxed);
    }

    /// Evidence under `prefix` in key order, stopping before the item that
    /// would push the cumulative encoded size past `max_bytes` (`-1` for no
    /// cap). Returns the items and their cumulative size.
    fn list_evidence(&self, prefix: u8, max_bytes: i64) -> Result<(Vec<Evidence>, i64), PoolError> {
        let mut evidence = Vec::new();
        let mut total_size: i64 = 0;

        for item in self.store.scan_prefix(prefix) {
            let (_, value) = item?;
            let with_item = total_size + value.len() as i64;
            if max_bytes != -1 && with_item > max_bytes {
                return Ok((evidence, total_size));
            }
            let ev: Evidence = bincode::deserialize(&value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            total_size = with_item;
            evidence.push(ev);
        }
        Ok((evidence, total_size))
    }

    /// Walk the pending set in key order, batch-deleting expired items, and
    /// return the next `(height, time)` at which a prune can matter again.
    fn remove_expired_pending_evidence(&self) -> (u64, u64) {
        let mut batch = sled::Batch::default();
        let (height, time, removed) = self.batch_expired_pending_evidence(&mut batch);

        if removed.is_empty() {
            return (height, time);
        }
        tracing::debug!(expired = removed.len(), "removing expired pending evidence");

        if let Err(err) = self.store.write_sync(batch) {
            tracing::error!(%err, "failed to batch delete expired evidence");
            let state = self.state();
            return (state.last_block_height, state.last_block_time);
        }
        self.list.remove_hashes(&removed);
        self.evidence_size
            .fetch_sub(removed.len() as u32, Ordering::Relaxed);

        (height, time)
    }

    fn batch_expired_pending_evidence(
        &self,
        batch: &mut sled::Batch,
    ) -> (u64, u64, HashSet<Hash>) {
        let state = self.state();
        let params = state.evidence_params.clone();
        let mut removed: HashSet<Hash> = HashSet::new();

        for item in self.store.scan_prefix(store::PREFIX_PENDING) {
            let (key, value) = match item {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::error!(%err, "failed to iterate over pending evidence");
                    return (state.last_block_height, state.last_block_time, removed);
                }
            };
            let ev: Evidence = match bincode::deserialize(&value) {
                Ok(ev) => ev,
                Err(err) => {
                    tracing::error!(%err, "failed to decode pending evidence");
                    continue;
                }
            };

            // Keys are height-ordered, so the first non-expired item tells
            // us when the next prune can possibly remove anything.
            if !is_expired(ev.height(), ev.time(), &state) {
                return (
                    ev.height() + params.max_age_num_blocks + 1,
                    ev.time() + params.max_age_duration_ms + 1_000,
                    removed,
                );
            }

            batch.remove(key);
            removed.insert(ev.hash());
        }

        (state.last_block_height, state.last_block_time, removed)
    }

    /// Turn buffered conflicting votes into duplicate-vote evidence, now
    /// that `state` finalizes the time and validator set at their heights.
    /// The buffer is always left empty.
    fn process_consensus_buffer(&self, inner: &mut PoolInner, state: &State) {
        let buffered = std::mem::take(&mut inner.consensus_buffer);
        for (vote_a, vote_b) in buffered {
            let vote_height = vote_a.height;
            let formed = if vote_height == state.last_block_height {
                DuplicateVoteEvidence::new(
                    vote_a,
                    vote_b,
                    state.last_block_time,
                    &state.last_validators,
                )
            } else if vote_height < state.last_block_height {
                let validators = match self.state_store.load_validators(vote_height) {
                    Ok(validators) => validators,
                    Err(err) => {
                        tracing::error!(
                            height = vote_height,
                            %err,
                            "failed to load validator set for conflicting votes"
                        );
                        continue;
                    }
                };
                let meta = match self.block_store.load_block_meta(vote_height) {
                    Some(meta) => meta,
                    None => {
                        tracing::error!(
                            height = vote_height,
                            "failed to load block time for conflicting votes"
                        );
                        continue;
                    }
                };
                DuplicateVoteEvidence::new(vote_a, vote_b, meta.header.time, &validators)
            } else {
                // Consensus should never hand the pool votes for a height
                // beyond the current state.
                tracing::error!(
                    vote_height,
                    last_block_height = state.last_block_height,
                    "conflicting votes from consensus are ahead of the pool state"
                );
                continue;
            };

            let dve = match formed {
                Some(dve) => dve,
                None => {
                    tracing::error!(
                        height = vote_height,
                        "conflicting votes name a validator missing from the validator set"
                    );
                    continue;
                }
            };
            let ev = Evidence::DuplicateVote(dve);

            if self.is_pending(&ev) {
                tracing::debug!(height = vote_height, "evidence already pending; ignoring");
                continue;
            }
            if self.is_committed(&ev) {
                tracing::debug!(height = vote_height, "evidence already committed; ignoring");
                continue;
            }

            if let Err(err) = self.add_pending(&ev) {
                tracing::error!(
                    %err,
                    "failed to flush conflicting votes into the pending set"
                );
                continue;
            }
            self.list.push_back(ev);

            tracing::info!("verified new evidence of byzantine behavior");
        }
    }
}

/// Whether evidence at `(height, time)` is older than BOTH expiry limits.
fn is_expired(height: u64, time: u64, state: &State) -> bool {
    let params = &state.evidence_params;
    state.last_block_height.saturating_sub(height) > params.max_age_num_blocks
        && state.last_block_time.saturating_sub(time) > params.max_age_duration_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EvidenceParams;
    use crate::types::ValidatorSet;

    fn state_at(height: u64, time: u64, max_blocks: u64, max_ms: u64) -> State {
        State {
            chain_id: [0u8; 32],
            last_block_height: height,
            last_block_time: time,
            evidence_params: EvidenceParams {
                max_age_num_blocks: max_blocks,
                max_age_duration_ms: max_ms,
            },
            last_validators: ValidatorSet::new(vec![]),
        }
    }

    #[test]
    fn expiry_requires_both_limits() {
        let state = state_at(11, 11_000, 5, 10_000);
        // Older than both limits: expired.
        assert!(is_expired(5, 0, &state));
        // Old by blocks only.
        assert!(!is_expired(5, 10_000, &state));
        // Old by time only.
        assert!(!is_expired(10, 0, &state));
    }

    #[test]
    fn expiry_boundary_is_strict() {
        let state = state_at(11, 11_000, 5, 10_000);
        // Exactly at both limits is not yet expired.
        assert!(!is_expired(6, 1_000, &state));
        // One past both limits is.
        assert!(is_expired(5, 999, &state));
    }

    #[test]
    fn future_evidence_never_expires() {
        let state = state_at(11, 11_000, 5, 10_000);
        assert!(!is_expired(20, 30_000, &state));
    }
}
