//! # Argus
//!
//! The Byzantine evidence pool of a BFT replica. The pool is the source of
//! truth for evidence of validator misbehavior:
//!
//! - **Collects** conflicting vote pairs observed by consensus mid-height and
//!   evidence gossiped by peers.
//! - **Verifies** every item against authoritative chain history before
//!   admitting it.
//! - **Persists** pending and committed evidence in a sled tree with
//!   crash-safe batching, so a restart never loses or duplicates evidence.
//! - **Broadcasts** pending evidence through a concurrent FIFO list that the
//!   gossip reactor iterates without coordination.
//! - **Retires** evidence once it is committed in a block, or once it ages
//!   past the consensus-governed expiry window.
//!
//! Block proposers drain the pool via [`pool::Pool::pending_evidence`] so the
//! network can slash offenders; the block executor drives reconciliation via
//! [`pool::Pool::update`] once per committed height.

pub mod crypto;
pub mod list;
pub mod pool;
pub mod state;
pub mod store;
pub mod types;
pub mod verify;

/// Protocol constants
pub mod constants {
    /// Default maximum evidence age in blocks before it may be pruned.
    pub const DEFAULT_MAX_AGE_NUM_BLOCKS: u64 = 100_000;
    /// Default maximum evidence age in milliseconds (48 hours).
    pub const DEFAULT_MAX_AGE_DURATION_MS: u64 = 48 * 60 * 60 * 1_000;
}

/// 32-byte hash used throughout the protocol
pub type Hash = [u8; 32];

/// Compute a domain-separated BLAKE3 hash.
///
/// The domain MUST be valid UTF-8 (all Argus domains use ASCII). Panics at
/// runtime if the domain is not valid UTF-8 — this is a programming error.
pub fn hash_domain(domain: &[u8], data: &[u8]) -> Hash {
    let domain_str = std::str::from_utf8(domain).expect("hash_domain: domain must be valid UTF-8");
    let mut hasher = blake3::Hasher::new_derive_key(domain_str);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Compute BLAKE3 hash of length-prefixed concatenated slices.
///
/// Each part is prefixed with its length as a little-endian u64, preventing
/// ambiguous concatenation (e.g., `["AB","C"]` vs `["A","BC"]`).
pub fn hash_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_domain_separates() {
        let a = hash_domain(b"argus.a", b"payload");
        let b = hash_domain(b"argus.b", b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn hash_concat_is_unambiguous() {
        let a = hash_concat(&[b"AB", b"C"]);
        let b = hash_concat(&[b"A", b"BC"]);
        assert_ne!(a, b);
    }
}
