//! Validator signing keys using CRYSTALS-Dilithium.
//!
//! Dilithium5 provides NIST security level 5 (~256-bit classical, ~128-bit
//! quantum). Evidence verification re-checks vote and commit signatures made
//! with these keys; the pool itself never signs anything.

use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{
    DetachedSignature as SigTrait, PublicKey as SignPkTrait, SecretKey as SignSkTrait,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::Hash;

// Expected sizes for validation
const DILITHIUM5_PK_BYTES: usize = 2592;
const DILITHIUM5_SIG_BYTES: usize = 4627;

/// A CRYSTALS-Dilithium5 signing public key (2592 bytes).
///
/// Inner bytes are `pub(crate)` to prevent external construction of
/// unvalidated keys. Use [`SigningKeypair::generate`] or deserialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningPublicKey(pub(crate) Vec<u8>);

/// A CRYSTALS-Dilithium5 signing secret key.
///
/// The inner bytes are `pub(crate)` to prevent external crates from reading
/// or constructing secret keys directly. Use [`SigningKeypair::generate`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningSecretKey(pub(crate) Vec<u8>);

/// A Dilithium5 detached signature (4627 bytes, ML-DSA-87).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(pub(crate) Vec<u8>);

impl Signature {
    /// Access the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        // Reject anything but an exact-size signature to prevent memory
        // exhaustion from peer-supplied evidence.
        if bytes.len() != DILITHIUM5_SIG_BYTES {
            return Err(serde::de::Error::custom(format!(
                "invalid Dilithium5 signature: expected {} bytes, got {}",
                DILITHIUM5_SIG_BYTES,
                bytes.len()
            )));
        }
        Ok(Signature(bytes))
    }
}

/// A Dilithium5 signing keypair.
///
/// Only test and tooling code generates keypairs here; the pool verifies
/// signatures made by validators elsewhere in the system.
#[derive(Clone)]
pub struct SigningKeypair {
    pub public: SigningPublicKey,
    pub secret: SigningSecretKey,
}

impl SigningKeypair {
    /// Generate a new random Dilithium5 keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium5::keypair();
        SigningKeypair {
            public: SigningPublicKey(pk.as_bytes().to_vec()),
            secret: SigningSecretKey(sk.as_bytes().to_vec()),
        }
    }

    /// Sign a message, producing a detached signature.
    ///
    /// If the internal secret key is somehow corrupted, logs an error and
    /// returns an all-zero signature instead of panicking. Such a signature
    /// always fails verification, so no security property is lost.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sk = match dilithium5::SecretKey::from_bytes(&self.secret.0) {
            Ok(sk) => sk,
            Err(_) => {
                tracing::error!("SigningKeypair::sign called with corrupted secret key");
                return Signature(vec![0u8; DILITHIUM5_SIG_BYTES]);
            }
        };
        let sig = dilithium5::detached_sign(message, &sk);
        Signature(sig.as_bytes().to_vec())
    }
}

impl SigningPublicKey {
    /// Access the raw public key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Verify a detached signature against this public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let pk = match dilithium5::PublicKey::from_bytes(&self.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig = match dilithium5::DetachedSignature::from_bytes(&signature.0) {
            Ok(s) => s,
            Err(_) => return false,
        };
        dilithium5::verify_detached_signature(&sig, message, &pk).is_ok()
    }

    /// Derive a compact fingerprint (BLAKE3 hash of the public key).
    ///
    /// The fingerprint is the validator's address throughout the pool.
    pub fn fingerprint(&self) -> Hash {
        crate::hash_domain(b"argus.signing.fingerprint", &self.0)
    }
}

impl Serialize for SigningPublicKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for SigningPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        // Validate key size on deserialization to prevent malformed keys
        if bytes.len() != DILITHIUM5_PK_BYTES {
            return Err(serde::de::Error::custom(format!(
                "invalid Dilithium5 public key: expected {} bytes, got {}",
                DILITHIUM5_PK_BYTES,
                bytes.len()
            )));
        }
        Ok(SigningPublicKey(bytes))
    }
}
