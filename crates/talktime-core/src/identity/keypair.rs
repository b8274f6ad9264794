//! Local identity derived from an Ed25519 secret
//!
//! The secret is accepted as a hex string (optionally `0x`-prefixed, the
//! way wallet private keys are usually exported). It is decoded once into a
//! signing key; the textual secret is never retained.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::Rng;

use super::did::Did;
use crate::error::{ChatError, ChatResult};

/// Length of the hex-encoded secret (32 bytes).
const SECRET_HEX_LEN: usize = 64;

/// The signing identity of the local participant.
///
/// Deliberately not `Clone`: share it behind an `Arc` so exactly one copy of
/// the key material lives in memory.
pub struct LocalIdentity {
    signing: SigningKey,
    did: Did,
}

impl LocalIdentity {
    /// Derive an identity from a hex-encoded 32-byte secret.
    ///
    /// Deterministic: the same secret always yields the same [`Did`].
    ///
    /// # Errors
    ///
    /// `ChatError::InvalidSecret` if the secret is not exactly 64 hex
    /// characters after stripping an optional `0x` prefix.
    pub fn from_secret(secret: &str) -> ChatResult<Self> {
        let trimmed = secret.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if hex_part.len() != SECRET_HEX_LEN {
            return Err(ChatError::InvalidSecret(format!(
                "expected {} hex characters, got {}",
                SECRET_HEX_LEN,
                hex_part.len()
            )));
        }

        let mut seed = [0u8; 32];
        hex::decode_to_slice(hex_part, &mut seed)
            .map_err(|e| ChatError::InvalidSecret(format!("not valid hex: {}", e)))?;

        Ok(Self::from_seed(&seed))
    }

    /// Derive an identity from a raw 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let did = Did::from_public_key(&signing.verifying_key());
        Self { signing, did }
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill(&mut seed);
        Self::from_seed(&seed)
    }

    /// The public identifier of this identity.
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Raw Ed25519 public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// Sign a message, returning the 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("did", &self.did)
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature made by `public_key` over `message`.
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}
