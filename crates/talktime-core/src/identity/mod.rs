//! Identity module for TalkTime
//!
//! An identity is an Ed25519 keypair derived deterministically from a
//! secret, plus its public [`Did`]. The DID is used both to authorize writes
//! (it is a member of a log's writer set) and to tell the local
//! participant's messages apart from the peer's.
//!
//! ## Example
//!
//! ```rust
//! use talktime_core::identity::{derive_identity, verify_signature};
//!
//! let secret = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
//! let me = derive_identity(secret).unwrap();
//! assert!(me.did().as_str().starts_with("did:talk:z"));
//!
//! let sig = me.sign(b"hi");
//! assert!(verify_signature(&me.public_key(), b"hi", &sig));
//! ```

mod did;
mod keypair;

pub use did::Did;
pub use keypair::{verify_signature, LocalIdentity};

use crate::error::ChatResult;

/// Derive the local identity from a hex-encoded secret.
///
/// Pure and deterministic; fails with `ChatError::InvalidSecret` when the
/// secret has the wrong length or is not hex.
pub fn derive_identity(secret: &str) -> ChatResult<LocalIdentity> {
    LocalIdentity::from_secret(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_identity_workflow() {
        let secret = "9f".repeat(32);
        let me = derive_identity(&secret).unwrap();

        // DID is derived from the public key alone
        assert_eq!(me.did(), &Did::from_key_bytes(&me.public_key()));

        // Sign and verify
        let message = b"Integration test message";
        let signature = me.sign(message);
        assert!(verify_signature(&me.public_key(), message, &signature));

        // Re-deriving gives an equal identity
        let again = derive_identity(&secret).unwrap();
        assert_eq!(me.did(), again.did());
    }

    #[test]
    fn test_cross_verification() {
        let alice = LocalIdentity::generate();
        let bob = LocalIdentity::generate();

        let message = b"Message from Alice to Bob";
        let alice_signature = alice.sign(message);

        assert!(verify_signature(&alice.public_key(), message, &alice_signature));
        assert!(!verify_signature(&bob.public_key(), message, &alice_signature));
    }
}
