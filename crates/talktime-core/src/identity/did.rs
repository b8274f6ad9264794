//! Decentralized Identifier (DID) implementation
//!
//! Format: `did:talk:z{base58-blake3-hash}`
//!
//! The DID is derived from the BLAKE3 hash of the Ed25519 public key,
//! giving a stable identifier that is cheap to compare and sort.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

const DID_PREFIX: &str = "did:talk:z";

/// Decentralized Identifier for a chat participant
///
/// Two DIDs are equal iff they were derived from the same public key.
/// `Ord` is plain lexicographic string order, which is what writer-set
/// canonicalization relies on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Did(String);

impl Did {
    /// Create a DID from an Ed25519 public key
    ///
    /// 1. Hash the 32 public key bytes with BLAKE3
    /// 2. Encode with base58
    /// 3. Prefix with "did:talk:z"
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Self::from_key_bytes(public_key.as_bytes())
    }

    /// Create a DID from raw public key bytes.
    pub fn from_key_bytes(public_key: &[u8; 32]) -> Self {
        let hash = blake3::hash(public_key);
        let encoded = bs58::encode(hash.as_bytes()).into_string();
        Did(format!("{}{}", DID_PREFIX, encoded))
    }

    /// Get the DID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the identifier part (after "did:talk:z")
    pub fn identifier(&self) -> &str {
        &self.0[DID_PREFIX.len()..]
    }

    /// Short form for logs and headers
    pub fn short(&self) -> String {
        self.identifier().chars().take(8).collect()
    }

    fn validate_format(did_str: &str) -> Result<(), ChatError> {
        let parts: Vec<&str> = did_str.split(':').collect();

        if parts.len() != 3 {
            return Err(ChatError::Identity(
                "DID must have 3 parts separated by ':'".to_string(),
            ));
        }

        if parts[0] != "did" {
            return Err(ChatError::Identity("DID must start with 'did:'".to_string()));
        }

        if parts[1] != "talk" {
            return Err(ChatError::Identity("DID method must be 'talk'".to_string()));
        }

        let Some(identifier) = parts[2].strip_prefix('z') else {
            return Err(ChatError::Identity(
                "DID identifier must start with 'z' (multibase prefix)".to_string(),
            ));
        };

        if identifier.is_empty() {
            return Err(ChatError::Identity(
                "DID identifier cannot be empty".to_string(),
            ));
        }

        let decoded = bs58::decode(identifier).into_vec().map_err(|_| {
            ChatError::Identity("Invalid base58 encoding in DID identifier".to_string())
        })?;

        if decoded.len() != 32 {
            return Err(ChatError::Identity(format!(
                "DID identifier must decode to 32 bytes, got {}",
                decoded.len()
            )));
        }

        Ok(())
    }

    /// Parse a DID from a string
    pub fn parse(did_str: &str) -> Result<Self, ChatError> {
        Self::validate_format(did_str)?;
        Ok(Did(did_str.to_string()))
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Did {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
