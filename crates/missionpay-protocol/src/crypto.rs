//! Cryptographic utilities
//!
//! Payment proofs are signed with Ed25519. Keys and signatures travel as
//! hex strings.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::Serialize;
pub use missionpay_types::hash_sha256;

use crate::error::{ProtocolError, Result};

/// A keypair for signing payment proofs
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from a seed (32 bytes)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Sign a message, returning the hex signature
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

/// Verify a hex signature against a hex public key
pub fn verify_signature(public_key_hex: &str, message: &[u8], signature_hex: &str) -> Result<()> {
    let public_key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .map_err(|e| ProtocolError::Crypto {
            message: format!("Invalid public key hex: {}", e),
        })?
        .try_into()
        .map_err(|_| ProtocolError::Crypto {
            message: "Public key must be 32 bytes".to_string(),
        })?;

    let verifying_key =
        VerifyingKey::from_bytes(&public_key_bytes).map_err(|e| ProtocolError::Crypto {
            message: format!("Invalid public key: {}", e),
        })?;

    let signature_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|e| ProtocolError::Crypto {
            message: format!("Invalid signature hex: {}", e),
        })?
        .try_into()
        .map_err(|_| ProtocolError::Crypto {
            message: "Signature must be 64 bytes".to_string(),
        })?;

    verifying_key
        .verify(message, &Signature::from_bytes(&signature_bytes))
        .map_err(|e| ProtocolError::Crypto {
            message: format!("Signature verification failed: {}", e),
        })
}

/// Hash any serializable object via its JSON form
pub fn hash_object<T: Serialize>(obj: &T) -> Result<String> {
    let json = serde_json::to_vec(obj).map_err(|e| ProtocolError::Encoding {
        message: e.to_string(),
    })?;
    Ok(hash_sha256(&json))
}
