//! Identity types for missionpay
//!
//! Generated identifiers are strongly typed wrappers around UUIDs so mission,
//! agent and execution ids can never be mixed up. Ledger-facing names
//! (accounts, tokens, networks, transaction hashes) are string newtypes because
//! their format belongs to the external ledger.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

/// Macro to generate string-backed names owned by the external ledger
macro_rules! define_name_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

// Orchestration identity types
define_id_type!(MissionId, "mission", "Unique identifier for a mission");
define_id_type!(AgentId, "agent", "Unique identifier for an independently operated agent");
define_id_type!(ExecutionId, "exec", "Unique identifier for an agent execution record");

// Escalation identity types
define_id_type!(ValidationId, "validation", "Unique identifier for a validation request");
define_id_type!(AssertionId, "assertion", "Unique identifier for a bonded dispute assertion");

// Ledger names
define_name_type!(AccountId, "Ledger account (address) that can hold and send tokens");
define_name_type!(TokenId, "Token contract identity");
define_name_type!(NetworkId, "Ledger network identity");

impl TokenId {
    /// The default settlement stablecoin
    pub fn usdc() -> Self {
        Self::new("USDC")
    }
}

/// Reference to a ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl TxHash {
    /// Build a `0x`-prefixed hash from a 32-byte digest
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of data, hex encoded
pub fn hash_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_sha256_is_lowercase_hex() {
        assert_eq!(
            hash_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_id_display_and_parse() {
        let id = MissionId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("mission_"));
        assert_eq!(MissionId::parse(&shown).unwrap(), id);
        assert_eq!(MissionId::parse(&id.0.to_string()).unwrap(), id);
    }

    #[test]
    fn test_tx_hash_from_digest() {
        let hash = TxHash::from_digest(&[0xab; 32]);
        assert!(hash.as_str().starts_with("0xabab"));
        assert_eq!(hash.as_str().len(), 66);
    }
}
