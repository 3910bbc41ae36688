//! # Decentralized Identifiers
//!
//! Agent identities are DIDs anchored in a chain registry:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          DID FORMAT                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Example: did:sage:ethereum:0x1234abcd...                              │
//! │                                                                         │
//! │  ┌─────────┬─────────┬───────────┬──────────────────────────────┐      │
//! │  │ Scheme  │ Method  │  Chain    │     Chain-native identifier  │      │
//! │  ├─────────┼─────────┼───────────┼──────────────────────────────┤      │
//! │  │  did    │  sage   │ ethereum  │  0x + 40 hex (address)       │      │
//! │  │  did    │  sage   │ solana    │  base58 (32-byte key)        │      │
//! │  └─────────┴─────────┴───────────┴──────────────────────────────┘      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Unlike self-certifying `did:key` identifiers, a `did:sage` identity is
//! anchored on-chain: the registry maps the DID to agent metadata and
//! signing keys, and only the owning address can mutate it.
//!
//! ## Module Hierarchy
//!
//! - [`chain`] - chain tags and key-algorithm policy
//! - [`metadata`] - agent metadata and key records
//! - [`resolver`] - per-chain resolution, caching, the default registry
//! - [`registry`] - on-chain registration client (retry, gas, commit-reveal)
//! - [`rpc`] - abstract chain contract surface + in-memory test chain

pub mod chain;
pub mod metadata;
pub mod registry;
pub mod resolver;
pub mod rpc;

pub use chain::{rfc9421_algorithm, validate_key_type_for_chain, Chain};
pub use metadata::{AgentKey, AgentMetadata, VerificationResult};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The DID method prefix for sage identities
pub const DID_PREFIX: &str = "did:sage:";

/// Minimum length of a well-formed DID string
pub const MIN_DID_LENGTH: usize = 12;

/// A validated `did:sage` identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentDid {
    value: String,
    chain: Chain,
}

impl AgentDid {
    /// Parse and validate a DID string
    ///
    /// ## Validation
    ///
    /// - At least 12 characters, exactly four `:`-separated parts
    /// - Must start with `did:sage:`
    /// - Chain tag must be recognized
    /// - Identifier must be chain-native: `0x` + 40 hex on
    ///   Ethereum-family chains, base58 of 32 bytes on Solana
    pub fn parse(did: &str) -> Result<Self> {
        if did.len() < MIN_DID_LENGTH {
            return Err(Error::InvalidDid(format!(
                "DID must be at least {} characters, got {}",
                MIN_DID_LENGTH,
                did.len()
            )));
        }

        let parts: Vec<&str> = did.split(':').collect();
        if parts.len() != 4 {
            return Err(Error::InvalidDid(format!(
                "DID must have four colon-separated parts, got {}",
                parts.len()
            )));
        }
        if parts[0] != "did" || parts[1] != "sage" {
            return Err(Error::InvalidDid(format!(
                "DID must start with '{}', got '{}'",
                DID_PREFIX, did
            )));
        }

        let chain = Chain::parse(parts[2])?;
        validate_identifier(chain, parts[3])?;

        Ok(Self {
            value: did.to_string(),
            chain,
        })
    }

    /// Build a DID from a chain and a chain-native identifier
    pub fn new(chain: Chain, identifier: &str) -> Result<Self> {
        Self::parse(&format!("{}{}:{}", DID_PREFIX, chain.tag(), identifier))
    }

    /// The chain this identity is anchored on
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// The chain-native identifier (address or base58 key)
    pub fn identifier(&self) -> &str {
        self.value.rsplit(':').next().unwrap_or_default()
    }

    /// The full DID string
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

fn validate_identifier(chain: Chain, identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(Error::InvalidDid("Empty chain identifier".into()));
    }
    if chain.is_ethereum_family() {
        let hex_part = identifier
            .strip_prefix("0x")
            .ok_or_else(|| Error::InvalidDid("Ethereum address must start with 0x".into()))?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidDid(
                "Ethereum address must be 0x followed by 40 hex digits".into(),
            ));
        }
    }
    if chain == Chain::Solana {
        let decoded = bs58::decode(identifier)
            .into_vec()
            .map_err(|e| Error::InvalidDid(format!("Invalid base58 identifier: {}", e)))?;
        if decoded.len() != 32 {
            return Err(Error::InvalidDid(format!(
                "Solana identifier must decode to 32 bytes, got {}",
                decoded.len()
            )));
        }
    }
    Ok(())
}

impl std::fmt::Display for AgentDid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl std::str::FromStr for AgentDid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for AgentDid {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl TryFrom<String> for AgentDid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AgentDid> for String {
    fn from(did: AgentDid) -> Self {
        did.value
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ETH_DID: &str = "did:sage:ethereum:0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn test_parse_ethereum_did() {
        let did = AgentDid::parse(ETH_DID).unwrap();
        assert_eq!(did.chain(), Chain::Ethereum);
        assert_eq!(
            did.identifier(),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }

    #[test]
    fn test_parse_solana_did() {
        let key = bs58::encode(&[7u8; 32]).into_string();
        let did = AgentDid::new(Chain::Solana, &key).unwrap();
        assert_eq!(did.chain(), Chain::Solana);
        assert_eq!(did.identifier(), key);
    }

    #[test]
    fn test_reject_wrong_method() {
        assert!(AgentDid::parse("did:web:example.com:agent").is_err());
        assert!(AgentDid::parse("did:key:z6Mkha:x").is_err());
    }

    #[test]
    fn test_reject_wrong_part_count() {
        assert!(AgentDid::parse("did:sage:ethereum").is_err());
        assert!(AgentDid::parse("did:sage:ethereum:0xabc:extra").is_err());
    }

    #[test]
    fn test_reject_short_did() {
        assert!(AgentDid::parse("did:sage:x:").is_err());
    }

    #[test]
    fn test_reject_unknown_chain() {
        let result = AgentDid::parse("did:sage:polkadot:whatever-identifier");
        assert!(matches!(result, Err(Error::ChainNotSupported(_))));
    }

    #[test]
    fn test_reject_bad_ethereum_address() {
        assert!(AgentDid::parse("did:sage:ethereum:5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_err());
        assert!(AgentDid::parse("did:sage:ethereum:0x1234").is_err());
        assert!(AgentDid::parse("did:sage:ethereum:0xZZZZb6053F3E94C9b9A09f33669435E7Ef1BeA").is_err());
    }

    #[test]
    fn test_reject_bad_solana_identifier() {
        // 0 and O are not in the base58 alphabet
        assert!(AgentDid::parse("did:sage:solana:0OIl").is_err());
        // Valid base58 but wrong length
        let short = bs58::encode(&[1u8; 16]).into_string();
        assert!(AgentDid::parse(&format!("did:sage:solana:{}", short)).is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let did = AgentDid::parse(ETH_DID).unwrap();
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, format!("\"{}\"", ETH_DID));
        let restored: AgentDid = serde_json::from_str(&json).unwrap();
        assert_eq!(did, restored);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let result: std::result::Result<AgentDid, _> =
            serde_json::from_str("\"did:sage:nochain:zzz\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_display_and_from_str() {
        let did: AgentDid = ETH_DID.parse().unwrap();
        assert_eq!(did.to_string(), ETH_DID);
    }
}
