//! # Chain Key Policy
//!
//! Which key algorithms each chain accepts for agent registration, which
//! one is recommended, and which RFC 9421 algorithm label the key maps
//! to when signing HTTP messages.
//!
//! | Chain | Allowed | Recommended | RFC 9421 label |
//! |-------|---------|-------------|----------------|
//! | ethereum / sepolia / kairos | Secp256k1 | Secp256k1 | `es256k` |
//! | solana | Ed25519 | Ed25519 | `ed25519` |
//! | bitcoin | Secp256k1 | Secp256k1 | `es256k` |
//! | cosmos | Secp256k1, Ed25519 | Secp256k1 | `es256k` |

use serde::{Deserialize, Serialize};

use crate::crypto::KeyType;
use crate::error::{Error, Result};

/// Chains the registry and resolver understand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Ethereum mainnet
    Ethereum,
    /// Ethereum Sepolia testnet
    Sepolia,
    /// Kaia Kairos testnet
    Kairos,
    /// Solana
    Solana,
    /// Bitcoin
    Bitcoin,
    /// Cosmos
    Cosmos,
}

impl Chain {
    /// Parse a chain tag as it appears in a DID
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "ethereum" => Ok(Chain::Ethereum),
            "sepolia" => Ok(Chain::Sepolia),
            "kairos" => Ok(Chain::Kairos),
            "solana" => Ok(Chain::Solana),
            "bitcoin" => Ok(Chain::Bitcoin),
            "cosmos" => Ok(Chain::Cosmos),
            other => Err(Error::ChainNotSupported(other.to_string())),
        }
    }

    /// The tag used in DIDs and configuration
    pub fn tag(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Sepolia => "sepolia",
            Chain::Kairos => "kairos",
            Chain::Solana => "solana",
            Chain::Bitcoin => "bitcoin",
            Chain::Cosmos => "cosmos",
        }
    }

    /// Whether the chain uses Ethereum-style 0x addresses
    pub fn is_ethereum_family(&self) -> bool {
        matches!(self, Chain::Ethereum | Chain::Sepolia | Chain::Kairos)
    }

    /// Key algorithms the chain accepts for agent registration
    pub fn allowed_key_types(&self) -> &'static [KeyType] {
        match self {
            Chain::Ethereum | Chain::Sepolia | Chain::Kairos | Chain::Bitcoin => {
                &[KeyType::Secp256k1]
            }
            Chain::Solana => &[KeyType::Ed25519],
            Chain::Cosmos => &[KeyType::Secp256k1, KeyType::Ed25519],
        }
    }

    /// The algorithm new registrations should use
    pub fn recommended_key_type(&self) -> KeyType {
        match self {
            Chain::Solana => KeyType::Ed25519,
            _ => KeyType::Secp256k1,
        }
    }

    /// RFC 9421 label for the chain's recommended algorithm
    pub fn rfc9421_label(&self) -> &'static str {
        match self.recommended_key_type() {
            KeyType::Ed25519 => "ed25519",
            _ => "es256k",
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Check that a key algorithm is permitted on a chain
pub fn validate_key_type_for_chain(key_type: KeyType, chain: Chain) -> Result<()> {
    if chain.allowed_key_types().contains(&key_type) {
        Ok(())
    } else {
        Err(Error::WrongKeyForChain(format!(
            "{} keys are not accepted on {}",
            key_type, chain
        )))
    }
}

/// RFC 9421 algorithm label for a signing key type
pub fn rfc9421_algorithm(key_type: KeyType) -> Result<&'static str> {
    crate::httpsig::algorithm_label(key_type)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_parse_round_trip() {
        for chain in [
            Chain::Ethereum,
            Chain::Sepolia,
            Chain::Kairos,
            Chain::Solana,
            Chain::Bitcoin,
            Chain::Cosmos,
        ] {
            assert_eq!(Chain::parse(chain.tag()).unwrap(), chain);
        }
    }

    #[test]
    fn test_unknown_chain_rejected() {
        assert!(matches!(
            Chain::parse("polkadot"),
            Err(Error::ChainNotSupported(_))
        ));
    }

    #[test]
    fn test_ethereum_family_requires_secp256k1() {
        for chain in [Chain::Ethereum, Chain::Sepolia, Chain::Kairos] {
            validate_key_type_for_chain(KeyType::Secp256k1, chain).unwrap();
            assert!(matches!(
                validate_key_type_for_chain(KeyType::Ed25519, chain),
                Err(Error::WrongKeyForChain(_))
            ));
        }
    }

    #[test]
    fn test_solana_requires_ed25519() {
        validate_key_type_for_chain(KeyType::Ed25519, Chain::Solana).unwrap();
        assert!(validate_key_type_for_chain(KeyType::Secp256k1, Chain::Solana).is_err());
    }

    #[test]
    fn test_cosmos_accepts_both() {
        validate_key_type_for_chain(KeyType::Secp256k1, Chain::Cosmos).unwrap();
        validate_key_type_for_chain(KeyType::Ed25519, Chain::Cosmos).unwrap();
        assert_eq!(Chain::Cosmos.recommended_key_type(), KeyType::Secp256k1);
    }

    #[test]
    fn test_rfc9421_labels() {
        assert_eq!(Chain::Ethereum.rfc9421_label(), "es256k");
        assert_eq!(Chain::Solana.rfc9421_label(), "ed25519");
        assert_eq!(rfc9421_algorithm(KeyType::Secp256k1).unwrap(), "es256k");
        assert_eq!(rfc9421_algorithm(KeyType::Ed25519).unwrap(), "ed25519");
    }

    #[test]
    fn test_x25519_never_registers() {
        for chain in [Chain::Ethereum, Chain::Solana, Chain::Cosmos] {
            assert!(validate_key_type_for_chain(KeyType::X25519, chain).is_err());
        }
    }
}
