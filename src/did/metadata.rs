//! # Agent Metadata
//!
//! The on-chain record a DID resolves to: human-readable fields, the
//! owning address, the primary signing key, and any additional keys with
//! their verification state.
//!
//! ## Lifecycle
//!
//! ```text
//! register ──► active metadata ──► update* ──► deactivate
//!    │              │
//!    │              └── resolver caches read-only copies (5 min TTL)
//!    └── only the owning address can mutate on-chain
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::{KeyType, PublicKey};
use crate::did::AgentDid;

/// One additional key attached to an agent
///
/// ## Verification rules
///
/// | Key type | How `verified` becomes true |
/// |----------|-----------------------------|
/// | Secp256k1 (ECDSA) | Implicitly, by the registration signature |
/// | Ed25519 | Administrative approval (`approve_key`) |
/// | X25519 | Agreement-only; never requires a possession proof |
/// | RSA | Administrative approval |
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentKey {
    /// Key algorithm
    pub key_type: KeyType,
    /// Public key material
    pub public_key: PublicKey,
    /// Whether the registry considers this key usable
    pub verified: bool,
    /// Registration time (Unix seconds)
    pub created_at: i64,
    /// Possession proof: a signature by this key over the owning DID.
    /// X25519 keys carry none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<Vec<u8>>,
}

impl AgentKey {
    /// Whether this key type requires an explicit approval step before
    /// it becomes verified
    pub fn requires_approval(&self) -> bool {
        matches!(self.key_type, KeyType::Ed25519 | KeyType::Rsa2048)
    }
}

/// Everything a DID resolves to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMetadata {
    /// The agent's DID
    pub did: AgentDid,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// HTTPS endpoint agents reach this agent at
    pub endpoint: String,
    /// Owning chain address; only this address can mutate the record
    pub owner: String,
    /// Whether the agent is active (deactivation clears this)
    pub active: bool,
    /// Registration time (Unix seconds)
    pub created_at: i64,
    /// Last on-chain update (Unix seconds)
    pub updated_at: i64,
    /// Primary signing key, fixed by the registration transaction
    pub public_key: PublicKey,
    /// Additional keys in registration order
    pub keys: Vec<AgentKey>,
    /// Free-form capability map
    pub capabilities: BTreeMap<String, String>,
    /// Set when the agent was explicitly revoked (Unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
}

impl AgentMetadata {
    /// First verified key of the given type, if any
    pub fn verified_key(&self, key_type: KeyType) -> Option<&AgentKey> {
        self.keys
            .iter()
            .find(|k| k.key_type == key_type && k.verified)
    }

    /// Whether the record is usable: active and not revoked
    pub fn is_usable(&self) -> bool {
        self.active && self.revoked_at.is_none()
    }
}

/// Outcome of checking claimed metadata against the registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationResult {
    /// True when every compared field matched
    pub valid: bool,
    /// Names of fields that differ from the on-chain record
    pub mismatches: Vec<String>,
}

impl VerificationResult {
    /// Compare a claimed record against the resolved one field by field
    pub fn compare(resolved: &AgentMetadata, claimed: &AgentMetadata) -> Self {
        let mut mismatches = Vec::new();
        if resolved.did != claimed.did {
            mismatches.push("did".into());
        }
        if resolved.name != claimed.name {
            mismatches.push("name".into());
        }
        if resolved.description != claimed.description {
            mismatches.push("description".into());
        }
        if resolved.endpoint != claimed.endpoint {
            mismatches.push("endpoint".into());
        }
        if resolved.owner != claimed.owner {
            mismatches.push("owner".into());
        }
        if resolved.active != claimed.active {
            mismatches.push("active".into());
        }
        if resolved.public_key != claimed.public_key {
            mismatches.push("public_key".into());
        }
        if resolved.capabilities != claimed.capabilities {
            mismatches.push("capabilities".into());
        }
        Self {
            valid: mismatches.is_empty(),
            mismatches,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
