//! # Agent Cards
//!
//! A self-describing JSON document an agent publishes about itself: its
//! DID, human-readable fields, verified keys, and a linked-data proof
//! binding the whole card to one of those keys.
//!
//! ## Proof construction
//!
//! ```text
//! card (proofValue omitted)
//!   │  canonical JSON: keys sorted lexicographically, no extra
//!   │  whitespace, UTF-8
//!   ▼
//! sign with the agent's verified key
//!   │
//!   ▼
//! proof { type, created, proofPurpose: "assertionMethod",
//!         verificationMethod: "<did>#<key-id>", proofValue }
//! ```
//!
//! Verification recomputes the canonicalization and checks the
//! signature against a *verified* key of the matching type from the
//! resolved metadata, never against material carried in the card alone.

use serde::{Deserialize, Serialize};

use crate::crypto::{KeyPair, KeyType};
use crate::did::metadata::AgentMetadata;
use crate::error::{Error, Result};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Proof type label for Ed25519 signatures
pub const ED25519_PROOF_TYPE: &str = "Ed25519Signature2020";

/// Proof type label for Secp256k1 signatures
pub const SECP256K1_PROOF_TYPE: &str = "EcdsaSecp256k1Signature2019";

/// One key entry on a published card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardKey {
    /// Key algorithm
    #[serde(rename = "type")]
    pub key_type: KeyType,
    /// Hex canonical public bytes
    pub public_key: String,
    /// Short key fingerprint
    pub key_id: String,
}

/// Linked-data proof block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardProof {
    /// `Ed25519Signature2020` or `EcdsaSecp256k1Signature2019`
    #[serde(rename = "type")]
    pub proof_type: String,
    /// RFC 3339 creation time
    pub created: String,
    /// Always `assertionMethod`
    pub proof_purpose: String,
    /// `<did>#<key-id>` of the signing key
    pub verification_method: String,
    /// Base64 signature; omitted from the canonical signing form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_value: Option<String>,
}

/// The published agent-card document
///
/// Serialization is canonical by construction: `serde_json` maps sort
/// keys lexicographically and `to_vec` emits no insignificant
/// whitespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Agent DID
    pub id: String,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Agent endpoint URL
    pub endpoint: String,
    /// Verified keys from the registry record
    pub keys: Vec<CardKey>,
    /// Proof over the rest of the card
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<CardProof>,
}

impl AgentCard {
    /// Canonical bytes the proof covers: this card with
    /// `proof.proofValue` removed
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        if let Some(proof) = &mut unsigned.proof {
            proof.proof_value = None;
        }
        serde_json::to_vec(&unsigned).map_err(Into::into)
    }
}

fn proof_type_for(key_type: KeyType) -> Result<&'static str> {
    match key_type {
        KeyType::Ed25519 => Ok(ED25519_PROOF_TYPE),
        KeyType::Secp256k1 => Ok(SECP256K1_PROOF_TYPE),
        other => Err(Error::SignatureUnsupported(format!(
            "No card proof type for {} keys",
            other
        ))),
    }
}

fn key_type_for(proof_type: &str) -> Result<KeyType> {
    match proof_type {
        ED25519_PROOF_TYPE => Ok(KeyType::Ed25519),
        SECP256K1_PROOF_TYPE => Ok(KeyType::Secp256k1),
        other => Err(Error::AlgorithmMismatch(format!(
            "Unknown proof type '{}'",
            other
        ))),
    }
}

/// Build and sign an agent card from registry metadata
///
/// The signer must correspond to a `verified = true` key of its type in
/// `metadata.keys`; without one, generation fails.
pub fn generate_card(metadata: &AgentMetadata, signer: &KeyPair) -> Result<AgentCard> {
    let proof_type = proof_type_for(signer.key_type())?;
    let signer_public = signer.public_key();

    let backing = metadata
        .verified_key(signer.key_type())
        .ok_or_else(|| {
            Error::InvalidKey(format!(
                "Metadata has no verified {} key to sign the card with",
                signer.key_type()
            ))
        })?;
    if backing.public_key != signer_public {
        return Err(Error::InvalidKey(
            "Signer does not match the verified key on record".into(),
        ));
    }

    let keys = metadata
        .keys
        .iter()
        .filter(|k| k.verified)
        .map(|k| CardKey {
            key_type: k.key_type,
            public_key: hex::encode(k.public_key.canonical_bytes()),
            key_id: k.public_key.key_id(),
        })
        .collect();

    let mut card = AgentCard {
        id: metadata.did.as_str().to_string(),
        name: metadata.name.clone(),
        description: metadata.description.clone(),
        endpoint: metadata.endpoint.clone(),
        keys,
        proof: Some(CardProof {
            proof_type: proof_type.to_string(),
            created: chrono::Utc::now().to_rfc3339(),
            proof_purpose: "assertionMethod".to_string(),
            verification_method: format!("{}#{}", metadata.did, signer_public.key_id()),
            proof_value: None,
        }),
    };

    let signature = signer.sign(&card.signing_bytes()?)?;
    if let Some(proof) = &mut card.proof {
        proof.proof_value = Some(BASE64.encode(signature));
    }
    Ok(card)
}

/// Verify an agent card against resolved registry metadata
///
/// The proof signature must check out under a verified key of the
/// proof's type drawn from `metadata.keys`.
pub fn verify_card(card: &AgentCard, metadata: &AgentMetadata) -> Result<()> {
    let proof = card
        .proof
        .as_ref()
        .ok_or_else(|| Error::InvalidSignature)?;
    let proof_value = proof
        .proof_value
        .as_ref()
        .ok_or(Error::InvalidSignature)?;
    let signature = BASE64
        .decode(proof_value)
        .map_err(|_| Error::InvalidSignature)?;

    let key_type = key_type_for(&proof.proof_type)?;
    let signing_bytes = card.signing_bytes()?;

    let candidates: Vec<_> = metadata
        .keys
        .iter()
        .filter(|k| k.key_type == key_type && k.verified)
        .collect();
    if candidates.is_empty() {
        return Err(Error::InvalidKey(format!(
            "Metadata has no verified {} key to verify the card against",
            key_type
        )));
    }

    for key in candidates {
        if key.public_key.verify(&signing_bytes, &signature).is_ok() {
            return Ok(());
        }
    }
    Err(Error::InvalidSignature)
}

// ============================================================================
// TESTS
// ============================================================================
