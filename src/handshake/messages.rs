//! # Handshake Messages
//!
//! The four protocol messages, their payloads, and the deterministic
//! byte form each DID signature covers. The carrier (HTTP, gRPC, queue)
//! is out of scope; it only needs to deliver these structs and tag them
//! with `handshake/<phase>` task IDs.
//!
//! | Phase | Direction | Body |
//! |-------|-----------|------|
//! | 1 Invitation | Initiator → Responder | plaintext JSON |
//! | 2 Request | Initiator → Responder | bootstrap-encrypted JSON |
//! | 3 Response | Responder → Initiator | bootstrap-encrypted JSON |
//! | 4 Complete | Initiator → Responder | plaintext JSON |

use serde::{Deserialize, Serialize};

use crate::crypto::{JsonKey, KeyPair, PublicKey};
use crate::did::AgentDid;
use crate::error::{Error, Result};

/// Domain-separation label for session derivation
pub const HANDSHAKE_LABEL: &str = "a2a/handshake v1";

/// Header carrying the sender DID on handshake-era carrier messages
pub const AGENT_DID_HEADER: &str = "x-agent-did";

/// The four protocol phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakePhase {
    /// Phase 1: announce intent, plaintext
    Invitation,
    /// Phase 2: initiator ephemeral, bootstrap-encrypted
    Request,
    /// Phase 3: responder ephemeral, bootstrap-encrypted
    Response,
    /// Phase 4: confirm, plaintext
    Complete,
}

impl HandshakePhase {
    /// Phase number as carried in task IDs
    pub fn number(&self) -> u8 {
        match self {
            HandshakePhase::Invitation => 1,
            HandshakePhase::Request => 2,
            HandshakePhase::Response => 3,
            HandshakePhase::Complete => 4,
        }
    }

    /// Carrier task ID: `handshake/<phase>`
    pub fn task_id(&self) -> String {
        format!("handshake/{}", self.number())
    }

    /// Parse a carrier task ID; anything but `handshake/<1..4>` is
    /// rejected
    pub fn parse_task_id(task_id: &str) -> Result<Self> {
        let suffix = task_id
            .strip_prefix("handshake/")
            .ok_or_else(|| Error::HandshakeInvalidTaskId(task_id.to_string()))?;
        match suffix {
            "1" => Ok(HandshakePhase::Invitation),
            "2" => Ok(HandshakePhase::Request),
            "3" => Ok(HandshakePhase::Response),
            "4" => Ok(HandshakePhase::Complete),
            _ => Err(Error::HandshakeInvalidTaskId(task_id.to_string())),
        }
    }
}

// ============================================================================
// PHASE PAYLOADS
// ============================================================================

/// Phase 1 body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationPayload {
    /// Context correlator for the whole handshake
    pub context_id: String,
    /// Initiator DID
    pub did: String,
}

/// Phase 2 body (inside the bootstrap envelope)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Context correlator
    pub context_id: String,
    /// Initiator ephemeral X25519 public key, exported JSON form
    pub ephemeral_pub: JsonKey,
}

/// Phase 3 body (inside the bootstrap envelope)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Context correlator
    pub context_id: String,
    /// Responder ephemeral X25519 public key, exported JSON form
    pub ephemeral_pub: JsonKey,
    /// Responder acknowledges the request
    pub ack: bool,
}

/// Phase 4 body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    /// Context correlator
    pub context_id: String,
}

// ============================================================================
// SIGNED MESSAGE
// ============================================================================

/// One handshake message as handed to the carrier
///
/// The signature covers the deterministic serialization of
/// (phase, context ID, sender DID, body), so neither the correlator nor
/// the payload can be swapped under an old signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Protocol phase
    pub phase: HandshakePhase,
    /// Context correlator
    pub context_id: String,
    /// DID of the signer
    pub sender_did: AgentDid,
    /// Phase body: plaintext JSON (phases 1, 4) or bootstrap packet
    /// (phases 2, 3)
    #[serde(with = "body_bytes")]
    pub body: Vec<u8>,
    /// DID signature over [`HandshakeMessage::signing_bytes`]
    #[serde(with = "body_bytes")]
    pub signature: Vec<u8>,
}

impl HandshakeMessage {
    /// The exact bytes the signature covers
    pub fn signing_bytes(
        phase: HandshakePhase,
        context_id: &str,
        sender_did: &AgentDid,
        body: &[u8],
    ) -> Result<Vec<u8>> {
        bincode::serialize(&(phase.number(), context_id, sender_did.as_str(), body))
            .map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Build and sign a message with the sender's identity keypair
    pub fn sign(
        phase: HandshakePhase,
        context_id: impl Into<String>,
        sender_did: AgentDid,
        body: Vec<u8>,
        identity: &KeyPair,
    ) -> Result<Self> {
        let context_id = context_id.into();
        let bytes = Self::signing_bytes(phase, &context_id, &sender_did, &body)?;
        let signature = identity.sign(&bytes)?;
        Ok(Self {
            phase,
            context_id,
            sender_did,
            body,
            signature,
        })
    }

    /// Verify the DID signature against a resolved or cached public key
    pub fn verify(&self, public_key: &PublicKey) -> Result<()> {
        let bytes =
            Self::signing_bytes(self.phase, &self.context_id, &self.sender_did, &self.body)?;
        public_key.verify(&bytes, &self.signature)
    }

    /// Carrier task ID for this message
    pub fn task_id(&self) -> String {
        self.phase.task_id()
    }
}

/// Serde helper: byte payloads as base64 strings on the wire
mod body_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================
