//! # Error Handling
//!
//! This module provides the error types for Sage Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Key & Crypto Errors                                               │
//! │  │   ├── InvalidKey            - Malformed or out-of-range key         │
//! │  │   ├── SignatureUnsupported  - Key type cannot sign (X25519)         │
//! │  │   ├── InvalidSignature      - Signature verification failed         │
//! │  │   ├── AlgorithmMismatch     - Algorithm label vs key type conflict  │
//! │  │   └── KeyDerivationFailed   - HKDF/HPKE derivation failed           │
//! │  │                                                                      │
//! │  ├── HTTP Signature Errors                                             │
//! │  │   ├── MalformedHeader       - Unparseable structured field          │
//! │  │   ├── MissingComponent      - Required component not covered        │
//! │  │   ├── ComponentNotFound     - Covered component absent from request │
//! │  │   └── SignatureExpired      - created/expires outside policy        │
//! │  │                                                                      │
//! │  ├── DID & Registry Errors                                             │
//! │  │   ├── InvalidDid            - DID fails syntactic validation        │
//! │  │   ├── ChainNotSupported     - No resolver for the chain tag         │
//! │  │   ├── WrongKeyForChain      - Key algorithm not allowed on chain    │
//! │  │   ├── DidNotFound           - Registry has no such agent            │
//! │  │   ├── DidAlreadyExists      - Registration over an existing DID     │
//! │  │   ├── InactiveAgent         - Agent exists but is deactivated       │
//! │  │   ├── RpcFailure            - Transient RPC error (retryable)       │
//! │  │   ├── RpcFatal              - Chain-ID mismatch, auth (not retried) │
//! │  │   └── Commit-reveal kinds   - Missing/early/late/mismatched reveal  │
//! │  │                                                                      │
//! │  ├── Handshake Errors                                                  │
//! │  │   ├── HandshakeInvalidTaskId - Carrier task tag unparseable         │
//! │  │   ├── HandshakeNoCachedPeer  - Phase arrived before Invitation      │
//! │  │   ├── HandshakeNoPending     - Complete without a Request           │
//! │  │   └── HandshakeDecryptFailed - Bootstrap envelope rejected          │
//! │  │                                                                      │
//! │  └── Session & Message Errors                                          │
//! │      ├── SessionExpired        - Lifetime/idle/message cap tripped     │
//! │      ├── SessionNotFound       - Unknown session or key ID             │
//! │      ├── InvalidCiphertext     - AEAD tag mismatch or short envelope   │
//! │      ├── InvalidHeader         - Control header missing fields         │
//! │      ├── MessageReplay         - Sequence at or below high-water mark  │
//! │      ├── OutOfOrderTimestamp   - Timestamp regressed                   │
//! │      └── MessageLimitReached   - Per-session message cap hit           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Error messages carry human-readable context only. Key material,
//! plaintext, and derived secrets never appear in an error message.

use thiserror::Error;

/// Result type alias for Sage Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Sage Core
///
/// All errors are categorized by module/domain to make error handling
/// clearer and to provide meaningful error messages to callers.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Key & Crypto Errors
    // ========================================================================

    /// Invalid key format, length, or value
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The key type does not support signing or verification
    #[error("Signature operation unsupported for key type {0}")]
    SignatureUnsupported(String),

    /// Signature verification failed
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature algorithm label does not match the key type
    #[error("Algorithm mismatch: {0}")]
    AlgorithmMismatch(String),

    /// Key derivation failed
    #[error("Failed to derive key material: {0}")]
    KeyDerivationFailed(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Random number generation failed
    #[error("Random number generation failed")]
    RngFailed,

    // ========================================================================
    // HTTP Signature Errors
    // ========================================================================

    /// A Signature-Input or Signature header could not be parsed
    #[error("Malformed signature header: {0}")]
    MalformedHeader(String),

    /// A component required by verification policy is not covered
    #[error("Required component not covered by signature: {0}")]
    MissingComponent(String),

    /// A covered component does not exist on the request
    #[error("Covered component not found on request: {0}")]
    ComponentNotFound(String),

    /// Signature timestamp policy rejected the signature
    #[error("Signature expired: {0}")]
    SignatureExpired(String),

    // ========================================================================
    // DID & Registry Errors
    // ========================================================================

    /// DID fails syntactic validation
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    /// No resolver or registry is configured for the chain
    #[error("Chain not supported: {0}")]
    ChainNotSupported(String),

    /// Key algorithm is not permitted on the target chain
    #[error("Wrong key type for chain: {0}")]
    WrongKeyForChain(String),

    /// The registry has no agent for this DID
    #[error("DID not found: {0}")]
    DidNotFound(String),

    /// Registration attempted over an already-registered DID
    #[error("DID already registered: {0}")]
    DidAlreadyExists(String),

    /// The agent exists but has been deactivated
    #[error("Agent is not active: {0}")]
    InactiveAgent(String),

    /// Transient RPC failure (network, node hiccup, 5xx); retried internally
    #[error("RPC failure: {0}")]
    RpcFailure(String),

    /// Fatal RPC failure (chain-ID mismatch, authentication); never retried
    #[error("RPC fatal error: {0}")]
    RpcFatal(String),

    // ========================================================================
    // Commit-Reveal Errors
    // ========================================================================

    /// Reveal submitted without a prior commitment
    #[error("No commitment found for this registration")]
    CommitmentMissing,

    /// Reveal submitted before the minimum commit-reveal delay
    #[error("Reveal submitted too soon after commitment")]
    RevealTooSoon,

    /// Reveal submitted after the maximum commit-reveal delay
    #[error("Reveal submitted too late after commitment")]
    RevealTooLate,

    /// Reveal data does not hash to the committed value
    #[error("Reveal does not match commitment")]
    CommitmentMismatch,

    // ========================================================================
    // Handshake Errors
    // ========================================================================

    /// Carrier task identifier is not `handshake/<1..4>`
    #[error("Invalid handshake task ID: {0}")]
    HandshakeInvalidTaskId(String),

    /// A phase arrived before the peer was cached by an Invitation
    #[error("No cached peer for context {0}")]
    HandshakeNoCachedPeer(String),

    /// Complete arrived without a pending Request for the context
    #[error("No pending handshake for context {0}")]
    HandshakeNoPending(String),

    /// The bootstrap-encrypted envelope could not be opened
    #[error("Handshake decryption failed: {0}")]
    HandshakeDecryptFailed(String),

    // ========================================================================
    // Session & Message Errors
    // ========================================================================

    /// Session lifetime, idle timeout, or message cap has tripped
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// No live session for the given session or key ID
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// AEAD open failed or the envelope is too short
    #[error("Invalid ciphertext")]
    InvalidCiphertext,

    /// Message control header is missing required fields
    #[error("Invalid message header: {0}")]
    InvalidHeader(String),

    /// Sequence number at or below the session high-water mark
    #[error("Message replay detected: {0}")]
    MessageReplay(String),

    /// Message timestamp regressed relative to the last accepted message
    #[error("Out-of-order timestamp: {0}")]
    OutOfOrderTimestamp(String),

    /// Per-session message count limit reached
    #[error("Session message limit reached")]
    MessageLimitReached,

    // ========================================================================
    // Internal Errors
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check whether this error is worth retrying
    ///
    /// Only transient RPC failures qualify; everything else is
    /// deterministic and will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RpcFailure(_))
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RpcFailure("connection reset".into()).is_retryable());
        assert!(!Error::RpcFatal("chain ID mismatch".into()).is_retryable());
        assert!(!Error::InvalidSignature.is_retryable());
        assert!(!Error::SessionExpired("max age".into()).is_retryable());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::ChainNotSupported("polkadot".into());
        assert!(err.to_string().contains("polkadot"));

        let err = Error::MissingComponent("@authority".into());
        assert!(err.to_string().contains("@authority"));
    }
}
