//! # Key Derivation Functions
//!
//! This module derives session key material from handshake outputs.
//!
//! ## Session Key Derivation
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 SHARED SECRET → SESSION MATERIAL                        │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    X25519 SHARED SECRET                         │   │
//! │  │                                                                 │   │
//! │  │  SHA-256 of the ephemeral Diffie-Hellman output                │   │
//! │  │  (both parties computed the same 32 bytes)                     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │                                ▼                                        │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    HKDF KEY DERIVATION                          │   │
//! │  │                                                                 │   │
//! │  │  HKDF-SHA256(                                                  │   │
//! │  │    ikm  = shared_secret,                                       │   │
//! │  │    salt = sort(eph_a, eph_b),   ← order-independent            │   │
//! │  │    info = handshake label                                      │   │
//! │  │  )                                                             │   │
//! │  │                                                                 │   │
//! │  │  → 32-byte AES-256-GCM session key                             │   │
//! │  │  → session ID (independent expansion, same inputs)             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Why sort the ephemerals into the salt?
//! Initiator and responder see the two public halves in opposite roles;
//! sorting them lexicographically makes both parties build the identical
//! salt and therefore the identical key and session ID.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Domain separation suffixes for HKDF expansions
pub mod domain {
    /// Suffix appended to the handshake label when expanding the session ID
    pub const SESSION_ID: &[u8] = b"/session-id";
}

/// Concatenate two ephemeral public keys in lexicographic order
///
/// Both handshake roles produce the same 64-byte transcript regardless of
/// which half they generated.
pub fn sorted_transcript(eph_a: &[u8; 32], eph_b: &[u8; 32]) -> [u8; 64] {
    let (lo, hi) = if eph_a <= eph_b {
        (eph_a, eph_b)
    } else {
        (eph_b, eph_a)
    };
    let mut transcript = [0u8; 64];
    transcript[..32].copy_from_slice(lo);
    transcript[32..].copy_from_slice(hi);
    transcript
}

/// Derive the 32-byte session key from a handshake shared secret
pub fn derive_session_key(
    shared_secret: &[u8; 32],
    eph_a: &[u8; 32],
    eph_b: &[u8; 32],
    label: &str,
) -> Result<[u8; 32]> {
    let salt = sorted_transcript(eph_a, eph_b);
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut key = [0u8; 32];
    hkdf.expand(label.as_bytes(), &mut key)
        .map_err(|_| Error::KeyDerivationFailed("Session key expansion failed".into()))?;
    Ok(key)
}

/// Derive the session identifier both parties converge on
///
/// Same inputs as the session key, separate expansion domain, so the
/// identifier reveals nothing about the key.
pub fn derive_session_id(
    shared_secret: &[u8; 32],
    eph_a: &[u8; 32],
    eph_b: &[u8; 32],
    label: &str,
) -> Result<String> {
    let salt = sorted_transcript(eph_a, eph_b);
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut info = label.as_bytes().to_vec();
    info.extend_from_slice(domain::SESSION_ID);

    let mut id = [0u8; 16];
    hkdf.expand(&info, &mut id)
        .map_err(|_| Error::KeyDerivationFailed("Session ID expansion failed".into()))?;
    Ok(hex::encode(id))
}

// ============================================================================
// TESTS
// ============================================================================
