//! # Cryptography Module
//!
//! This module provides all cryptographic primitives used by Sage Core.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 IDENTITY KEYS                                   │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Ed25519      Secp256k1      RSA-2048        X25519            │   │
//! │  │  (Solana)     (Ethereum)     (legacy)        (agreement only)  │   │
//! │  │      │             │             │                │             │   │
//! │  │      └─────────────┴──────┬──────┴────────────────┘             │   │
//! │  │                          ▼                                      │   │
//! │  │   key ID = hex(SHA-256(canonical public bytes)[..8])           │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 SESSION ESTABLISHMENT                           │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  1. Ephemeral Agreement: X25519 ECDH                           │   │
//! │  │     initiator eph × responder eph → SHA-256 → shared secret    │   │
//! │  │                                                                 │   │
//! │  │  2. Key Derivation: HKDF-SHA256                                │   │
//! │  │     salt = sorted ephemerals, info = handshake label           │   │
//! │  │     → session key + session ID                                 │   │
//! │  │                                                                 │   │
//! │  │  3. Traffic Encryption: AES-256-GCM                            │   │
//! │  │     • 256-bit key, random 96-bit nonce, 128-bit tag            │   │
//! │  │                                                                 │   │
//! │  │  Before a session exists, phases encrypt to the peer's        │   │
//! │  │  Ed25519 identity via the bootstrap envelope (exchange.rs),    │   │
//! │  │  or use HPKE base mode for exported secrets.                   │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices & Rationale
//!
//! | Algorithm | Purpose | Why Chosen |
//! |-----------|---------|------------|
//! | Ed25519 | Signing | Fast, small keys, deterministic, widely audited |
//! | Secp256k1 | Signing | Required by Ethereum-family registries |
//! | RSA-2048 | Signing | Interop with legacy agent deployments |
//! | X25519 | Key Exchange | Fast ECDH, same curve family as Ed25519 |
//! | AES-256-GCM | Encryption | Hardware acceleration, AEAD |
//! | HPKE (RFC 9180) | Bootstrap secrets | Standardized hybrid encryption |
//! | HKDF-SHA256 | Key Derivation | Industry standard, well-analyzed |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: Secret key types zeroize their material on drop
//! 2. **Constant-Time Operations**: dalek/RustCrypto constant-time cores
//! 3. **Secure Random**: `rand::rngs::OsRng` for all key and nonce material
//! 4. **Contributory Checks**: low-order X25519 inputs are rejected

mod encryption;
mod exchange;
mod formats;
mod kdf;
mod keys;

pub use encryption::{decrypt, encrypt, EncryptionKey, Nonce, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use exchange::{
    derive_shared_secret, hpke_export_from_peer, hpke_export_to_peer, open_with_identity,
    seal_to_identity, HpkeSealed, BOOTSTRAP_INFO,
};
pub use formats::{
    export_private_json, export_private_pem, export_public_json, export_public_pem, import_json,
    import_private_pem, import_public_pem, ImportedKey, JsonKey,
};
pub use kdf::{derive_session_id, derive_session_key, sorted_transcript};
pub use keys::{
    KeyPair, KeyType, PublicKey, CURVE25519_KEY_SIZE, RSA_BITS, SECP256K1_COMPRESSED_SIZE,
    SIGNATURE_SIZE,
};
