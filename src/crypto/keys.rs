//! # Key Management
//!
//! This module handles cryptographic key generation and management for
//! agent identities.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Ed25519                                                        │   │
//! │  │  ───────                                                         │   │
//! │  │  • DID signing on Solana-style chains                           │   │
//! │  │  • Handshake message authentication                             │   │
//! │  │  • 32-byte keys, 64-byte deterministic signatures               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Secp256k1                                                      │   │
//! │  │  ─────────                                                       │   │
//! │  │  • DID signing on Ethereum-family chains                        │   │
//! │  │  • SHA-256 prehash, fixed 64-byte r||s signatures               │   │
//! │  │  • 33-byte compressed SEC1 public keys                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  X25519                                                         │   │
//! │  │  ──────                                                          │   │
//! │  │  • Ephemeral key agreement during the handshake                 │   │
//! │  │  • Never signs: sign/verify return SignatureUnsupported         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  RSA-2048                                                       │   │
//! │  │  ────────                                                        │   │
//! │  │  • Legacy agent keys (PKCS#1 v1.5 over SHA-256)                 │   │
//! │  │  • 256-byte signatures, DER-encoded public material             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key IDs
//!
//! Every public key has a short fingerprint: the hex encoding of the first
//! 8 bytes of SHA-256 over the canonical public bytes (raw 32 bytes for
//! the Curve25519 types, compressed SEC1 for Secp256k1, PKCS#1 DER for
//! RSA). Key IDs name keys in signature headers and registry records
//! without revealing material.

use ed25519_dalek::{Signer as _, Verifier as _};
use k256::ecdsa::signature::{DigestSigner as _, DigestVerifier as _};
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use rand::rngs::OsRng;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Size of an Ed25519 or X25519 public key in bytes
pub const CURVE25519_KEY_SIZE: usize = 32;

/// Size of a compressed Secp256k1 public key in bytes
pub const SECP256K1_COMPRESSED_SIZE: usize = 33;

/// Size of Ed25519 and Secp256k1 signatures in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// RSA modulus size in bits
pub const RSA_BITS: usize = 2048;

/// Supported key algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    /// Ed25519 (RFC 8032)
    Ed25519,
    /// Secp256k1 ECDSA
    Secp256k1,
    /// X25519 key agreement (cannot sign)
    X25519,
    /// RSA with 2048-bit modulus, PKCS#1 v1.5 signatures
    Rsa2048,
}

impl KeyType {
    /// Stable string label for this key type
    pub fn label(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Secp256k1 => "secp256k1",
            KeyType::X25519 => "x25519",
            KeyType::Rsa2048 => "rsa-2048",
        }
    }

    /// Whether keys of this type can produce signatures
    pub fn supports_signing(&self) -> bool {
        !matches!(self, KeyType::X25519)
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Private key material, one variant per algorithm
///
/// The dalek and RustCrypto secret types zeroize their material on drop;
/// no additional wrapping is required here.
pub(crate) enum SecretMaterial {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(k256::ecdsa::SigningKey),
    X25519(x25519_dalek::StaticSecret),
    Rsa(rsa::RsaPrivateKey),
}

/// A keypair bound to one of the supported algorithms
///
/// ## Security
///
/// - Private material never leaves this struct except through the
///   explicit export paths in [`crate::crypto::formats`]
/// - Public halves can be shared freely via [`KeyPair::public_key`]
pub struct KeyPair {
    key_type: KeyType,
    secret: SecretMaterial,
}

impl KeyPair {
    /// Generate a new random keypair of the given type
    ///
    /// Uses the operating system's secure random number generator. RSA
    /// generation can fail if the prime search is rejected by the
    /// underlying library; the curve types cannot.
    pub fn generate(key_type: KeyType) -> Result<Self> {
        let secret = match key_type {
            KeyType::Ed25519 => {
                SecretMaterial::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
            }
            KeyType::Secp256k1 => {
                SecretMaterial::Secp256k1(k256::ecdsa::SigningKey::random(&mut OsRng))
            }
            KeyType::X25519 => {
                SecretMaterial::X25519(x25519_dalek::StaticSecret::random_from_rng(OsRng))
            }
            KeyType::Rsa2048 => {
                let key = rsa::RsaPrivateKey::new(&mut OsRng, RSA_BITS)
                    .map_err(|e| Error::InvalidKey(format!("RSA generation failed: {}", e)))?;
                SecretMaterial::Rsa(key)
            }
        };
        Ok(Self { key_type, secret })
    }

    /// Reconstruct an Ed25519 keypair from its 32-byte seed
    pub fn ed25519_from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            key_type: KeyType::Ed25519,
            secret: SecretMaterial::Ed25519(ed25519_dalek::SigningKey::from_bytes(bytes)),
        }
    }

    /// Reconstruct an X25519 keypair from its 32-byte secret
    pub fn x25519_from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            key_type: KeyType::X25519,
            secret: SecretMaterial::X25519(x25519_dalek::StaticSecret::from(*bytes)),
        }
    }

    /// Reconstruct a Secp256k1 keypair from its 32-byte scalar
    pub fn secp256k1_from_bytes(bytes: &[u8]) -> Result<Self> {
        let key = k256::ecdsa::SigningKey::from_slice(bytes)
            .map_err(|e| Error::InvalidKey(format!("Invalid secp256k1 scalar: {}", e)))?;
        Ok(Self {
            key_type: KeyType::Secp256k1,
            secret: SecretMaterial::Secp256k1(key),
        })
    }

    pub(crate) fn from_material(key_type: KeyType, secret: SecretMaterial) -> Self {
        Self { key_type, secret }
    }

    /// The algorithm this keypair belongs to
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Get the public half for sharing
    pub fn public_key(&self) -> PublicKey {
        let material = match &self.secret {
            SecretMaterial::Ed25519(sk) => PublicMaterial::Ed25519(sk.verifying_key()),
            SecretMaterial::Secp256k1(sk) => PublicMaterial::Secp256k1(*sk.verifying_key()),
            SecretMaterial::X25519(sk) => {
                PublicMaterial::X25519(x25519_dalek::PublicKey::from(sk))
            }
            SecretMaterial::Rsa(sk) => PublicMaterial::Rsa(sk.to_public_key()),
        };
        PublicKey {
            key_type: self.key_type,
            material,
        }
    }

    /// Short fingerprint of the public half
    pub fn key_id(&self) -> String {
        self.public_key().key_id()
    }

    /// Sign a message with this keypair
    ///
    /// - Ed25519: RFC 8032 over the full message, 64 bytes
    /// - Secp256k1: SHA-256 prehash, low-S normalized, fixed 64-byte r||s
    /// - RSA: SHA-256 prehash, PKCS#1 v1.5, 256 bytes
    /// - X25519: always fails with `SignatureUnsupported`
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match &self.secret {
            SecretMaterial::Ed25519(sk) => Ok(sk.sign(message).to_bytes().to_vec()),
            SecretMaterial::Secp256k1(sk) => {
                let digest = Sha256::new_with_prefix(message);
                let signature: k256::ecdsa::Signature = sk.sign_digest(digest);
                let signature = signature.normalize_s().unwrap_or(signature);
                Ok(signature.to_bytes().to_vec())
            }
            SecretMaterial::Rsa(sk) => {
                let digest = Sha256::digest(message);
                sk.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| Error::InvalidKey(format!("RSA signing failed: {}", e)))
            }
            SecretMaterial::X25519(_) => {
                Err(Error::SignatureUnsupported(KeyType::X25519.label().into()))
            }
        }
    }

    /// Perform X25519 Diffie-Hellman with a peer public key
    ///
    /// Rejects non-contributory (low-order) peer keys: the all-zero
    /// shared point fails with `InvalidKey`. Only valid on X25519 pairs.
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> Result<[u8; 32]> {
        match &self.secret {
            SecretMaterial::X25519(sk) => {
                let their_public = x25519_dalek::PublicKey::from(*their_public);
                let shared = sk.diffie_hellman(&their_public);
                if !shared.was_contributory() {
                    return Err(Error::InvalidKey(
                        "X25519 peer key is a low-order point".into(),
                    ));
                }
                Ok(shared.to_bytes())
            }
            _ => Err(Error::AlgorithmMismatch(format!(
                "Diffie-Hellman requires an X25519 keypair, got {}",
                self.key_type
            ))),
        }
    }

    pub(crate) fn ed25519_signing_key(&self) -> Result<&ed25519_dalek::SigningKey> {
        match &self.secret {
            SecretMaterial::Ed25519(sk) => Ok(sk),
            _ => Err(Error::AlgorithmMismatch(format!(
                "Expected an Ed25519 keypair, got {}",
                self.key_type
            ))),
        }
    }

    pub(crate) fn secret_material(&self) -> &SecretMaterial {
        &self.secret
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Private material must never leak through Debug output
        f.debug_struct("KeyPair")
            .field("key_type", &self.key_type)
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

/// Public key material, one variant per algorithm
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PublicMaterial {
    Ed25519(ed25519_dalek::VerifyingKey),
    Secp256k1(k256::ecdsa::VerifyingKey),
    X25519(x25519_dalek::PublicKey),
    Rsa(rsa::RsaPublicKey),
}

/// A public key that can be safely shared, serialized, and stored
#[derive(Clone, Debug, PartialEq)]
pub struct PublicKey {
    key_type: KeyType,
    material: PublicMaterial,
}

impl PublicKey {
    /// Reconstruct an Ed25519 public key from raw bytes
    pub fn ed25519(bytes: &[u8; 32]) -> Result<Self> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| Error::InvalidKey(format!("Invalid Ed25519 public key: {}", e)))?;
        Ok(Self {
            key_type: KeyType::Ed25519,
            material: PublicMaterial::Ed25519(key),
        })
    }

    /// Reconstruct an X25519 public key from raw bytes
    pub fn x25519(bytes: &[u8; 32]) -> Self {
        Self {
            key_type: KeyType::X25519,
            material: PublicMaterial::X25519(x25519_dalek::PublicKey::from(*bytes)),
        }
    }

    /// Reconstruct a Secp256k1 public key from SEC1 bytes
    /// (compressed or uncompressed)
    pub fn secp256k1(sec1: &[u8]) -> Result<Self> {
        let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(sec1)
            .map_err(|e| Error::InvalidKey(format!("Invalid secp256k1 point: {}", e)))?;
        Ok(Self {
            key_type: KeyType::Secp256k1,
            material: PublicMaterial::Secp256k1(key),
        })
    }

    /// Reconstruct an RSA public key from PKCS#1 DER bytes
    pub fn rsa_from_der(der: &[u8]) -> Result<Self> {
        use rsa::pkcs1::DecodeRsaPublicKey;
        let key = rsa::RsaPublicKey::from_pkcs1_der(der)
            .map_err(|e| Error::InvalidKey(format!("Invalid RSA public key DER: {}", e)))?;
        Ok(Self {
            key_type: KeyType::Rsa2048,
            material: PublicMaterial::Rsa(key),
        })
    }

    /// Reconstruct a public key from its canonical byte encoding
    pub fn from_canonical_bytes(key_type: KeyType, bytes: &[u8]) -> Result<Self> {
        match key_type {
            KeyType::Ed25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    Error::InvalidKey("Ed25519 public key must be 32 bytes".into())
                })?;
                Self::ed25519(&arr)
            }
            KeyType::X25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    Error::InvalidKey("X25519 public key must be 32 bytes".into())
                })?;
                Ok(Self::x25519(&arr))
            }
            KeyType::Secp256k1 => Self::secp256k1(bytes),
            KeyType::Rsa2048 => Self::rsa_from_der(bytes),
        }
    }

    /// The algorithm this key belongs to
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Canonical byte encoding used for key-ID derivation and storage
    ///
    /// Raw 32 bytes for the Curve25519 types, compressed SEC1 for
    /// Secp256k1, PKCS#1 DER for RSA.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match &self.material {
            PublicMaterial::Ed25519(pk) => pk.to_bytes().to_vec(),
            PublicMaterial::X25519(pk) => pk.to_bytes().to_vec(),
            PublicMaterial::Secp256k1(pk) => pk.to_encoded_point(true).as_bytes().to_vec(),
            PublicMaterial::Rsa(pk) => {
                use rsa::pkcs1::EncodeRsaPublicKey;
                // Encoding a valid in-memory key cannot fail
                pk.to_pkcs1_der()
                    .map(|der| der.as_bytes().to_vec())
                    .unwrap_or_default()
            }
        }
    }

    /// Short fingerprint: hex of the first 8 bytes of SHA-256 over the
    /// canonical public bytes
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(self.canonical_bytes());
        hex::encode(&digest[..8])
    }

    /// Verify a signature over a message
    ///
    /// Returns `Ok(())` when valid, `InvalidSignature` when the signature
    /// does not check out, `SignatureUnsupported` for X25519 keys.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        match &self.material {
            PublicMaterial::Ed25519(pk) => {
                let sig_bytes: [u8; SIGNATURE_SIZE] =
                    signature.try_into().map_err(|_| Error::InvalidSignature)?;
                let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
                pk.verify(message, &sig).map_err(|_| Error::InvalidSignature)
            }
            PublicMaterial::Secp256k1(pk) => {
                let sig = k256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| Error::InvalidSignature)?;
                let digest = Sha256::new_with_prefix(message);
                pk.verify_digest(digest, &sig)
                    .map_err(|_| Error::InvalidSignature)
            }
            PublicMaterial::Rsa(pk) => {
                let digest = Sha256::digest(message);
                pk.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                    .map_err(|_| Error::InvalidSignature)
            }
            PublicMaterial::X25519(_) => {
                Err(Error::SignatureUnsupported(KeyType::X25519.label().into()))
            }
        }
    }

    /// Raw 32-byte form, valid only for the Curve25519 types
    pub fn curve25519_bytes(&self) -> Result<[u8; 32]> {
        match &self.material {
            PublicMaterial::Ed25519(pk) => Ok(pk.to_bytes()),
            PublicMaterial::X25519(pk) => Ok(pk.to_bytes()),
            _ => Err(Error::AlgorithmMismatch(format!(
                "Expected a Curve25519 key, got {}",
                self.key_type
            ))),
        }
    }

    pub(crate) fn material(&self) -> &PublicMaterial {
        &self.material
    }
}

// ============================================================================
// SERDE REPRESENTATION
// ============================================================================

/// Wire form: key type label plus hex canonical bytes
#[derive(serde::Serialize, serde::Deserialize)]
struct PublicKeyRepr {
    #[serde(rename = "type")]
    key_type: KeyType,
    bytes: String,
}

impl serde::Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        PublicKeyRepr {
            key_type: self.key_type,
            bytes: hex::encode(self.canonical_bytes()),
        }
        .serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let repr = PublicKeyRepr::deserialize(deserializer)?;
        let bytes = hex::decode(&repr.bytes).map_err(serde::de::Error::custom)?;
        PublicKey::from_canonical_bytes(repr.key_type, &bytes).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================
