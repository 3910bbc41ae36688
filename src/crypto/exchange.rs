//! # Key Exchange
//!
//! Three ways two agents end up with shared secret material:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        KEY EXCHANGE MODES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Static ECDH (session seeds)                                        │
//! │     local X25519 private × peer X25519 public                          │
//! │            │                                                            │
//! │            ▼                                                            │
//! │     SHA-256(raw DH) → 32-byte shared secret                            │
//! │                                                                         │
//! │  2. HPKE base mode (exported secrets)                                  │
//! │     KEM  = DHKEM(X25519, HKDF-SHA256)                                  │
//! │     KDF  = HKDF-SHA256                                                 │
//! │     AEAD = ChaCha20-Poly1305                                           │
//! │     Sender:   setup → (enc, context) → export(ctx) → secret           │
//! │     Receiver: setup(enc) → context   → export(ctx) → same secret      │
//! │                                                                         │
//! │  3. Bootstrap envelope (encrypting to an Ed25519 identity)            │
//! │     peer Ed25519 public ──(birational map)──► peer X25519 public      │
//! │     ephemeral X25519 pair ──ECDH──► raw secret                        │
//! │     HKDF-SHA256(raw, salt = eph_pub ‖ peer_x_pub,                     │
//! │                 info = "Noise-IK-AES256GCM") → AES-256 key            │
//! │     packet = eph_pub(32) ‖ nonce(12) ‖ ciphertext                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The bootstrap envelope exists because handshake phases 2 and 3 must be
//! confidential before any session key exists: the only key the sender
//! can trust at that point is the peer's DID-bound Ed25519 identity.

use hkdf::Hkdf;
use hpke::aead::ChaCha20Poly1305;
use hpke::kdf::HkdfSha256;
use hpke::kem::X25519HkdfSha256;
use hpke::{Deserializable, Kem as KemTrait, OpModeR, OpModeS, Serializable};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::crypto::encryption::{self, EncryptionKey, Nonce, NONCE_SIZE, TAG_SIZE};
use crate::crypto::keys::{KeyPair, PublicKey, PublicMaterial, SecretMaterial};
use crate::error::{Error, Result};

/// HKDF info string for the bootstrap envelope key
pub const BOOTSTRAP_INFO: &[u8] = b"Noise-IK-AES256GCM";

/// Size of the X25519 public half carried in a bootstrap packet
const EPHEMERAL_SIZE: usize = 32;

/// Derive a 32-byte session secret from static X25519 ECDH
///
/// Both parties call this with their own private and the other's public
/// half and arrive at the same value. The raw DH output never leaves
/// this function; SHA-256 compresses it into the session secret.
///
/// Low-order peer keys (all-zero shared point) are rejected.
pub fn derive_shared_secret(local: &KeyPair, peer_public: &[u8; 32]) -> Result<[u8; 32]> {
    let raw = local.diffie_hellman(peer_public)?;
    Ok(Sha256::digest(raw).into())
}

// ============================================================================
// HPKE BASE MODE
// ============================================================================

/// Sender-side output of an HPKE base-mode setup
pub struct HpkeSealed {
    /// Encapsulated KEM share to transmit to the receiver
    pub encapped_key: Vec<u8>,
    /// Exporter secret derived from the sender context
    pub exporter_secret: [u8; 32],
}

/// HPKE base-mode setup toward an X25519 peer, exporting a 32-byte secret
///
/// `info` feeds the KEM schedule and `export_ctx` the exporter; both must
/// be byte-identical on the receiving side.
pub fn hpke_export_to_peer(
    peer_x25519_pub: &[u8; 32],
    info: &[u8],
    export_ctx: &[u8],
) -> Result<HpkeSealed> {
    let peer_pk = <X25519HkdfSha256 as KemTrait>::PublicKey::from_bytes(peer_x25519_pub)
        .map_err(|e| Error::InvalidKey(format!("Invalid X25519 public key: {}", e)))?;

    let (encapped, context) = hpke::setup_sender::<ChaCha20Poly1305, HkdfSha256, X25519HkdfSha256, _>(
        &OpModeS::Base,
        &peer_pk,
        info,
        &mut OsRng,
    )
    .map_err(|e| Error::KeyDerivationFailed(format!("HPKE sender setup failed: {}", e)))?;

    let mut exporter_secret = [0u8; 32];
    context
        .export(export_ctx, &mut exporter_secret)
        .map_err(|e| Error::KeyDerivationFailed(format!("HPKE export failed: {}", e)))?;

    Ok(HpkeSealed {
        encapped_key: encapped.to_bytes().to_vec(),
        exporter_secret,
    })
}

/// Receiver side of [`hpke_export_to_peer`]
///
/// Reproduces the sender's exporter secret from the encapsulated key and
/// the local X25519 private half.
pub fn hpke_export_from_peer(
    local: &KeyPair,
    encapped_key: &[u8],
    info: &[u8],
    export_ctx: &[u8],
) -> Result<[u8; 32]> {
    let secret_bytes = match local.secret_material() {
        SecretMaterial::X25519(sk) => sk.to_bytes(),
        _ => {
            return Err(Error::AlgorithmMismatch(format!(
                "HPKE receiver requires an X25519 keypair, got {}",
                local.key_type()
            )))
        }
    };

    let sk = <X25519HkdfSha256 as KemTrait>::PrivateKey::from_bytes(&secret_bytes)
        .map_err(|e| Error::InvalidKey(format!("Invalid X25519 private key: {}", e)))?;
    let encapped = <X25519HkdfSha256 as KemTrait>::EncappedKey::from_bytes(encapped_key)
        .map_err(|e| Error::InvalidKey(format!("Invalid encapsulated key: {}", e)))?;

    let context = hpke::setup_receiver::<ChaCha20Poly1305, HkdfSha256, X25519HkdfSha256>(
        &OpModeR::Base,
        &sk,
        &encapped,
        info,
    )
    .map_err(|e| Error::KeyDerivationFailed(format!("HPKE receiver setup failed: {}", e)))?;

    let mut exporter_secret = [0u8; 32];
    context
        .export(export_ctx, &mut exporter_secret)
        .map_err(|e| Error::KeyDerivationFailed(format!("HPKE export failed: {}", e)))?;

    Ok(exporter_secret)
}

// ============================================================================
// BOOTSTRAP ENVELOPE
// ============================================================================

/// Map an Ed25519 public key to its X25519 (Montgomery) form
fn ed25519_to_x25519_public(public: &PublicKey) -> Result<[u8; 32]> {
    match public.material() {
        PublicMaterial::Ed25519(pk) => Ok(pk.to_montgomery().to_bytes()),
        _ => Err(Error::AlgorithmMismatch(format!(
            "Bootstrap envelope requires an Ed25519 identity, got {}",
            public.key_type()
        ))),
    }
}

/// Encrypt a payload to a peer known only by its Ed25519 identity key
///
/// Packet layout: `eph_pub(32) ‖ nonce(12) ‖ ciphertext+tag`. The
/// `eph_pub ‖ peer_x_pub` transcript serves as both HKDF salt and AEAD
/// associated data, binding the ciphertext to this exact exchange.
pub fn seal_to_identity(peer_identity: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let peer_x_pub = ed25519_to_x25519_public(peer_identity)?;

    let eph_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
    let eph_pub = x25519_dalek::PublicKey::from(&eph_secret).to_bytes();

    let shared = eph_secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer_x_pub));
    if !shared.was_contributory() {
        return Err(Error::InvalidKey(
            "Peer identity maps to a low-order X25519 point".into(),
        ));
    }

    let mut transcript = [0u8; 64];
    transcript[..32].copy_from_slice(&eph_pub);
    transcript[32..].copy_from_slice(&peer_x_pub);

    let hk = Hkdf::<Sha256>::new(Some(&transcript), shared.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(BOOTSTRAP_INFO, &mut key)
        .map_err(|_| Error::KeyDerivationFailed("Bootstrap key expansion failed".into()))?;

    let (nonce, ciphertext) =
        encryption::encrypt(&EncryptionKey::from_bytes(key), plaintext, &transcript)?;

    let mut packet = Vec::with_capacity(EPHEMERAL_SIZE + NONCE_SIZE + ciphertext.len());
    packet.extend_from_slice(&eph_pub);
    packet.extend_from_slice(nonce.as_bytes());
    packet.extend_from_slice(&ciphertext);
    Ok(packet)
}

/// Decrypt a bootstrap packet with the local Ed25519 identity keypair
///
/// The identity's private scalar doubles as the X25519 private half, so
/// no separate key agreement key needs to be published.
pub fn open_with_identity(identity: &KeyPair, packet: &[u8]) -> Result<Vec<u8>> {
    if packet.len() < EPHEMERAL_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(Error::InvalidCiphertext);
    }

    let signing_key = identity.ed25519_signing_key()?;
    let x_secret = x25519_dalek::StaticSecret::from(signing_key.to_scalar_bytes());
    let own_x_pub = signing_key.verifying_key().to_montgomery().to_bytes();

    let mut eph_pub = [0u8; EPHEMERAL_SIZE];
    eph_pub.copy_from_slice(&packet[..EPHEMERAL_SIZE]);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&packet[EPHEMERAL_SIZE..EPHEMERAL_SIZE + NONCE_SIZE]);
    let ciphertext = &packet[EPHEMERAL_SIZE + NONCE_SIZE..];

    let shared = x_secret.diffie_hellman(&x25519_dalek::PublicKey::from(eph_pub));
    if !shared.was_contributory() {
        return Err(Error::InvalidCiphertext);
    }

    let mut transcript = [0u8; 64];
    transcript[..32].copy_from_slice(&eph_pub);
    transcript[32..].copy_from_slice(&own_x_pub);

    let hk = Hkdf::<Sha256>::new(Some(&transcript), shared.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(BOOTSTRAP_INFO, &mut key)
        .map_err(|_| Error::KeyDerivationFailed("Bootstrap key expansion failed".into()))?;

    encryption::decrypt(
        &EncryptionKey::from_bytes(key),
        &Nonce::from_bytes(nonce),
        ciphertext,
        &transcript,
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyType;

    #[test]
    fn test_shared_secret_agreement() {
        let alice = KeyPair::generate(KeyType::X25519).unwrap();
        let bob = KeyPair::generate(KeyType::X25519).unwrap();

        let alice_pub = alice.public_key().curve25519_bytes().unwrap();
        let bob_pub = bob.public_key().curve25519_bytes().unwrap();

        let s1 = derive_shared_secret(&alice, &bob_pub).unwrap();
        let s2 = derive_shared_secret(&bob, &alice_pub).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_shared_secret_differs_for_unrelated_peer() {
        let alice = KeyPair::generate(KeyType::X25519).unwrap();
        let bob = KeyPair::generate(KeyType::X25519).unwrap();
        let mallory = KeyPair::generate(KeyType::X25519).unwrap();

        let bob_pub = bob.public_key().curve25519_bytes().unwrap();
        let mallory_pub = mallory.public_key().curve25519_bytes().unwrap();

        let with_bob = derive_shared_secret(&alice, &bob_pub).unwrap();
        let with_mallory = derive_shared_secret(&alice, &mallory_pub).unwrap();
        assert_ne!(with_bob, with_mallory);
    }

    #[test]
    fn test_shared_secret_rejects_identity_point() {
        let alice = KeyPair::generate(KeyType::X25519).unwrap();
        assert!(derive_shared_secret(&alice, &[0u8; 32]).is_err());
    }

    #[test]
    fn test_hpke_export_round_trip() {
        let receiver = KeyPair::generate(KeyType::X25519).unwrap();
        let receiver_pub = receiver.public_key().curve25519_bytes().unwrap();

        let sealed =
            hpke_export_to_peer(&receiver_pub, b"a2a/bootstrap", b"exporter-context").unwrap();
        let opened = hpke_export_from_peer(
            &receiver,
            &sealed.encapped_key,
            b"a2a/bootstrap",
            b"exporter-context",
        )
        .unwrap();

        assert_eq!(sealed.exporter_secret, opened);
    }

    #[test]
    fn test_hpke_export_context_must_match() {
        let receiver = KeyPair::generate(KeyType::X25519).unwrap();
        let receiver_pub = receiver.public_key().curve25519_bytes().unwrap();

        let sealed = hpke_export_to_peer(&receiver_pub, b"info", b"ctx-a").unwrap();
        let opened =
            hpke_export_from_peer(&receiver, &sealed.encapped_key, b"info", b"ctx-b").unwrap();

        assert_ne!(sealed.exporter_secret, opened);
    }

    #[test]
    fn test_bootstrap_envelope_round_trip() {
        let identity = KeyPair::generate(KeyType::Ed25519).unwrap();
        let plaintext = b"{\"contextId\":\"ctx-1\"}";

        let packet = seal_to_identity(&identity.public_key(), plaintext).unwrap();
        let opened = open_with_identity(&identity, &packet).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_bootstrap_envelope_wrong_identity_fails() {
        let intended = KeyPair::generate(KeyType::Ed25519).unwrap();
        let other = KeyPair::generate(KeyType::Ed25519).unwrap();

        let packet = seal_to_identity(&intended.public_key(), b"secret").unwrap();
        assert!(open_with_identity(&other, &packet).is_err());
    }

    #[test]
    fn test_bootstrap_envelope_tamper_fails() {
        let identity = KeyPair::generate(KeyType::Ed25519).unwrap();

        let mut packet = seal_to_identity(&identity.public_key(), b"secret").unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0x01;

        assert!(open_with_identity(&identity, &packet).is_err());
    }

    #[test]
    fn test_bootstrap_envelope_truncated_fails() {
        let identity = KeyPair::generate(KeyType::Ed25519).unwrap();
        let result = open_with_identity(&identity, &[0u8; 40]);
        assert!(matches!(result, Err(Error::InvalidCiphertext)));
    }

    #[test]
    fn test_bootstrap_requires_ed25519_target() {
        let x_only = KeyPair::generate(KeyType::X25519).unwrap();
        let result = seal_to_identity(&x_only.public_key(), b"data");
        assert!(matches!(result, Err(Error::AlgorithmMismatch(_))));
    }
}
