//! # Sage Core
//!
//! A security layer for autonomous agent-to-agent communication: each
//! agent is bound to a decentralized identifier anchored in a chain
//! registry, sessions are negotiated with DID-authenticated ephemeral
//! key agreement, and every HTTP message in between is signed and
//! verified.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SAGE CORE MODULES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │     DID     │  │  Handshake  │  │   Session   │  │   HTTP Sig   │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Resolve   │  │ - 4 phases  │  │ - AES-GCM   │  │ - RFC 9421   │   │
//! │  │ - Registry  │  │ - TTL state │  │ - Ordering  │  │ - RFC 8941   │   │
//! │  │ - Chains    │  │ - Events    │  │ - Dedup     │  │ - Policy     │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘   │
//! │         │                │                │                │           │
//! │         └────────────────┴────────┬───────┴────────────────┘           │
//! │                                   │                                     │
//! │  ┌─────────────┐  ┌─────────────┐ │ ┌─────────────────────────────────┐│
//! │  │   Crypto    │  │ Agent Card  │ │ │            Error                ││
//! │  │             │  │             │ │ │                                 ││
//! │  │ - 4 algos   │  │ - Proofs    │◄┘ │ - one taxonomy, retryability   ││
//! │  │ - HPKE      │  │ - Canonical │   │   classification               ││
//! │  │ - HKDF      │  │   JSON      │   │                                 ││
//! │  └─────────────┘  └─────────────┘   └─────────────────────────────────┘│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`crypto`] - Key primitives, key exchange, AEAD, derivation
//! - [`did`] - DID parsing, resolution, registry client, chain policy
//! - [`handshake`] - Four-phase authenticated key agreement
//! - [`session`] - Session lifecycle, ordering, deduplication
//! - [`httpsig`] - RFC 9421 HTTP message signatures
//! - [`card`] - Agent-card documents and proofs
//!
//! ## Trust Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SECURITY LAYERS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Layer 1: Identity (chain registry)                                    │
//! │  ──────────────────────────────────                                     │
//! │  A DID resolves on-chain to the agent's signing key. Nobody but        │
//! │  the owning address can change it; no CA is involved.                  │
//! │                                                                         │
//! │  Layer 2: Key agreement (four-phase handshake)                         │
//! │  ─────────────────────────────────────────────                          │
//! │  Every handshake message is DID-signed; ephemerals travel inside       │
//! │  envelopes encrypted to the peer identity; X25519 ECDH plus HKDF       │
//! │  yields a forward-secret 32-byte session seed.                         │
//! │                                                                         │
//! │  Layer 3: Traffic protection (sessions)                                │
//! │  ──────────────────────────────────────                                 │
//! │  AES-256-GCM envelopes, strictly monotonic sequence numbers, a         │
//! │  TTL deduplication set, and bounded session lifetimes defend           │
//! │  against forgery, replay, and reordering.                              │
//! │                                                                         │
//! │  Layer 4: Message signatures (RFC 9421)                                │
//! │  ──────────────────────────────────────                                 │
//! │  Every HTTP carrier message is signed over its covered components      │
//! │  and verified under timestamp and required-component policy.           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod card;
pub mod crypto;
pub mod did;
pub mod error;
pub mod handshake;
pub mod httpsig;
pub mod session;
mod sweeper;
/// Time utilities shared across sessions, handshakes, and signatures.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use card::{generate_card, verify_card, AgentCard};
pub use crypto::{KeyPair, KeyType, PublicKey};
pub use did::{AgentDid, AgentMetadata, Chain};
pub use error::{Error, Result};
pub use handshake::{HandshakeInitiator, HandshakeMessage, HandshakeResponder};
pub use httpsig::{sign_request, verify_request, SignatureParams, VerifyOptions};
pub use session::{MessageHeader, Session, SessionConfig, SessionManager};
pub use sweeper::SweepHandle;
