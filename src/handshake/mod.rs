//! # Handshake State Machine
//!
//! Four DID-authenticated messages that take two agents from mutual
//! strangers to a shared forward-secret session key:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      FOUR-PHASE HANDSHAKE                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  INITIATOR (Alice)                         RESPONDER (Bob)             │
//! │  ─────────────────                         ───────────────             │
//! │                                                                         │
//! │  1. Invitation {contextID}  ─────────────► resolve Alice's DID,        │
//! │     plaintext, DID-signed                  verify signature,           │
//! │                                            cache (key, DID, TTL)       │
//! │                                                                         │
//! │  2. Request {ephemeralPub}  ─────────────► decrypt with own identity,  │
//! │     encrypted to Bob's identity            store PendingHandshake,     │
//! │                                            ask app for ephemeral       │
//! │                                                                         │
//! │  3. Response {ephemeralPub} ◄───────────── encrypted to Alice,         │
//! │     Alice: ECDH + HKDF → session           DID-signed                  │
//! │                                                                         │
//! │  4. Complete {contextID}    ─────────────► consume pending state,      │
//! │     plaintext, DID-signed                  ECDH + HKDF → same session  │
//! │                                                                         │
//! │  Both sides now hold the same 32-byte key and session ID.              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## State table (responder)
//!
//! | State | On Invitation | On Request | On Complete | On TTL |
//! |-------|---------------|-----------|-------------|--------|
//! | Idle | cache peer | reject (no peer) | reject (no pending) | — |
//! | CachedPeer | refresh TTL | store pending | reject (no pending) | drop peer |
//! | Pending | — | replace (latest wins) | create session | drop pending |
//!
//! Failures abort the current phase and leave prior state for the
//! context untouched; a late or out-of-order message cannot corrupt
//! earlier progress.

mod events;
mod messages;

pub use events::{
    CompleteCallback, EphemeralProvider, HandshakeEvents, InvitationCallback, KeyIdIssuer,
    RequestCallback,
};
pub use messages::{
    CompletePayload, HandshakeMessage, HandshakePhase, InvitationPayload, RequestPayload,
    ResponsePayload, AGENT_DID_HEADER, HANDSHAKE_LABEL,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::crypto::{
    self, derive_shared_secret, export_public_json, import_json, ImportedKey, KeyPair, KeyType,
    PublicKey,
};
use crate::did::resolver::Resolver;
use crate::did::AgentDid;
use crate::error::{Error, Result};
use crate::session::{SessionCreated, SessionFactory, SessionParams};
use crate::sweeper::{spawn_sweeper, SweepHandle};

/// Handshake timing configuration
#[derive(Debug, Clone, Copy)]
pub struct HandshakeConfig {
    /// Lifetime of pending (post-Request) state
    pub pending_ttl: Duration,
    /// Lifetime of a cached peer (post-Invitation)
    pub peer_ttl: Duration,
    /// Background sweep interval
    pub cleanup_interval: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(900),
            peer_ttl: Duration::from_secs(900),
            cleanup_interval: Duration::from_secs(600),
        }
    }
}

/// Peer state cached by a valid Invitation
struct CachedPeer {
    public_key: PublicKey,
    did: AgentDid,
    expires_at: Instant,
}

/// Per-context record between Request and Complete
struct PendingHandshake {
    peer_ephemeral: [u8; 32],
    local_ephemeral: [u8; 32],
    local_pair: Arc<KeyPair>,
    expires_at: Instant,
}

/// What a processed phase hands back to the carrier
#[derive(Debug, Default)]
pub struct HandshakeReply {
    /// Phase accepted
    pub ack: bool,
    /// Outbound message to deliver (the Response after a Request)
    pub message: Option<HandshakeMessage>,
    /// Session ID, once established
    pub session_id: Option<String>,
    /// Key ID the peer may use to locate the session
    pub key_id: Option<String>,
}

// ============================================================================
// RESPONDER
// ============================================================================

/// Responder side of the handshake
///
/// Owns the cached-peer and pending maps; phases for a context are
/// processed one at a time under a coarse phase lock.
pub struct HandshakeResponder {
    identity: Arc<KeyPair>,
    did: AgentDid,
    resolver: Arc<dyn Resolver>,
    factory: Arc<dyn SessionFactory>,
    events: HandshakeEvents,
    config: HandshakeConfig,
    peers: Mutex<HashMap<String, CachedPeer>>,
    pending: Mutex<HashMap<String, PendingHandshake>>,
    phase_lock: tokio::sync::Mutex<()>,
}

impl HandshakeResponder {
    /// New responder bound to an Ed25519 identity
    pub fn new(
        identity: Arc<KeyPair>,
        did: AgentDid,
        resolver: Arc<dyn Resolver>,
        factory: Arc<dyn SessionFactory>,
        events: HandshakeEvents,
        config: HandshakeConfig,
    ) -> Result<Self> {
        if identity.key_type() != KeyType::Ed25519 {
            return Err(Error::AlgorithmMismatch(format!(
                "Responder identity must be Ed25519, got {}",
                identity.key_type()
            )));
        }
        Ok(Self {
            identity,
            did,
            resolver,
            factory,
            events,
            config,
            peers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            phase_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Dispatch one inbound handshake message
    ///
    /// Phase 3 travels the other way; receiving it here is a protocol
    /// violation.
    pub async fn handle_message(&self, message: &HandshakeMessage) -> Result<HandshakeReply> {
        let _serialized = self.phase_lock.lock().await;
        match message.phase {
            HandshakePhase::Invitation => self.on_invitation(message).await,
            HandshakePhase::Request => self.on_request(message),
            HandshakePhase::Complete => self.on_complete(message),
            HandshakePhase::Response => Err(Error::HandshakeInvalidTaskId(
                "Response messages are consumed by the initiator".into(),
            )),
        }
    }

    /// Phase 1: authenticate the initiator and cache its key
    async fn on_invitation(&self, message: &HandshakeMessage) -> Result<HandshakeReply> {
        let payload: InvitationPayload = serde_json::from_slice(&message.body)?;
        if payload.context_id != message.context_id {
            return Err(Error::InvalidHeader(
                "Invitation context does not match envelope".into(),
            ));
        }

        let metadata = self.resolver.resolve(&message.sender_did).await?;
        if !metadata.is_usable() {
            return Err(Error::InactiveAgent(message.sender_did.as_str().into()));
        }
        message.verify(&metadata.public_key)?;

        self.peers.lock().insert(
            message.context_id.clone(),
            CachedPeer {
                public_key: metadata.public_key.clone(),
                did: message.sender_did.clone(),
                expires_at: Instant::now() + self.config.peer_ttl,
            },
        );

        debug!(context = %message.context_id, peer = %message.sender_did, "invitation accepted");
        if let Some(callback) = &self.events.on_invitation {
            callback(&message.sender_did, &message.context_id);
        }
        Ok(HandshakeReply {
            ack: true,
            ..Default::default()
        })
    }

    /// Phase 2: open the ephemeral exchange and store pending state
    fn on_request(&self, message: &HandshakeMessage) -> Result<HandshakeReply> {
        let (peer_key, _peer_did) = {
            let peers = self.peers.lock();
            let peer = peers
                .get(&message.context_id)
                .filter(|p| p.expires_at > Instant::now())
                .ok_or_else(|| Error::HandshakeNoCachedPeer(message.context_id.clone()))?;
            (peer.public_key.clone(), peer.did.clone())
        };
        message.verify(&peer_key)?;

        let plaintext = crypto::open_with_identity(&self.identity, &message.body)
            .map_err(|e| Error::HandshakeDecryptFailed(e.to_string()))?;
        let payload: RequestPayload = serde_json::from_slice(&plaintext)?;
        if payload.context_id != message.context_id {
            return Err(Error::InvalidHeader(
                "Request context does not match envelope".into(),
            ));
        }

        let peer_ephemeral = match import_json(&payload.ephemeral_pub)? {
            ImportedKey::Public(key) if key.key_type() == KeyType::X25519 => {
                key.curve25519_bytes()?
            }
            _ => {
                return Err(Error::InvalidKey(
                    "Request ephemeral must be an X25519 public key".into(),
                ))
            }
        };

        let local_pair = (self.events.ask_ephemeral)(&message.context_id)?;
        if local_pair.key_type() != KeyType::X25519 {
            return Err(Error::InvalidKey(
                "Ephemeral provider must supply an X25519 pair".into(),
            ));
        }
        let local_ephemeral = local_pair.public_key().curve25519_bytes()?;

        // A retrying peer may refresh its ephemeral: latest wins
        self.pending.lock().insert(
            message.context_id.clone(),
            PendingHandshake {
                peer_ephemeral,
                local_ephemeral,
                local_pair,
                expires_at: Instant::now() + self.config.pending_ttl,
            },
        );

        let response = ResponsePayload {
            context_id: message.context_id.clone(),
            ephemeral_pub: export_public_json(&PublicKey::x25519(&local_ephemeral)),
            ack: true,
        };
        let sealed = crypto::seal_to_identity(&peer_key, &serde_json::to_vec(&response)?)?;
        let reply_message = HandshakeMessage::sign(
            HandshakePhase::Response,
            message.context_id.clone(),
            self.did.clone(),
            sealed,
            &self.identity,
        )?;

        debug!(context = %message.context_id, "request accepted, pending stored");
        if let Some(callback) = &self.events.on_request {
            callback(&message.context_id);
        }
        Ok(HandshakeReply {
            ack: true,
            message: Some(reply_message),
            ..Default::default()
        })
    }

    /// Phase 4: consume pending state and install the session
    fn on_complete(&self, message: &HandshakeMessage) -> Result<HandshakeReply> {
        let (peer_key, peer_did) = {
            let peers = self.peers.lock();
            let peer = peers
                .get(&message.context_id)
                .filter(|p| p.expires_at > Instant::now())
                .ok_or_else(|| Error::HandshakeNoCachedPeer(message.context_id.clone()))?;
            (peer.public_key.clone(), peer.did.clone())
        };
        message.verify(&peer_key)?;

        let pending = {
            let mut pending_map = self.pending.lock();
            match pending_map.remove(&message.context_id) {
                Some(pending) if pending.expires_at > Instant::now() => Some(pending),
                _ => None,
            }
        };
        let pending = match pending {
            Some(pending) => pending,
            None => {
                // Soft event: the application learns about the stray
                // Complete, the caller gets a specific error, prior
                // state stays untouched
                warn!(context = %message.context_id, "complete without pending handshake");
                if let Some(callback) = &self.events.on_complete {
                    callback(&message.context_id, None);
                }
                return Err(Error::HandshakeNoPending(message.context_id.clone()));
            }
        };

        let shared = derive_shared_secret(&pending.local_pair, &pending.peer_ephemeral)?;
        let params = SessionParams {
            context_id: message.context_id.clone(),
            self_ephemeral: pending.local_ephemeral,
            peer_ephemeral: pending.peer_ephemeral,
            label: HANDSHAKE_LABEL.to_string(),
            peer_did: Some(peer_did),
        };
        let created = self.factory.create_session(&params, Some(shared))?;

        let key_id = match &self.events.issue_key_id {
            Some(issuer) => issuer(&created.session_id),
            None => created.key_id.clone(),
        };

        info!(
            context = %message.context_id,
            session = %created.session_id,
            reused = created.reused,
            "handshake complete"
        );
        if let Some(callback) = &self.events.on_complete {
            callback(&message.context_id, Some(&params));
        }
        Ok(HandshakeReply {
            ack: true,
            message: None,
            session_id: Some(created.session_id),
            key_id: Some(key_id),
        })
    }

    /// Drop expired pending records and cached peers
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.pending.lock().retain(|context, pending| {
            let keep = pending.expires_at > now;
            if !keep {
                debug!(context, "sweeping expired pending handshake");
            }
            keep
        });
        self.peers.lock().retain(|context, peer| {
            let keep = peer.expires_at > now;
            if !keep {
                debug!(context, "sweeping expired cached peer");
            }
            keep
        });
    }

    /// Number of live pending records
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of cached peers
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Start the cleanup loop at the configured interval
    pub fn start_cleanup(self: &Arc<Self>) -> SweepHandle {
        let responder = Arc::clone(self);
        spawn_sweeper("handshake", self.config.cleanup_interval, move || {
            responder.sweep_expired()
        })
    }
}

// ============================================================================
// INITIATOR
// ============================================================================

/// Initiator side of the handshake
///
/// Tracks one ephemeral pair per open context until the Response
/// arrives.
pub struct HandshakeInitiator {
    identity: Arc<KeyPair>,
    did: AgentDid,
    ephemerals: Mutex<HashMap<String, Arc<KeyPair>>>,
}

impl HandshakeInitiator {
    /// New initiator bound to an Ed25519 identity
    pub fn new(identity: Arc<KeyPair>, did: AgentDid) -> Result<Self> {
        if identity.key_type() != KeyType::Ed25519 {
            return Err(Error::AlgorithmMismatch(format!(
                "Initiator identity must be Ed25519, got {}",
                identity.key_type()
            )));
        }
        Ok(Self {
            identity,
            did,
            ephemerals: Mutex::new(HashMap::new()),
        })
    }

    /// Fresh opaque context correlator
    pub fn new_context_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Phase 1 message
    pub fn invitation(&self, context_id: &str) -> Result<HandshakeMessage> {
        let payload = InvitationPayload {
            context_id: context_id.to_string(),
            did: self.did.as_str().to_string(),
        };
        HandshakeMessage::sign(
            HandshakePhase::Invitation,
            context_id,
            self.did.clone(),
            serde_json::to_vec(&payload)?,
            &self.identity,
        )
    }

    /// Phase 2 message: generate an ephemeral and encrypt it to the
    /// responder's identity key
    pub fn request(
        &self,
        context_id: &str,
        responder_identity: &PublicKey,
    ) -> Result<HandshakeMessage> {
        let ephemeral = Arc::new(KeyPair::generate(KeyType::X25519)?);
        let payload = RequestPayload {
            context_id: context_id.to_string(),
            ephemeral_pub: export_public_json(&ephemeral.public_key()),
        };
        let sealed = crypto::seal_to_identity(responder_identity, &serde_json::to_vec(&payload)?)?;

        self.ephemerals
            .lock()
            .insert(context_id.to_string(), ephemeral);

        HandshakeMessage::sign(
            HandshakePhase::Request,
            context_id,
            self.did.clone(),
            sealed,
            &self.identity,
        )
    }

    /// Phase 3: open the responder's ephemeral, derive the session, and
    /// install it through the factory
    pub fn handle_response(
        &self,
        message: &HandshakeMessage,
        responder_identity: &PublicKey,
        factory: &dyn SessionFactory,
    ) -> Result<SessionCreated> {
        message.verify(responder_identity)?;

        let plaintext = crypto::open_with_identity(&self.identity, &message.body)
            .map_err(|e| Error::HandshakeDecryptFailed(e.to_string()))?;
        let payload: ResponsePayload = serde_json::from_slice(&plaintext)?;
        if payload.context_id != message.context_id {
            return Err(Error::InvalidHeader(
                "Response context does not match envelope".into(),
            ));
        }

        let peer_ephemeral = match import_json(&payload.ephemeral_pub)? {
            ImportedKey::Public(key) if key.key_type() == KeyType::X25519 => {
                key.curve25519_bytes()?
            }
            _ => {
                return Err(Error::InvalidKey(
                    "Response ephemeral must be an X25519 public key".into(),
                ))
            }
        };

        let ephemeral = self
            .ephemerals
            .lock()
            .get(&message.context_id)
            .cloned()
            .ok_or_else(|| Error::HandshakeNoPending(message.context_id.clone()))?;

        let shared = derive_shared_secret(&ephemeral, &peer_ephemeral)?;
        let params = SessionParams {
            context_id: message.context_id.clone(),
            self_ephemeral: ephemeral.public_key().curve25519_bytes()?,
            peer_ephemeral,
            label: HANDSHAKE_LABEL.to_string(),
            peer_did: Some(message.sender_did.clone()),
        };
        factory.create_session(&params, Some(shared))
    }

    /// Phase 4 message; drops the context's ephemeral state
    pub fn complete(&self, context_id: &str) -> Result<HandshakeMessage> {
        let payload = CompletePayload {
            context_id: context_id.to_string(),
        };
        let message = HandshakeMessage::sign(
            HandshakePhase::Complete,
            context_id,
            self.did.clone(),
            serde_json::to_vec(&payload)?,
            &self.identity,
        )?;
        self.ephemerals.lock().remove(context_id);
        Ok(message)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::rpc::{ChainRpc, ContractCall, InMemoryChain, Registration, TransactionRequest};
    use crate::did::resolver::RpcResolver;
    use crate::did::Chain;
    use crate::session::{MessageHeader, SessionManager};

    struct Party {
        identity: Arc<KeyPair>,
        did: AgentDid,
        manager: Arc<SessionManager>,
    }

    async fn register_party(chain: &Arc<InMemoryChain>, name: &str) -> Party {
        let identity = Arc::new(KeyPair::generate(KeyType::Ed25519).unwrap());
        let pubkey = identity.public_key();
        let address = bs58::encode(pubkey.curve25519_bytes().unwrap()).into_string();
        let did = AgentDid::new(Chain::Solana, &address).unwrap();

        chain
            .send_transaction(TransactionRequest {
                sender: address,
                call: ContractCall::Register {
                    registration: Registration {
                        did: did.clone(),
                        name: name.into(),
                        description: "handshake test agent".into(),
                        endpoint: format!("https://{}.example.com", name),
                        capabilities: Default::default(),
                        public_key: pubkey,
                        keys: Vec::new(),
                    },
                    salt: [0u8; 32],
                },
                gas_limit: 300_000,
                gas_price: 1,
                nonce: 0,
            })
            .await
            .unwrap();

        Party {
            identity,
            did,
            manager: Arc::new(SessionManager::default()),
        }
    }

    async fn setup() -> (Party, Party, Arc<HandshakeResponder>) {
        let chain = InMemoryChain::new(1);
        let alice = register_party(&chain, "alice").await;
        let bob = register_party(&chain, "bob").await;

        let responder = Arc::new(
            HandshakeResponder::new(
                bob.identity.clone(),
                bob.did.clone(),
                Arc::new(RpcResolver::new(chain)),
                bob.manager.clone(),
                HandshakeEvents::new(),
                HandshakeConfig::default(),
            )
            .unwrap(),
        );
        (alice, bob, responder)
    }

    #[tokio::test]
    async fn test_full_handshake_and_encrypted_round_trip() {
        let (alice, bob, responder) = setup().await;
        let initiator = HandshakeInitiator::new(alice.identity.clone(), alice.did.clone()).unwrap();
        let context = HandshakeInitiator::new_context_id();

        // Phase 1
        let invitation = initiator.invitation(&context).unwrap();
        assert!(responder.handle_message(&invitation).await.unwrap().ack);

        // Phase 2 → 3
        let request = initiator
            .request(&context, &bob.identity.public_key())
            .unwrap();
        let reply = responder.handle_message(&request).await.unwrap();
        let response = reply.message.expect("responder returns the Response");

        // Phase 3 (initiator side)
        let alice_session = initiator
            .handle_response(&response, &bob.identity.public_key(), alice.manager.as_ref())
            .unwrap();

        // Phase 4
        let complete = initiator.complete(&context).unwrap();
        let reply = responder.handle_message(&complete).await.unwrap();
        let bob_session_id = reply.session_id.expect("responder installed a session");

        // Both sides independently derived the same session
        assert_eq!(alice_session.session_id, bob_session_id);
        assert_eq!(Some(alice_session.key_id.clone()), reply.key_id);

        // Encrypted traffic flows both ways through the managers
        let a = alice.manager.get(&alice_session.session_id).unwrap();
        let b = bob.manager.get(&bob_session_id).unwrap();

        let (seq, envelope) = a.encrypt(b"hello bob, this is alice").unwrap();
        let header = MessageHeader {
            sequence: seq,
            nonce: "n-1".into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let plaintext = bob.manager.receive(&b, &envelope, &header).unwrap();
        assert_eq!(plaintext, b"hello bob, this is alice");

        let (seq, envelope) = b.encrypt(b"hello alice").unwrap();
        let header = MessageHeader {
            sequence: seq,
            nonce: "n-2".into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let plaintext = alice.manager.receive(&a, &envelope, &header).unwrap();
        assert_eq!(plaintext, b"hello alice");
    }

    #[tokio::test]
    async fn test_request_without_invitation_rejected() {
        let (alice, bob, responder) = setup().await;
        let initiator = HandshakeInitiator::new(alice.identity.clone(), alice.did.clone()).unwrap();

        let request = initiator
            .request("ctx-orphan", &bob.identity.public_key())
            .unwrap();
        let result = responder.handle_message(&request).await;
        assert!(matches!(result, Err(Error::HandshakeNoCachedPeer(_))));
    }

    #[tokio::test]
    async fn test_complete_without_pending_is_soft() {
        let (alice, _bob, responder) = setup().await;
        let initiator = HandshakeInitiator::new(alice.identity.clone(), alice.did.clone()).unwrap();
        let context = HandshakeInitiator::new_context_id();

        let invitation = initiator.invitation(&context).unwrap();
        responder.handle_message(&invitation).await.unwrap();

        // Complete with no Request in between
        let complete = initiator.complete(&context).unwrap();
        let result = responder.handle_message(&complete).await;
        assert!(matches!(result, Err(Error::HandshakeNoPending(_))));

        // Peer cache is untouched by the failed phase
        assert_eq!(responder.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_initiator_rejected() {
        let (_alice, bob, responder) = setup().await;

        // An identity the chain has never seen
        let ghost_identity = Arc::new(KeyPair::generate(KeyType::Ed25519).unwrap());
        let ghost_did = AgentDid::new(
            Chain::Solana,
            &bs58::encode(
                ghost_identity
                    .public_key()
                    .curve25519_bytes()
                    .unwrap(),
            )
            .into_string(),
        )
        .unwrap();
        let ghost = HandshakeInitiator::new(ghost_identity, ghost_did).unwrap();

        let invitation = ghost.invitation("ctx-ghost").unwrap();
        let result = responder.handle_message(&invitation).await;
        assert!(matches!(result, Err(Error::DidNotFound(_))));
        let _ = bob;
    }

    #[tokio::test]
    async fn test_deactivated_initiator_rejected() {
        let chain = InMemoryChain::new(1);
        let alice = register_party(&chain, "alice").await;
        let bob = register_party(&chain, "bob").await;

        // Alice deactivates herself before inviting
        chain
            .send_transaction(TransactionRequest {
                sender: alice.did.identifier().to_string(),
                call: ContractCall::DeactivateAgent {
                    did: alice.did.clone(),
                },
                gas_limit: 100_000,
                gas_price: 1,
                nonce: 1,
            })
            .await
            .unwrap();

        let responder = Arc::new(
            HandshakeResponder::new(
                bob.identity.clone(),
                bob.did.clone(),
                Arc::new(RpcResolver::new(chain)),
                bob.manager.clone(),
                HandshakeEvents::new(),
                HandshakeConfig::default(),
            )
            .unwrap(),
        );

        let initiator = HandshakeInitiator::new(alice.identity.clone(), alice.did.clone()).unwrap();
        let result = responder
            .handle_message(&initiator.invitation("ctx-inactive").unwrap())
            .await;
        assert!(matches!(result, Err(Error::InactiveAgent(_))));
    }

    #[tokio::test]
    async fn test_forged_invitation_signature_rejected() {
        let (alice, _bob, responder) = setup().await;

        // Signed by the wrong key for Alice's DID
        let wrong_identity = Arc::new(KeyPair::generate(KeyType::Ed25519).unwrap());
        let forger = HandshakeInitiator::new(wrong_identity, alice.did.clone()).unwrap();

        let invitation = forger.invitation("ctx-forged").unwrap();
        let result = responder.handle_message(&invitation).await;
        assert!(matches!(result, Err(Error::InvalidSignature)));
        assert_eq!(responder.peer_count(), 0, "no state from a rejected phase");
    }

    #[tokio::test]
    async fn test_duplicate_request_latest_ephemeral_wins() {
        let (alice, bob, responder) = setup().await;
        let initiator = HandshakeInitiator::new(alice.identity.clone(), alice.did.clone()).unwrap();
        let context = HandshakeInitiator::new_context_id();

        responder
            .handle_message(&initiator.invitation(&context).unwrap())
            .await
            .unwrap();

        // First request, then a retry with a fresh ephemeral
        let first = initiator
            .request(&context, &bob.identity.public_key())
            .unwrap();
        responder.handle_message(&first).await.unwrap();

        let second = initiator
            .request(&context, &bob.identity.public_key())
            .unwrap();
        let response = responder
            .handle_message(&second)
            .await
            .unwrap()
            .message
            .unwrap();
        assert_eq!(responder.pending_count(), 1, "retry replaces, not stacks");

        // The session derives from the second ephemeral on both sides
        let alice_session = initiator
            .handle_response(&response, &bob.identity.public_key(), alice.manager.as_ref())
            .unwrap();
        let reply = responder
            .handle_message(&initiator.complete(&context).unwrap())
            .await
            .unwrap();
        assert_eq!(Some(alice_session.session_id), reply.session_id);
    }

    #[tokio::test]
    async fn test_pending_ttl_sweep_rejects_late_complete() {
        let chain = InMemoryChain::new(1);
        let alice = register_party(&chain, "alice").await;
        let bob = register_party(&chain, "bob").await;

        let responder = Arc::new(
            HandshakeResponder::new(
                bob.identity.clone(),
                bob.did.clone(),
                Arc::new(RpcResolver::new(chain)),
                bob.manager.clone(),
                HandshakeEvents::new(),
                HandshakeConfig {
                    pending_ttl: Duration::from_millis(10),
                    ..Default::default()
                },
            )
            .unwrap(),
        );

        let initiator = HandshakeInitiator::new(alice.identity.clone(), alice.did.clone()).unwrap();
        let context = HandshakeInitiator::new_context_id();

        responder
            .handle_message(&initiator.invitation(&context).unwrap())
            .await
            .unwrap();
        responder
            .handle_message(&initiator.request(&context, &bob.identity.public_key()).unwrap())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        responder.sweep_expired();
        assert_eq!(responder.pending_count(), 0);

        let result = responder
            .handle_message(&initiator.complete(&context).unwrap())
            .await;
        assert!(matches!(result, Err(Error::HandshakeNoPending(_))));
    }

    #[tokio::test]
    async fn test_cleanup_loop_sweeps() {
        let chain = InMemoryChain::new(1);
        let alice = register_party(&chain, "alice").await;
        let bob = register_party(&chain, "bob").await;

        let responder = Arc::new(
            HandshakeResponder::new(
                bob.identity.clone(),
                bob.did.clone(),
                Arc::new(RpcResolver::new(chain)),
                bob.manager.clone(),
                HandshakeEvents::new(),
                HandshakeConfig {
                    peer_ttl: Duration::from_millis(10),
                    cleanup_interval: Duration::from_millis(15),
                    ..Default::default()
                },
            )
            .unwrap(),
        );

        let initiator = HandshakeInitiator::new(alice.identity.clone(), alice.did.clone()).unwrap();
        responder
            .handle_message(&initiator.invitation("ctx-sweep").unwrap())
            .await
            .unwrap();
        assert_eq!(responder.peer_count(), 1);

        let handle = responder.start_cleanup();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;
        assert_eq!(responder.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_events_fire() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let chain = InMemoryChain::new(1);
        let alice = register_party(&chain, "alice").await;
        let bob = register_party(&chain, "bob").await;

        let invitations = Arc::new(AtomicU32::new(0));
        let requests = Arc::new(AtomicU32::new(0));
        let completes = Arc::new(AtomicU32::new(0));

        let events = {
            let invitations = invitations.clone();
            let requests = requests.clone();
            let completes = completes.clone();
            HandshakeEvents::new()
                .on_invitation(Box::new(move |_did, _ctx| {
                    invitations.fetch_add(1, Ordering::SeqCst);
                }))
                .on_request(Box::new(move |_ctx| {
                    requests.fetch_add(1, Ordering::SeqCst);
                }))
                .on_complete(Box::new(move |_ctx, params| {
                    assert!(params.is_some());
                    completes.fetch_add(1, Ordering::SeqCst);
                }))
        };

        let responder = Arc::new(
            HandshakeResponder::new(
                bob.identity.clone(),
                bob.did.clone(),
                Arc::new(RpcResolver::new(chain)),
                bob.manager.clone(),
                events,
                HandshakeConfig::default(),
            )
            .unwrap(),
        );

        let initiator = HandshakeInitiator::new(alice.identity.clone(), alice.did.clone()).unwrap();
        let context = HandshakeInitiator::new_context_id();

        responder
            .handle_message(&initiator.invitation(&context).unwrap())
            .await
            .unwrap();
        responder
            .handle_message(&initiator.request(&context, &bob.identity.public_key()).unwrap())
            .await
            .unwrap();
        responder
            .handle_message(&initiator.complete(&context).unwrap())
            .await
            .unwrap();

        assert_eq!(invitations.load(Ordering::SeqCst), 1);
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert_eq!(completes.load(Ordering::SeqCst), 1);
    }
}
