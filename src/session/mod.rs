//! # Session Management
//!
//! Owns every established session: creation from handshake output,
//! O(1) lookup by context ID and key ID, inbound gating (ordering +
//! deduplication), lifetime enforcement, and the scavenger loop.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SESSION LIFECYCLE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  handshake Complete                                                    │
//! │        │  SessionParams { context, ephemerals, label } + shared secret │
//! │        ▼                                                                │
//! │  create_session ── HKDF ──► session key + deterministic session ID     │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌──────────────┐   encrypt/decrypt   ┌──────────────────────────┐     │
//! │  │   Session    │◄───────────────────►│ order check + dedup gate │     │
//! │  └──────┬───────┘                     └──────────────────────────┘     │
//! │         │  max-age / idle / message cap / close                        │
//! │         ▼                                                               │
//! │  scavenger closes and unindexes                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both parties run the same derivation over the same inputs, so they
//! converge on the same session ID and key without ever sending either.

mod dedup;
mod order;
mod secure;

pub use dedup::{DedupDetector, DEFAULT_DEDUP_TTL};
pub use order::{MessageHeader, OrderManager};
pub use secure::{ExpiryReason, Session, SessionConfig};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::crypto::{derive_session_id, derive_session_key};
use crate::did::AgentDid;
use crate::error::{Error, Result};
use crate::sweeper::{spawn_sweeper, SweepHandle};

/// Inputs both handshake roles agree on before a session exists
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Handshake context ID
    pub context_id: String,
    /// Our ephemeral X25519 public key
    pub self_ephemeral: [u8; 32],
    /// Peer ephemeral X25519 public key
    pub peer_ephemeral: [u8; 32],
    /// Domain-separation label (`a2a/handshake v1`)
    pub label: String,
    /// Peer identity, when known
    pub peer_did: Option<AgentDid>,
}

/// What session creation hands back to the handshake
#[derive(Debug, Clone)]
pub struct SessionCreated {
    /// Deterministic session ID
    pub session_id: String,
    /// Key ID bound for carrier lookup
    pub key_id: String,
    /// True when an identical session already existed
    pub reused: bool,
}

/// Narrow seam the handshake drives session creation through
///
/// Keeps the dependency one-directional: the handshake hands over value
/// objects and never holds a session manager beyond this trait.
pub trait SessionFactory: Send + Sync {
    /// Install a session from handshake parameters and the derived
    /// shared secret
    fn create_session(
        &self,
        params: &SessionParams,
        shared_secret: Option<[u8; 32]>,
    ) -> Result<SessionCreated>;
}

/// Owns all sessions and their indices
pub struct SessionManager {
    default_config: SessionConfig,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    by_context: RwLock<HashMap<String, String>>,
    by_key_id: RwLock<HashMap<String, String>>,
    order: OrderManager,
    dedup: Arc<DedupDetector>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SessionManager {
    /// Manager applying `default_config` to each new session
    pub fn new(default_config: SessionConfig) -> Self {
        Self {
            default_config,
            sessions: RwLock::new(HashMap::new()),
            by_context: RwLock::new(HashMap::new()),
            by_key_id: RwLock::new(HashMap::new()),
            order: OrderManager::new(),
            dedup: Arc::new(DedupDetector::new()),
        }
    }

    /// The dedup detector gating inbound messages
    pub fn dedup(&self) -> &Arc<DedupDetector> {
        &self.dedup
    }

    /// Install a session from handshake output
    ///
    /// The session key is HKDF-SHA256 over the shared secret with the
    /// lexicographically sorted ephemerals as salt and the handshake
    /// label as info; the session ID comes from the same inputs. If an
    /// identical session is already live, it is returned with
    /// `reused = true`. A different session on the same context ID is
    /// replaced (one session per context at a time).
    pub fn create_session(
        &self,
        params: &SessionParams,
        shared_secret: Option<[u8; 32]>,
    ) -> Result<SessionCreated> {
        let shared = shared_secret.ok_or_else(|| {
            Error::KeyDerivationFailed("Session creation requires a shared secret".into())
        })?;

        let key = derive_session_key(
            &shared,
            &params.self_ephemeral,
            &params.peer_ephemeral,
            &params.label,
        )?;
        let session_id = derive_session_id(
            &shared,
            &params.self_ephemeral,
            &params.peer_ephemeral,
            &params.label,
        )?;

        if let Some(existing) = self.sessions.read().get(&session_id) {
            if existing.is_valid() {
                return Ok(SessionCreated {
                    session_id: session_id.clone(),
                    key_id: existing.key_id().to_string(),
                    reused: true,
                });
            }
        }

        // One live session per context: replace any predecessor
        let previous_id = self.by_context.read().get(&params.context_id).cloned();
        if let Some(previous_id) = previous_id {
            if previous_id != session_id {
                self.close(&previous_id);
            }
        }

        let key_id = derive_key_id(&session_id);
        let session = Arc::new(Session::new(
            session_id.clone(),
            params.context_id.clone(),
            params.peer_did.clone(),
            key_id.clone(),
            key,
            self.default_config,
        ));

        self.sessions
            .write()
            .insert(session_id.clone(), session.clone());
        self.by_context
            .write()
            .insert(params.context_id.clone(), session_id.clone());
        self.by_key_id
            .write()
            .insert(key_id.clone(), session_id.clone());

        info!(
            session = %session_id,
            context = %params.context_id,
            "session established"
        );
        Ok(SessionCreated {
            session_id,
            key_id,
            reused: false,
        })
    }

    /// Session by its ID
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Session for a handshake context
    pub fn get_by_context(&self, context_id: &str) -> Option<Arc<Session>> {
        let session_id = self.by_context.read().get(context_id).cloned()?;
        self.get(&session_id)
    }

    /// Session by its bound key ID; only returned while still valid
    pub fn get_by_key_id(&self, key_id: &str) -> Option<Arc<Session>> {
        let session_id = self.by_key_id.read().get(key_id).cloned()?;
        let session = self.get(&session_id)?;
        session.is_valid().then_some(session)
    }

    /// Number of tracked sessions (including expired-but-unswept)
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are tracked
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Close a session; idempotent, unknown IDs are a no-op
    pub fn close(&self, session_id: &str) {
        let session = match self.sessions.write().remove(session_id) {
            Some(session) => session,
            None => return,
        };
        session.close();
        self.by_context.write().remove(session.context_id());
        self.by_key_id.write().remove(session.key_id());
        self.order.remove_session(session_id);
        debug!(session = session_id, "session closed");
    }

    /// Decrypt an inbound envelope and gate it through ordering and
    /// deduplication before handing the plaintext to the application
    ///
    /// The dedup check runs first so a byte-identical retransmission is
    /// reported as `MessageReplay` without disturbing order state.
    pub fn receive(
        &self,
        session: &Session,
        envelope: &[u8],
        header: &MessageHeader,
    ) -> Result<Vec<u8>> {
        if self.dedup.is_duplicate(header) {
            return Err(Error::MessageReplay("duplicate message".into()));
        }
        let plaintext = session.decrypt(envelope)?;
        self.order.check_and_advance(session.session_id(), header)?;
        self.dedup.mark_seen(header);
        Ok(plaintext)
    }

    /// Close every session whose lifetime tripped
    pub fn sweep_expired(&self) {
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, session)| !session.is_valid())
            .map(|(id, _)| id.clone())
            .collect();
        for session_id in expired {
            debug!(session = %session_id, "scavenging expired session");
            self.close(&session_id);
        }
    }

    /// Start the scavenger loop
    pub fn start_scavenger(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let manager = Arc::clone(self);
        spawn_sweeper("sessions", interval, move || manager.sweep_expired())
    }
}

impl SessionFactory for SessionManager {
    fn create_session(
        &self,
        params: &SessionParams,
        shared_secret: Option<[u8; 32]>,
    ) -> Result<SessionCreated> {
        SessionManager::create_session(self, params, shared_secret)
    }
}

/// Key ID bound at creation: derived from the session ID, so both
/// parties converge without exchanging it
fn derive_key_id(session_id: &str) -> String {
    let digest = Sha256::digest(session_id.as_bytes());
    hex::encode(&digest[..8])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn params(context: &str) -> SessionParams {
        SessionParams {
            context_id: context.into(),
            self_ephemeral: [1u8; 32],
            peer_ephemeral: [2u8; 32],
            label: "a2a/handshake v1".into(),
            peer_did: None,
        }
    }

    fn manager() -> Arc<SessionManager> {
        Arc::new(SessionManager::default())
    }

    #[test]
    fn test_create_and_lookup() {
        let mgr = manager();
        let created = mgr.create_session(&params("ctx-1"), Some([5u8; 32])).unwrap();
        assert!(!created.reused);

        assert!(mgr.get(&created.session_id).is_some());
        assert!(mgr.get_by_context("ctx-1").is_some());
        assert!(mgr.get_by_key_id(&created.key_id).is_some());
    }

    #[test]
    fn test_both_roles_converge_on_same_session() {
        let initiator = manager();
        let responder = manager();
        let shared = [5u8; 32];

        // Each side sees the ephemerals in opposite roles
        let i = initiator
            .create_session(&params("ctx-1"), Some(shared))
            .unwrap();
        let mut flipped = params("ctx-1");
        std::mem::swap(&mut flipped.self_ephemeral, &mut flipped.peer_ephemeral);
        let r = responder.create_session(&flipped, Some(shared)).unwrap();

        assert_eq!(i.session_id, r.session_id);
        assert_eq!(i.key_id, r.key_id);

        // And traffic flows between them
        let a = initiator.get(&i.session_id).unwrap();
        let b = responder.get(&r.session_id).unwrap();
        let (_, envelope) = a.encrypt(b"cross-role message").unwrap();
        assert_eq!(b.decrypt(&envelope).unwrap(), b"cross-role message");
    }

    #[test]
    fn test_identical_session_reused() {
        let mgr = manager();
        let first = mgr.create_session(&params("ctx-1"), Some([5u8; 32])).unwrap();
        let second = mgr.create_session(&params("ctx-1"), Some([5u8; 32])).unwrap();

        assert!(second.reused);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_new_session_replaces_context_predecessor() {
        let mgr = manager();
        let first = mgr.create_session(&params("ctx-1"), Some([5u8; 32])).unwrap();

        let mut fresh = params("ctx-1");
        fresh.peer_ephemeral = [9u8; 32];
        let second = mgr.create_session(&fresh, Some([6u8; 32])).unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(mgr.len(), 1, "old session must be replaced");
        assert!(mgr.get(&first.session_id).is_none());
        assert_eq!(
            mgr.get_by_context("ctx-1").unwrap().session_id(),
            second.session_id
        );
    }

    #[test]
    fn test_missing_shared_secret_rejected() {
        let mgr = manager();
        let result = mgr.create_session(&params("ctx-1"), None);
        assert!(matches!(result, Err(Error::KeyDerivationFailed(_))));
    }

    #[test]
    fn test_close_is_idempotent_and_unindexes() {
        let mgr = manager();
        let created = mgr.create_session(&params("ctx-1"), Some([5u8; 32])).unwrap();

        mgr.close(&created.session_id);
        mgr.close(&created.session_id);

        assert!(mgr.get(&created.session_id).is_none());
        assert!(mgr.get_by_context("ctx-1").is_none());
        assert!(mgr.get_by_key_id(&created.key_id).is_none());
    }

    #[test]
    fn test_key_id_lookup_hides_expired_sessions() {
        let mgr = Arc::new(SessionManager::new(SessionConfig {
            max_age: Duration::from_millis(10),
            ..Default::default()
        }));
        let created = mgr.create_session(&params("ctx-1"), Some([5u8; 32])).unwrap();

        std::thread::sleep(Duration::from_millis(25));
        assert!(mgr.get_by_key_id(&created.key_id).is_none());
    }

    #[test]
    fn test_receive_gates_replay_and_order() {
        let mgr = manager();
        let created = mgr.create_session(&params("ctx-1"), Some([5u8; 32])).unwrap();
        let session = mgr.get(&created.session_id).unwrap();

        let now = chrono::Utc::now();
        let header = |seq: u64, ms: i64| MessageHeader {
            sequence: seq,
            nonce: format!("n-{}", seq),
            timestamp: (now + chrono::Duration::milliseconds(ms)).to_rfc3339(),
        };

        let (_, env1) = session.encrypt(b"first").unwrap();
        let h1 = header(1, 0);
        assert_eq!(mgr.receive(&session, &env1, &h1).unwrap(), b"first");

        // Byte-identical retransmission: dedup catches it
        let result = mgr.receive(&session, &env1, &h1);
        assert!(matches!(result, Err(Error::MessageReplay(_))));

        // Fresh envelope but replayed sequence with a new nonce: order
        // manager catches it
        let (_, env2) = session.encrypt(b"second").unwrap();
        let mut replayed = header(1, 1);
        replayed.nonce = "different-nonce".into();
        let result = mgr.receive(&session, &env2, &replayed);
        assert!(matches!(result, Err(Error::MessageReplay(_))));

        // Correctly advancing message passes
        let (_, env3) = session.encrypt(b"third").unwrap();
        assert_eq!(mgr.receive(&session, &env3, &header(2, 2)).unwrap(), b"third");
    }

    #[test]
    fn test_sweep_closes_expired() {
        let mgr = Arc::new(SessionManager::new(SessionConfig {
            max_age: Duration::from_millis(10),
            ..Default::default()
        }));
        mgr.create_session(&params("ctx-1"), Some([5u8; 32])).unwrap();

        std::thread::sleep(Duration::from_millis(25));
        mgr.sweep_expired();
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn test_scavenger_loop() {
        let mgr = Arc::new(SessionManager::new(SessionConfig {
            max_age: Duration::from_millis(10),
            ..Default::default()
        }));
        mgr.create_session(&params("ctx-1"), Some([5u8; 32])).unwrap();

        let handle = mgr.start_scavenger(Duration::from_millis(15));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        assert!(mgr.is_empty());
    }
}
