//! # Secure Session
//!
//! Per-peer symmetric state installed by a completed handshake.
//!
//! ## Envelope format
//!
//! ```text
//! ┌────────────┬───────────────────────────────┬──────────────┐
//! │ nonce (12) │         ciphertext            │   tag (16)   │
//! └────────────┴───────────────────────────────┴──────────────┘
//! ```
//!
//! AES-256-GCM under the HKDF-derived session key. The send counter is
//! strictly monotonic and serialized under the session lock, so two
//! concurrent `encrypt` calls cannot observe the same value.
//!
//! ## Lifetime
//!
//! A session dies when any of these trips: absolute max age, idle
//! timeout, message cap, or explicit close. Expiry never interrupts an
//! in-flight operation; it fails the next one.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::crypto::{self, EncryptionKey, Nonce, NONCE_SIZE, TAG_SIZE};
use crate::did::AgentDid;
use crate::error::{Error, Result};

/// Per-session lifetime limits
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Absolute lifetime from creation
    pub max_age: Duration,
    /// Time since last activity before expiry
    pub idle_timeout: Duration,
    /// Total messages (sent + received) before expiry
    pub max_messages: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(600),
            max_messages: 10_000,
        }
    }
}

struct SessionState {
    send_counter: u64,
    last_activity: Instant,
    message_count: u64,
    closed: bool,
}

/// Why a session is no longer usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// Absolute lifetime exceeded
    MaxAge,
    /// Idle too long
    Idle,
    /// Message cap reached
    MessageLimit,
    /// Explicitly closed
    Closed,
}

/// One established session with a peer
pub struct Session {
    session_id: String,
    context_id: String,
    peer_did: Option<AgentDid>,
    key_id: String,
    key: EncryptionKey,
    created_at: Instant,
    config: SessionConfig,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(
        session_id: String,
        context_id: String,
        peer_did: Option<AgentDid>,
        key_id: String,
        key: [u8; 32],
        config: SessionConfig,
    ) -> Self {
        Self {
            session_id,
            context_id,
            peer_did,
            key_id,
            key: EncryptionKey::from_bytes(key),
            created_at: Instant::now(),
            config,
            state: Mutex::new(SessionState {
                send_counter: 0,
                last_activity: Instant::now(),
                message_count: 0,
                closed: false,
            }),
        }
    }

    /// Deterministic identifier both parties derived
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Handshake context this session came from
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Peer identity, when known
    pub fn peer_did(&self) -> Option<&AgentDid> {
        self.peer_did.as_ref()
    }

    /// Key ID carriers may use to locate this session
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Current send counter (messages encrypted so far)
    pub fn send_counter(&self) -> u64 {
        self.state.lock().send_counter
    }

    /// Messages processed in either direction
    pub fn message_count(&self) -> u64 {
        self.state.lock().message_count
    }

    /// Why this session is expired, if it is
    pub fn expiry_reason(&self) -> Option<ExpiryReason> {
        let state = self.state.lock();
        if state.closed {
            return Some(ExpiryReason::Closed);
        }
        if self.created_at.elapsed() > self.config.max_age {
            return Some(ExpiryReason::MaxAge);
        }
        if state.last_activity.elapsed() > self.config.idle_timeout {
            return Some(ExpiryReason::Idle);
        }
        if state.message_count >= self.config.max_messages {
            return Some(ExpiryReason::MessageLimit);
        }
        None
    }

    /// Whether the session can still process messages
    pub fn is_valid(&self) -> bool {
        self.expiry_reason().is_none()
    }

    /// Mark the session closed; idempotent
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    fn check_usable(&self, state: &SessionState) -> Result<()> {
        if state.closed {
            return Err(Error::SessionExpired("session closed".into()));
        }
        if self.created_at.elapsed() > self.config.max_age {
            return Err(Error::SessionExpired("max age exceeded".into()));
        }
        if state.last_activity.elapsed() > self.config.idle_timeout {
            return Err(Error::SessionExpired("idle timeout exceeded".into()));
        }
        if state.message_count >= self.config.max_messages {
            return Err(Error::MessageLimitReached);
        }
        Ok(())
    }

    /// Encrypt a message, returning the sequence number consumed and the
    /// envelope
    ///
    /// The sequence belongs in the message's control header so the
    /// receiver can enforce ordering.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(u64, Vec<u8>)> {
        let mut state = self.state.lock();
        self.check_usable(&state)?;

        state.send_counter += 1;
        state.message_count += 1;
        state.last_activity = Instant::now();
        let sequence = state.send_counter;
        drop(state);

        let (nonce, ciphertext) = crypto::encrypt(&self.key, plaintext, &[])?;
        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(nonce.as_bytes());
        envelope.extend_from_slice(&ciphertext);
        Ok((sequence, envelope))
    }

    /// Decrypt an envelope produced by the peer's session
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        {
            let mut state = self.state.lock();
            self.check_usable(&state)?;
            state.message_count += 1;
            state.last_activity = Instant::now();
        }

        if envelope.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::InvalidCiphertext);
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&envelope[..NONCE_SIZE]);
        crypto::decrypt(
            &self.key,
            &Nonce::from_bytes(nonce),
            &envelope[NONCE_SIZE..],
            &[],
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
