//! # Handshake Events
//!
//! Application-supplied callbacks the handshake fires as phases land.
//! Everything defaults to a no-op except [`HandshakeEvents::ask_ephemeral`],
//! which must supply an ephemeral key and by default generates a fresh
//! X25519 pair per context.

use std::sync::Arc;

use crate::crypto::{KeyPair, KeyType};
use crate::did::AgentDid;
use crate::error::Result;
use crate::session::SessionParams;

/// Fired when a valid Invitation caches a peer
pub type InvitationCallback = Box<dyn Fn(&AgentDid, &str) + Send + Sync>;

/// Fired when a valid Request stores pending state
pub type RequestCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Fired on Complete; params are `None` when no pending state existed
pub type CompleteCallback = Box<dyn Fn(&str, Option<&SessionParams>) + Send + Sync>;

/// Supplies the responder's ephemeral keypair for a context
pub type EphemeralProvider = Box<dyn Fn(&str) -> Result<Arc<KeyPair>> + Send + Sync>;

/// Optionally issues an application-managed key ID for a session
pub type KeyIdIssuer = Box<dyn Fn(&str) -> String + Send + Sync>;

/// The callback set handed to a responder
pub struct HandshakeEvents {
    /// Invitation accepted
    pub on_invitation: Option<InvitationCallback>,
    /// Request accepted
    pub on_request: Option<RequestCallback>,
    /// Complete processed (softly even without pending state)
    pub on_complete: Option<CompleteCallback>,
    /// Must produce the local ephemeral X25519 pair for a context
    pub ask_ephemeral: EphemeralProvider,
    /// Overrides the key ID announced in the Complete ack
    pub issue_key_id: Option<KeyIdIssuer>,
}

impl Default for HandshakeEvents {
    fn default() -> Self {
        Self {
            on_invitation: None,
            on_request: None,
            on_complete: None,
            ask_ephemeral: Box::new(|_context| {
                KeyPair::generate(KeyType::X25519).map(Arc::new)
            }),
            issue_key_id: None,
        }
    }
}

impl HandshakeEvents {
    /// Default set: no-op events, fresh ephemeral per context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the invitation callback
    pub fn on_invitation(mut self, callback: InvitationCallback) -> Self {
        self.on_invitation = Some(callback);
        self
    }

    /// Set the request callback
    pub fn on_request(mut self, callback: RequestCallback) -> Self {
        self.on_request = Some(callback);
        self
    }

    /// Set the complete callback
    pub fn on_complete(mut self, callback: CompleteCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Replace the ephemeral provider
    pub fn ask_ephemeral(mut self, provider: EphemeralProvider) -> Self {
        self.ask_ephemeral = provider;
        self
    }

    /// Set the key-ID issuer
    pub fn issue_key_id(mut self, issuer: KeyIdIssuer) -> Self {
        self.issue_key_id = Some(issuer);
        self
    }
}
