//! # HTTP Message Signatures
//!
//! RFC 9421 signing and verification for the HTTP messages agents
//! exchange after a session is established.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    SIGNING / VERIFICATION PIPELINE                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  SIGNER                                                                │
//! │  ──────                                                                 │
//! │  http::Request + covered components                                    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  canonical.rs ── signature base string                                 │
//! │        │            "@method": GET                                     │
//! │        │            "@path": /foo                                      │
//! │        │            "@signature-params": ("@method" "@path");...       │
//! │        ▼                                                                │
//! │  keypair.sign(base)                                                    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  structured.rs ── Signature-Input: sig1=("@method" "@path");...        │
//! │                   Signature:       sig1=:MEUCIQ...:                    │
//! │                                                                         │
//! │  VERIFIER                                                              │
//! │  ────────                                                               │
//! │  parse headers → select label → enforce required components            │
//! │        → enforce created/expires policy → rebuild base → verify        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Uncovered parts of the request may change in transit without breaking
//! the signature; covered parts may not.

mod canonical;
mod sign;
mod structured;

pub use canonical::build_signature_base;
pub use sign::{
    content_digest, sign_request, sign_request_hmac, verify_content_digest, verify_request,
    verify_request_hmac, VerifyOptions, CONTENT_DIGEST_HEADER,
};
pub use structured::{parse_signature, parse_signature_input, render_signature};

use crate::crypto::KeyType;
use crate::error::{Error, Result};

/// Header carrying the signature metadata dictionary
pub const SIGNATURE_INPUT_HEADER: &str = "signature-input";

/// Header carrying the signature bytes dictionary
pub const SIGNATURE_HEADER: &str = "signature";

/// One covered component identifier, e.g. `@method` or
/// `@query-param;name="id"` or a lowercase header name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentId {
    /// Component name (`@`-prefixed for derived components)
    pub name: String,
    /// String parameters, e.g. `name="id"` on `@query-param`
    pub params: Vec<(String, String)>,
}

impl ComponentId {
    /// Plain component with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// A `@query-param` component for the named parameter
    pub fn query_param(name: impl Into<String>) -> Self {
        Self {
            name: "@query-param".into(),
            params: vec![("name".into(), name.into())],
        }
    }

    /// Render as it appears inside the `@signature-params` inner list
    pub fn render(&self) -> String {
        let mut out = format!("\"{}\"", self.name);
        for (key, value) in &self.params {
            out.push_str(&format!(";{}=\"{}\"", key, value));
        }
        out
    }

    /// Look up a string parameter by name
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parameters attached to one signature label
///
/// Rendered (and signed) as the `@signature-params` line: the covered
/// component inner list followed by `keyid`, `alg`, `created`, `expires`,
/// `nonce`, and `tag` in that order, each only when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureParams {
    /// Ordered covered components
    pub components: Vec<ComponentId>,
    /// Key ID naming the verification key
    pub key_id: Option<String>,
    /// RFC 9421 algorithm label
    pub algorithm: Option<String>,
    /// Signature creation time (Unix seconds)
    pub created: Option<i64>,
    /// Expiry time (Unix seconds)
    pub expires: Option<i64>,
    /// Random nonce
    pub nonce: Option<String>,
    /// Application tag
    pub tag: Option<String>,
}

impl SignatureParams {
    /// Start from a list of component names (no per-component parameters)
    pub fn covering<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: names.into_iter().map(ComponentId::new).collect(),
            ..Default::default()
        }
    }

    /// Set the key ID
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Set the algorithm label
    pub fn with_algorithm(mut self, alg: impl Into<String>) -> Self {
        self.algorithm = Some(alg.into());
        self
    }

    /// Set the creation timestamp
    pub fn with_created(mut self, created: i64) -> Self {
        self.created = Some(created);
        self
    }

    /// Set the expiry timestamp
    pub fn with_expires(mut self, expires: i64) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Set the nonce
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Set the tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Whether a component with this exact identifier is covered
    pub fn covers(&self, component: &ComponentId) -> bool {
        self.components.iter().any(|c| c == component)
    }

    /// Render the inner list with parameters, as signed and as emitted
    /// in `Signature-Input`
    pub fn render(&self) -> String {
        let items: Vec<String> = self.components.iter().map(|c| c.render()).collect();
        let mut out = format!("({})", items.join(" "));
        if let Some(key_id) = &self.key_id {
            out.push_str(&format!(";keyid=\"{}\"", key_id));
        }
        if let Some(alg) = &self.algorithm {
            out.push_str(&format!(";alg=\"{}\"", alg));
        }
        if let Some(created) = self.created {
            out.push_str(&format!(";created={}", created));
        }
        if let Some(expires) = self.expires {
            out.push_str(&format!(";expires={}", expires));
        }
        if let Some(nonce) = &self.nonce {
            out.push_str(&format!(";nonce=\"{}\"", nonce));
        }
        if let Some(tag) = &self.tag {
            out.push_str(&format!(";tag=\"{}\"", tag));
        }
        out
    }
}

/// RFC 9421 algorithm label for an asymmetric key type
pub fn algorithm_label(key_type: KeyType) -> Result<&'static str> {
    match key_type {
        KeyType::Ed25519 => Ok("ed25519"),
        KeyType::Secp256k1 => Ok("es256k"),
        KeyType::Rsa2048 => Ok("rsa-pss-sha256"),
        KeyType::X25519 => Err(Error::SignatureUnsupported(key_type.label().into())),
    }
}
