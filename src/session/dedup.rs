//! # Message Deduplication
//!
//! A TTL-bounded seen-set over message control headers. The fingerprint
//! is SHA-256 over (sequence ‖ nonce ‖ timestamp), so a retransmitted
//! message maps to the same 32 bytes no matter which route delivered it.
//!
//! Expired entries are removed opportunistically when touched and in
//! bulk by the background cleaner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::session::order::MessageHeader;
use crate::sweeper::{spawn_sweeper, SweepHandle};

/// Default lifetime of a seen-set entry
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(300);

/// TTL-bounded duplicate detector, safe for concurrent use
pub struct DedupDetector {
    ttl: Duration,
    seen: Mutex<HashMap<[u8; 32], Instant>>,
}

impl Default for DedupDetector {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_DEDUP_TTL)
    }
}

impl DedupDetector {
    /// Detector with the default TTL
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Fingerprint of a header: SHA-256 over sequence, nonce, timestamp
    pub fn fingerprint(header: &MessageHeader) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(header.sequence.to_be_bytes());
        hasher.update(header.nonce.as_bytes());
        hasher.update(header.timestamp.as_bytes());
        hasher.finalize().into()
    }

    /// Whether this header was seen within the TTL window
    ///
    /// An expired entry is removed on the way out and reported as not
    /// seen.
    pub fn is_duplicate(&self, header: &MessageHeader) -> bool {
        let fingerprint = Self::fingerprint(header);
        let mut seen = self.seen.lock();
        match seen.get(&fingerprint) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                seen.remove(&fingerprint);
                false
            }
            None => false,
        }
    }

    /// Record a header as seen for the TTL
    pub fn mark_seen(&self, header: &MessageHeader) {
        let fingerprint = Self::fingerprint(header);
        self.seen
            .lock()
            .insert(fingerprint, Instant::now() + self.ttl);
    }

    /// Drop every expired entry
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.seen.lock().retain(|_, expires_at| *expires_at > now);
    }

    /// Number of live entries (includes not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether the seen-set is empty
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    /// Start the background cleaner
    pub fn start_cleaner(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let detector = Arc::clone(self);
        spawn_sweeper("dedup", interval, move || detector.sweep_expired())
    }
}

// ============================================================================
// TESTS
// ============================================================================
