//! # Message Ordering
//!
//! Every decrypted application message carries a control header with a
//! sequence number, a nonce string, and an RFC 3339 timestamp. The
//! order manager enforces, per session:
//!
//! - strictly increasing sequence numbers (`MessageReplay` otherwise)
//! - non-decreasing timestamps (`OutOfOrderTimestamp` otherwise)
//!
//! The first message on a session records the baseline; sessions are
//! fully isolated from each other.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Control header attached to every application message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Strictly increasing per-session sequence number
    pub sequence: u64,
    /// Sender-chosen nonce string
    pub nonce: String,
    /// RFC 3339 send time
    pub timestamp: String,
}

impl MessageHeader {
    /// Parse the timestamp; empty or malformed → `InvalidHeader`
    pub fn parsed_timestamp(&self) -> Result<DateTime<Utc>> {
        if self.timestamp.is_empty() {
            return Err(Error::InvalidHeader("Empty timestamp".into()));
        }
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::InvalidHeader(format!("Bad timestamp: {}", e)))
    }
}

struct LastAccepted {
    sequence: u64,
    timestamp: DateTime<Utc>,
}

/// Per-session monotonicity enforcement
///
/// Safe for concurrent use; the check-and-advance is atomic, so two
/// racing messages with the same sequence cannot both be accepted.
#[derive(Default)]
pub struct OrderManager {
    sessions: Mutex<HashMap<String, LastAccepted>>,
}

impl OrderManager {
    /// Empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept or reject a message header for a session, advancing the
    /// high-water marks on acceptance
    pub fn check_and_advance(&self, session_id: &str, header: &MessageHeader) -> Result<()> {
        let timestamp = header.parsed_timestamp()?;
        let mut sessions = self.sessions.lock();

        match sessions.get_mut(session_id) {
            None => {
                sessions.insert(
                    session_id.to_string(),
                    LastAccepted {
                        sequence: header.sequence,
                        timestamp,
                    },
                );
                Ok(())
            }
            Some(last) => {
                if header.sequence <= last.sequence {
                    return Err(Error::MessageReplay(format!(
                        "sequence {} not above high-water mark {}",
                        header.sequence, last.sequence
                    )));
                }
                if timestamp < last.timestamp {
                    return Err(Error::OutOfOrderTimestamp(format!(
                        "{} is before {}",
                        header.timestamp, last.timestamp
                    )));
                }
                last.sequence = header.sequence;
                last.timestamp = timestamp;
                Ok(())
            }
        }
    }

    /// Forget a session's baseline (call when the session closes)
    pub fn remove_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }
}

// ============================================================================
// TESTS
// ============================================================================
