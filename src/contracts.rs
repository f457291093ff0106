//! Core data structures for the AlertLink protocol
//!
//! The node tracks at most one in-flight message. Its identity is a
//! [`MessageId`], its body a [`Payload`] bounded to the persisted slot, and the
//! pair lives in a [`PendingRecord`] until the final acknowledgment arrives.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic message identifier
///
/// Value 0 is reserved for "no message"; allocation skips it on wraparound so
/// a non-zero id is never handed out twice within one counter cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MessageId(pub u32);

impl MessageId {
    /// Reserved "no message" id
    pub const NONE: MessageId = MessageId(0);

    /// True for the reserved id
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// The id allocated after this one
    pub fn next(self) -> MessageId {
        match self.0.wrapping_add(1) {
            0 => MessageId(1),
            n => MessageId(n),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Alert classification carried in the payload's `alert` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTag {
    High,
    Low,
}

impl AlertTag {
    /// ALERT_HIGH at or above the threshold, ALERT_LOW below it
    pub fn classify(distance_cm: f32, threshold_cm: f32) -> Self {
        if distance_cm >= threshold_cm {
            Self::High
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "ALERT_HIGH",
            Self::Low => "ALERT_LOW",
        }
    }
}

impl fmt::Display for AlertTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded payload text
///
/// Constructed once with a capacity and never grown afterwards. Input longer
/// than the capacity is truncated (at a character boundary), and input
/// containing a NUL is cut at the NUL, matching what a fixed NUL-padded slot
/// can represent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    text: String,
}

impl Payload {
    /// Create a payload truncated to `capacity` bytes
    pub fn bounded(text: &str, capacity: usize) -> Self {
        let text = text.split('\0').next().unwrap_or_default();
        let mut end = text.len().min(capacity);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            text: text[..end].to_string(),
        }
    }

    /// Encode into a fixed slot of `slot_len` bytes, NUL-padded
    pub fn to_slot(&self, slot_len: usize) -> Vec<u8> {
        let mut slot = vec![0u8; slot_len];
        let len = self.text.len().min(slot_len);
        slot[..len].copy_from_slice(&self.text.as_bytes()[..len]);
        slot
    }

    /// Decode a fixed slot, stopping at the first NUL
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than rejected; a
    /// record that reached this point already passed its integrity check.
    pub fn from_slot(slot: &[u8]) -> Self {
        let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
        Self {
            text: String::from_utf8_lossy(&slot[..end]).into_owned(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The single outstanding, unacknowledged message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub id: MessageId,
    pub payload: Payload,
}

/// Everything the ledger persists
///
/// The pending flag is derived from `pending`, so "flag set without a valid
/// record" cannot be expressed in memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LedgerState {
    /// Last id handed out (0 before the first message)
    pub next_id: MessageId,
    pub pending: Option<PendingRecord>,
}

impl LedgerState {
    pub fn pending_flag(&self) -> bool {
        self.pending.is_some()
    }
}

/// Decoded alert payload as seen by the receiving side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub msg_id: u32,
    pub alert: String,
    pub dist: f64,
}
