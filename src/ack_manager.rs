//! ACK Manager module - single in-flight message delivery
//!
//! Implements the sending side of the four-step handshake:
//!
//! ```text
//!  node                         peer
//!   │ PUBLISH|id|payload ───────▶ │
//!   │ ◀─────────────── PUBREC|id  │
//!   │ PUBREL|id ────────────────▶ │
//!   │ ◀────────────── PUBCOMP|id  │
//! ```
//!
//! At most one message is outstanding. It is persisted before the first
//! PUBLISH leaves and cleared only by a matching PUBCOMP, so it survives a
//! restart. Until then PUBLISH is retransmitted on a fixed interval with the
//! id and payload read back from the ledger. PUBREC is answered with PUBREL
//! but does not stop PUBLISH retransmission.

use tracing::{debug, info, trace, warn};

use crate::contracts::{MessageId, Payload, PendingRecord};
use crate::errors::Result;
use crate::ledger::{Ledger, Store};
use crate::transmitter::Command;

/// Delivery state, derived from the ledger's pending flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    AwaitingAck,
}

/// The two acknowledgments the node reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    PubRec,
    PubComp,
}

/// Result of feeding an acknowledgment to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// PUBREC matched; a PUBREL must be sent
    Release(MessageId),
    /// PUBCOMP matched; the message is done and the node is idle
    Completed(MessageId),
    /// Stale, duplicate or foreign ack
    Discarded,
}

impl AckOutcome {
    /// Command to send in response, if any
    pub fn reply(&self) -> Option<Command> {
        match self {
            Self::Release(id) => Some(Command::PubRel { id: *id }),
            _ => None,
        }
    }
}

/// Retransmission state tracker
///
/// Times are a wrapping millisecond counter; elapsed time is computed with
/// wrapping subtraction so counter rollover does not stall or burst.
#[derive(Debug, Clone)]
pub struct RetransmissionState {
    /// Time of last transmission
    pub last_sent_ms: u32,

    /// Retransmissions of the current message (the first send is not counted)
    pub attempt: u32,
}

impl RetransmissionState {
    pub fn new(now_ms: u32) -> Self {
        Self {
            last_sent_ms: now_ms,
            attempt: 0,
        }
    }

    /// Strictly more than `interval_ms` since the last send
    pub fn is_ready_for_retry(&self, now_ms: u32, interval_ms: u32) -> bool {
        now_ms.wrapping_sub(self.last_sent_ms) > interval_ms
    }

    /// Restart the clock for a newly published message
    pub fn restart(&mut self, now_ms: u32) {
        self.last_sent_ms = now_ms;
        self.attempt = 0;
    }

    /// Record a retransmission
    pub fn record_retry(&mut self, now_ms: u32) {
        self.last_sent_ms = now_ms;
        self.attempt = self.attempt.saturating_add(1);
    }
}

/// Owns the ledger and drives the publish/acknowledge handshake
pub struct DeliveryStateMachine<S: Store> {
    ledger: Ledger<S>,
    retransmit: RetransmissionState,
    retransmit_interval_ms: u32,
}

impl<S: Store> DeliveryStateMachine<S> {
    /// Wrap an opened ledger
    ///
    /// A record already pending (from before a restart) is retransmitted
    /// once `retransmit_interval_ms` has passed after `now_ms`.
    pub fn new(ledger: Ledger<S>, retransmit_interval_ms: u32, now_ms: u32) -> Self {
        if let Some(record) = ledger.pending() {
            info!(msg_id = %record.id, "resuming pending message");
        }
        Self {
            ledger,
            retransmit: RetransmissionState::new(now_ms),
            retransmit_interval_ms,
        }
    }

    pub fn state(&self) -> DeliveryState {
        if self.ledger.has_pending() {
            DeliveryState::AwaitingAck
        } else {
            DeliveryState::Idle
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state() == DeliveryState::Idle
    }

    pub fn pending(&self) -> Option<&PendingRecord> {
        self.ledger.pending()
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger<S> {
        self.ledger
    }

    pub fn retransmissions(&self) -> u32 {
        self.retransmit.attempt
    }

    /// Allocate an id, persist the new record and return its PUBLISH
    ///
    /// `build` receives the freshly allocated id. Returns `Ok(None)` without
    /// touching the ledger when a message is already outstanding; the event
    /// is dropped.
    pub fn try_publish<F>(&mut self, now_ms: u32, build: F) -> Result<Option<Command>>
    where
        F: FnOnce(MessageId) -> Payload,
    {
        if let Some(record) = self.ledger.pending() {
            debug!(pending = %record.id, "publish suppressed while awaiting ack");
            return Ok(None);
        }

        let id = self.ledger.allocate_id()?;
        let payload = build(id);
        let record = self.ledger.store_pending(id, &payload)?;
        self.retransmit.restart(now_ms);

        info!(msg_id = %record.id, payload = %record.payload, "publishing alert");
        Ok(Some(Command::Publish {
            id: record.id,
            payload: record.payload,
        }))
    }

    /// Handle PUBREC / PUBCOMP
    ///
    /// Anything that does not match the pending id, or arrives while idle,
    /// is discarded: duplicates and late acks are normal under
    /// retransmission.
    pub fn on_ack_received(&mut self, kind: AckKind, id: MessageId) -> Result<AckOutcome> {
        let pending_id = match self.ledger.pending() {
            Some(record) if record.id == id => record.id,
            _ => {
                trace!(?kind, msg_id = %id, "discarding unmatched ack");
                return Ok(AckOutcome::Discarded);
            }
        };

        match kind {
            AckKind::PubRec => {
                debug!(msg_id = %pending_id, "PUBREC received, releasing");
                Ok(AckOutcome::Release(pending_id))
            }
            AckKind::PubComp => {
                self.ledger.clear_pending()?;
                info!(
                    msg_id = %pending_id,
                    retransmissions = self.retransmit.attempt,
                    "delivery complete"
                );
                Ok(AckOutcome::Completed(pending_id))
            }
        }
    }

    /// Re-emit PUBLISH if the retransmit interval has elapsed
    ///
    /// The record is read back from the store. If the stored copy no longer
    /// passes its checksum, the in-memory record is written again and sent.
    pub fn on_retransmit_tick(&mut self, now_ms: u32) -> Result<Option<Command>> {
        let Some(cached) = self.ledger.pending().cloned() else {
            return Ok(None);
        };
        if !self
            .retransmit
            .is_ready_for_retry(now_ms, self.retransmit_interval_ms)
        {
            return Ok(None);
        }

        let record = match self.ledger.load_pending()? {
            Some(record) => record,
            None => {
                warn!(msg_id = %cached.id, "stored pending record unreadable, rewriting it");
                self.ledger.store_pending(cached.id, &cached.payload)?
            }
        };
        self.retransmit.record_retry(now_ms);

        debug!(
            msg_id = %record.id,
            attempt = self.retransmit.attempt,
            "retransmitting PUBLISH"
        );
        Ok(Some(Command::Publish {
            id: record.id,
            payload: record.payload,
        }))
    }
}
