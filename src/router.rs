//! Line protocol router - node side
//!
//! Turns inbound lines into acknowledgments for the [`DeliveryStateMachine`]
//! and writes any reply back out. Unparseable, unknown or irrelevant lines
//! are dropped here; none of them is an error for the caller.

use tracing::debug;

use crate::ack_manager::{AckKind, AckOutcome, DeliveryStateMachine};
use crate::errors::Result;
use crate::ledger::Store;
use crate::receiver::{LineSource, Receiver};
use crate::transmitter::{Command, LineSink, Transmitter};

/// What happened to one inbound line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Acknowledgment handed to the state machine
    Ack(AckOutcome),
    /// Blank, malformed, unknown or not addressed to the node
    Ignored,
}

pub struct LineProtocolRouter;

impl LineProtocolRouter {
    /// Dispatch a single inbound line
    ///
    /// # Errors
    /// Only ledger or sink failures propagate.
    pub fn dispatch<S, K>(
        line: &str,
        delivery: &mut DeliveryStateMachine<S>,
        sink: &mut K,
    ) -> Result<RouteOutcome>
    where
        S: Store,
        K: LineSink + ?Sized,
    {
        let (kind, id) = match Receiver::parse_line(line) {
            Ok(Some(Command::PubRec { id })) => (AckKind::PubRec, id),
            Ok(Some(Command::PubComp { id })) => (AckKind::PubComp, id),
            Ok(Some(other)) => {
                debug!(verb = other.verb(), "ignoring command not handled by node");
                return Ok(RouteOutcome::Ignored);
            }
            Ok(None) => return Ok(RouteOutcome::Ignored),
            Err(err) => {
                debug!(%err, "discarding inbound line");
                return Ok(RouteOutcome::Ignored);
            }
        };

        let outcome = delivery.on_ack_received(kind, id)?;
        if let Some(reply) = outcome.reply() {
            Transmitter::send(sink, &reply)?;
        }
        Ok(RouteOutcome::Ack(outcome))
    }

    /// Dispatch every line currently available from `source`
    ///
    /// Returns the number of lines consumed.
    pub fn drain<S, L, K>(
        source: &mut L,
        delivery: &mut DeliveryStateMachine<S>,
        sink: &mut K,
    ) -> Result<usize>
    where
        S: Store,
        L: LineSource + ?Sized,
        K: LineSink + ?Sized,
    {
        let mut consumed = 0;
        while let Some(line) = source.try_read_line() {
            consumed += 1;
            Self::dispatch(&line, delivery, sink)?;
        }
        Ok(consumed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::contracts::{MessageId, Payload};
    use crate::ledger::{Ledger, LedgerLayout, MemoryStore};

    fn pending_machine() -> DeliveryStateMachine<MemoryStore> {
        let layout = LedgerLayout::default();
        let (ledger, _) = Ledger::open(MemoryStore::erased(layout.total_len()), layout).unwrap();
        let mut machine = DeliveryStateMachine::new(ledger, 3000, 0);
        machine
            .try_publish(0, |_| Payload::bounded("p", 20))
            .unwrap();
        machine
    }

    #[test]
    fn test_pubrec_emits_pubrel() {
        let mut machine = pending_machine();
        let mut sink: Vec<String> = Vec::new();

        let outcome = LineProtocolRouter::dispatch("PUBREC|1\r", &mut machine, &mut sink).unwrap();
        assert_eq!(outcome, RouteOutcome::Ack(AckOutcome::Release(MessageId(1))));
        assert_eq!(sink, vec!["PUBREL|1".to_string()]);
    }

    #[test]
    fn test_noise_is_ignored() {
        let mut machine = pending_machine();
        let mut sink: Vec<String> = Vec::new();

        for line in ["", "garbage", "PUBLISH|1|x", "PUBREL|1", "PUBREC", "PUBREC|x"] {
            let outcome = LineProtocolRouter::dispatch(line, &mut machine, &mut sink).unwrap();
            assert_ne!(outcome, RouteOutcome::Ack(AckOutcome::Release(MessageId(1))));
        }
        assert!(sink.is_empty());
        assert!(!machine.is_idle());
    }

    #[test]
    fn test_drain_consumes_everything_available() {
        let mut machine = pending_machine();
        let mut sink: Vec<String> = Vec::new();
        let mut source: VecDeque<String> = ["PUBREC|1", "noise", "PUBCOMP|1", "PUBREC|1"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let consumed = LineProtocolRouter::drain(&mut source, &mut machine, &mut sink).unwrap();
        assert_eq!(consumed, 4);
        assert!(source.is_empty());
        assert!(machine.is_idle());
        assert_eq!(sink, vec!["PUBREL|1".to_string()]);
    }
}
