//! Cooperative scheduler loop
//!
//! One [`Scheduler::tick`] per loop iteration, in order:
//! 1. drain every available inbound line into the delivery state machine
//! 2. while a message is outstanding, retransmit if due and stop there
//! 3. otherwise, once the sample interval has passed, take one reading,
//!    feed the detector and publish if it fires
//!
//! Sampling and retransmission never happen in the same tick. Time is a
//! wrapping `u32` millisecond counter supplied by the caller.

use tracing::{debug, trace};

use crate::ack_manager::{DeliveryState, DeliveryStateMachine};
use crate::config::NodeConfig;
use crate::contracts::MessageId;
use crate::detector::ThresholdDetector;
use crate::errors::Result;
use crate::ledger::{Ledger, Store};
use crate::receiver::LineSource;
use crate::router::LineProtocolRouter;
use crate::sensor::DistanceSensor;
use crate::transmitter::{build_alert_payload, LineSink, Transmitter};

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Outstanding message, retransmit not yet due
    AwaitingAck,
    /// Outstanding message re-sent
    Retransmitted(MessageId),
    /// Idle, sample interval not yet elapsed
    Waiting,
    /// Sensor timed out; the cycle is skipped
    NoReading,
    /// Reading taken, detector did not fire
    Sampled(f32),
    /// Detector fired and a new message went out
    Published(MessageId),
}

/// Ties sensor, detector, delivery and the line link together
pub struct Scheduler<S: Store, D: DistanceSensor> {
    config: NodeConfig,
    detector: ThresholdDetector,
    delivery: DeliveryStateMachine<S>,
    sensor: D,
    last_sample_ms: u32,
}

impl<S: Store, D: DistanceSensor> Scheduler<S, D> {
    /// Build a scheduler over an opened ledger
    ///
    /// Both the sample and retransmit clocks start at `now_ms`.
    pub fn new(config: NodeConfig, ledger: Ledger<S>, sensor: D, now_ms: u32) -> Self {
        Self {
            detector: ThresholdDetector::new(config.threshold_cm, config.hysteresis_cm),
            delivery: DeliveryStateMachine::new(ledger, config.retransmit_interval_ms, now_ms),
            sensor,
            last_sample_ms: now_ms,
            config,
        }
    }

    pub fn delivery(&self) -> &DeliveryStateMachine<S> {
        &self.delivery
    }

    pub fn detector(&self) -> &ThresholdDetector {
        &self.detector
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn into_ledger(self) -> Ledger<S> {
        self.delivery.into_ledger()
    }

    /// Run one loop iteration
    ///
    /// # Errors
    /// Ledger or link failures. Nothing is rolled back; the next tick picks
    /// up from whatever the ledger holds.
    pub fn tick<L, K>(&mut self, now_ms: u32, source: &mut L, sink: &mut K) -> Result<TickOutcome>
    where
        L: LineSource + ?Sized,
        K: LineSink + ?Sized,
    {
        LineProtocolRouter::drain(source, &mut self.delivery, sink)?;

        if self.delivery.state() == DeliveryState::AwaitingAck {
            return match self.delivery.on_retransmit_tick(now_ms)? {
                Some(command) => {
                    Transmitter::send(sink, &command)?;
                    Ok(TickOutcome::Retransmitted(command.id()))
                }
                None => Ok(TickOutcome::AwaitingAck),
            };
        }

        if now_ms.wrapping_sub(self.last_sample_ms) <= self.config.sample_interval_ms {
            return Ok(TickOutcome::Waiting);
        }

        let sample = self.sensor.measure().filter(|d| d.is_finite() && *d >= 0.0);
        self.last_sample_ms = now_ms;

        let Some(distance) = sample else {
            debug!("no echo");
            return Ok(TickOutcome::NoReading);
        };

        if !self.detector.observe(sample) {
            trace!(dist = distance, state = ?self.detector.state(), "no trigger");
            return Ok(TickOutcome::Sampled(distance));
        }

        let threshold = self.config.threshold_cm;
        let published = self.delivery.try_publish(now_ms, |id| {
            build_alert_payload(id, distance, threshold)
        })?;

        match published {
            Some(command) => {
                Transmitter::send(sink, &command)?;
                Ok(TickOutcome::Published(command.id()))
            }
            None => Ok(TickOutcome::Sampled(distance)),
        }
    }
}
