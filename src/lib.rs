//! AlertLink Core - threshold alerts over a persisted four-step handshake
//!
//! **Creator**: Shayan Golmezerji
//! **License**: Creative Commons Attribution 4.0 International (CC BY 4.0)
//!
//! A sensor node samples a distance, fires an event when the reading crosses
//! a threshold (with hysteresis), and delivers each event over a line-based
//! link with a PUBLISH / PUBREC / PUBREL / PUBCOMP handshake. The single
//! outstanding message lives in a small byte store, so a power cut neither
//! loses nor re-numbers it.
//!
//! # Architecture
//!
//! ```text
//!  sensor ──▶ detector ──fire──▶ ack_manager ──PUBLISH/PUBREL──▶ transmitter ──▶ link
//!                                   │   ▲
//!                              ledger   └── router ◀── receiver ◀── link
//! ```
//!
//! - [`detector`]: hysteresis threshold classifier
//! - [`ledger`]: next-id counter and pending record over a byte store
//! - [`ack_manager`]: the in-flight message state machine
//! - [`receiver`] / [`transmitter`]: line parsing and formatting
//! - [`router`]: inbound dispatch on the node side
//! - [`scheduler`]: the cooperative loop tying it together
//! - [`broker`]: the receiving peer

pub mod ack_manager;
pub mod broker;
pub mod config;
pub mod contracts;
pub mod detector;
pub mod errors;
pub mod ledger;
pub mod receiver;
pub mod router;
pub mod scheduler;
pub mod sensor;
pub mod transmitter;

pub use ack_manager::{AckKind, AckOutcome, DeliveryState, DeliveryStateMachine};
pub use broker::{Broker, Delivered, DeliveredContent};
pub use config::{NodeConfig, NodeConfigBuilder};
pub use contracts::{AlertEvent, AlertTag, LedgerState, MessageId, Payload, PendingRecord};
pub use detector::{ThresholdDetector, ThresholdState};
pub use errors::{AlertLinkError, Result};
pub use ledger::{FileStore, Ledger, LedgerLayout, MemoryStore, RecoveryReport, Store};
pub use receiver::{LineSource, Receiver};
pub use router::{LineProtocolRouter, RouteOutcome};
pub use scheduler::{Scheduler, TickOutcome};
pub use sensor::{DistanceSensor, SimulatedSensor};
pub use transmitter::{build_alert_payload, Command, LineSink, Transmitter};

/// Alert threshold in centimetres
pub const THRESHOLD_CM: f32 = 10.0;

/// Dead-band half-width around the threshold
pub const HYSTERESIS_CM: f32 = 0.5;

/// Sampling period while idle
pub const SAMPLE_INTERVAL_MS: u32 = 5000;

/// PUBLISH retransmission period while awaiting PUBCOMP
pub const RETRANSMIT_INTERVAL_MS: u32 = 3000;

/// Width of the persisted payload slot
pub const PAYLOAD_SLOT_LEN: usize = 20;

/// Payload formatting buffer, including the terminator byte
pub const FORMAT_BUFFER_LEN: usize = 80;

/// Echo wait bound for ultrasonic sensors
pub const ECHO_TIMEOUT_US: u32 = 30_000;

/// Field separator of the line protocol
pub const FIELD_SEPARATOR: char = '|';
