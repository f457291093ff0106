//! Transmitter module - outbound command formatting
//!
//! Every protocol message is one `\n`-terminated ASCII line of
//! `|`-separated fields:
//!
//! ```text
//! PUBLISH|<id>|<payload>
//! PUBREC|<id>
//! PUBREL|<id>
//! PUBCOMP|<id>
//! ```
//!
//! There is no escaping, so a payload must never contain `|` or a line break.
use std::collections::VecDeque;

use crate::contracts::{AlertTag, MessageId, Payload};
use crate::errors::{AlertLinkError, Result};

/// One protocol command, in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Publish { id: MessageId, payload: Payload },
    PubRec { id: MessageId },
    PubRel { id: MessageId },
    PubComp { id: MessageId },
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Publish { .. } => "PUBLISH",
            Self::PubRec { .. } => "PUBREC",
            Self::PubRel { .. } => "PUBREL",
            Self::PubComp { .. } => "PUBCOMP",
        }
    }

    pub fn id(&self) -> MessageId {
        match self {
            Self::Publish { id, .. }
            | Self::PubRec { id }
            | Self::PubRel { id }
            | Self::PubComp { id } => *id,
        }
    }

    /// Render the command as a line, without the trailing newline
    ///
    /// # Errors
    /// `PayloadContainsSeparator` if a PUBLISH payload would break the grammar.
    pub fn to_line(&self) -> Result<String> {
        let sep = crate::FIELD_SEPARATOR;
        match self {
            Self::Publish { id, payload } => {
                if payload
                    .as_str()
                    .contains(|c: char| c == sep || c == '\n' || c == '\r')
                {
                    return Err(AlertLinkError::PayloadContainsSeparator);
                }
                Ok(format!("{}{sep}{}{sep}{}", self.verb(), id, payload))
            }
            _ => Ok(format!("{}{sep}{}", self.verb(), self.id())),
        }
    }
}

/// Destination for outbound lines
pub trait LineSink {
    /// Write one line; the sink adds the terminator
    fn write_line(&mut self, line: &str) -> Result<()>;
}

impl LineSink for Vec<String> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.push(line.to_string());
        Ok(())
    }
}

impl LineSink for VecDeque<String> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.push_back(line.to_string());
        Ok(())
    }
}

/// Transmitter - formats commands and hands them to a sink
pub struct Transmitter;

impl Transmitter {
    /// Format and send a single command
    pub fn send<K: LineSink + ?Sized>(sink: &mut K, command: &Command) -> Result<()> {
        let line = command.to_line()?;
        sink.write_line(&line)
    }
}

/// Build the alert payload for a fired crossing
///
/// Produces `{"msg_id":<id>,"alert":"ALERT_HIGH"|"ALERT_LOW","dist":<d.dd>}`,
/// bounded by the formatting buffer. Fitting the result into the persisted
/// slot is the ledger's job (it truncates).
pub fn build_alert_payload(id: MessageId, distance_cm: f32, threshold_cm: f32) -> Payload {
    let tag = AlertTag::classify(distance_cm, threshold_cm);
    let text = format!(
        "{{\"msg_id\":{},\"alert\":\"{}\",\"dist\":{:.2}}}",
        id, tag, distance_cm
    );
    Payload::bounded(&text, crate::FORMAT_BUFFER_LEN - 1)
}
