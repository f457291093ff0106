//! Receiver module - inbound line parsing
//!
//! Lines are trimmed and split on `|`. Ids that do not parse as a `u32`
//! become id 0, which never matches a pending message and is therefore
//! dropped further up without special handling.
use std::collections::VecDeque;

use crate::contracts::{MessageId, Payload};
use crate::errors::{AlertLinkError, Result};
use crate::transmitter::Command;

/// Source of inbound lines
pub trait LineSource {
    /// Next complete line if one is available right now, never blocks
    fn try_read_line(&mut self) -> Option<String>;
}

impl LineSource for VecDeque<String> {
    fn try_read_line(&mut self) -> Option<String> {
        self.pop_front()
    }
}

pub struct Receiver;

impl Receiver {
    /// Parse one line into a command
    ///
    /// Blank lines yield `Ok(None)`.
    ///
    /// # Errors
    /// - `UnknownVerb` for any verb outside the four protocol commands
    /// - `MalformedCommand` when a known verb is missing its fields
    pub fn parse_line(line: &str) -> Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let mut fields = line.splitn(3, crate::FIELD_SEPARATOR);
        let verb = fields.next().unwrap_or_default().trim();
        let id_field = fields.next();
        let rest = fields.next();

        let id = match id_field {
            Some(field) => parse_id(field),
            None if is_known_verb(verb) => {
                return Err(AlertLinkError::MalformedCommand(line.to_string()))
            }
            None => return Err(AlertLinkError::UnknownVerb(verb.to_string())),
        };

        let command = match verb {
            "PUBLISH" => {
                let payload = rest
                    .ok_or_else(|| AlertLinkError::MalformedCommand(line.to_string()))?;
                Command::Publish {
                    id,
                    payload: Payload::bounded(payload.trim(), crate::FORMAT_BUFFER_LEN - 1),
                }
            }
            "PUBREC" => Command::PubRec { id },
            "PUBREL" => Command::PubRel { id },
            "PUBCOMP" => Command::PubComp { id },
            other => return Err(AlertLinkError::UnknownVerb(other.to_string())),
        };

        Ok(Some(command))
    }
}

fn is_known_verb(verb: &str) -> bool {
    matches!(verb, "PUBLISH" | "PUBREC" | "PUBREL" | "PUBCOMP")
}

/// Unsigned id, with anything non-numeric or out of range mapped to 0
fn parse_id(field: &str) -> MessageId {
    MessageId(field.trim().parse::<u32>().unwrap_or(0))
}
