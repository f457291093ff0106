//! Broker - receiving side of the handshake
//!
//! Answers `PUBLISH` with `PUBREC` and `PUBREL` with `PUBCOMP`, and hands
//! each message id to the application at most once no matter how often the
//! node retransmits it. The set of processed ids can be journaled to a JSON
//! file so duplicates are still recognised after a broker restart.
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::contracts::{AlertEvent, MessageId, Payload};
use crate::errors::{AlertLinkError, Result};
use crate::receiver::Receiver;
use crate::transmitter::{Command, LineSink, Transmitter};

/// Message content handed to the application
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveredContent {
    /// Payload decoded as an alert object
    Alert(AlertEvent),
    /// Anything else, passed through verbatim
    Raw(String),
}

/// A message delivered for the first time
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub id: MessageId,
    pub content: DeliveredContent,
}

impl DeliveredContent {
    fn decode(payload: &Payload) -> Self {
        match serde_json::from_str::<AlertEvent>(payload.as_str()) {
            Ok(event) => Self::Alert(event),
            Err(_) => Self::Raw(payload.as_str().to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Broker {
    processed: BTreeSet<u32>,
    journal: Option<PathBuf>,
}

impl Broker {
    /// Broker with in-memory duplicate tracking only
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that loads and saves processed ids at `path`
    ///
    /// A missing or unreadable journal starts empty.
    pub fn with_journal(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let processed = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<BTreeSet<u32>>(&bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "ignoring unreadable journal");
                BTreeSet::new()
            }),
            Err(_) => BTreeSet::new(),
        };
        debug!(path = %path.display(), count = processed.len(), "loaded processed ids");
        Self {
            processed,
            journal: Some(path),
        }
    }

    pub fn is_processed(&self, id: MessageId) -> bool {
        self.processed.contains(&id.0)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Handle one inbound line, replying through `sink`
    ///
    /// Returns the message when a PUBLISH is seen for the first time.
    ///
    /// A journal that cannot be written is logged; the message is still
    /// delivered and remembered for this session.
    ///
    /// # Errors
    /// Sink failures.
    pub fn handle_line<K>(&mut self, line: &str, sink: &mut K) -> Result<Option<Delivered>>
    where
        K: LineSink + ?Sized,
    {
        let command = match Receiver::parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(None),
            Err(err) => {
                debug!(%err, "ignoring inbound line");
                return Ok(None);
            }
        };

        match command {
            Command::Publish { id, payload } => {
                Transmitter::send(sink, &Command::PubRec { id })?;

                if self.is_processed(id) {
                    debug!(msg_id = %id, "already processed");
                    return Ok(None);
                }

                let content = DeliveredContent::decode(&payload);
                match &content {
                    DeliveredContent::Alert(event) => {
                        info!(msg_id = %id, alert = %event.alert, dist = event.dist, "alert received");
                    }
                    DeliveredContent::Raw(text) => {
                        info!(msg_id = %id, payload = %text, "message received");
                    }
                }

                self.processed.insert(id.0);
                if let Err(err) = self.save() {
                    warn!(msg_id = %id, %err, "could not save processed ids");
                }
                Ok(Some(Delivered { id, content }))
            }
            Command::PubRel { id } => {
                Transmitter::send(sink, &Command::PubComp { id })?;
                Ok(None)
            }
            other => {
                debug!(verb = other.verb(), "ignoring command not handled by broker");
                Ok(None)
            }
        }
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&self.processed)
            .map_err(|err| AlertLinkError::IoError(err.to_string()))?;
        fs::write(path, bytes)?;
        Ok(())
    }
}
