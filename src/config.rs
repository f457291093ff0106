//! Node configuration
//!
//! Defaults come from the protocol constants in the crate root. The builder
//! follows the fluent `with_*` style and validates on `build`.
use std::time::Duration;

use crate::errors::{AlertLinkError, Result};

/// Validated node configuration
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Alert threshold in centimetres
    pub threshold_cm: f32,
    /// Half-width of the dead band around the threshold
    pub hysteresis_cm: f32,
    /// Minimum time between sensor samples while idle
    pub sample_interval_ms: u32,
    /// Minimum time between PUBLISH retransmissions while awaiting an ack
    pub retransmit_interval_ms: u32,
    /// Width of the persisted payload slot
    pub payload_slot_len: usize,
}

impl NodeConfig {
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::new()
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms as u64)
    }

    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_millis(self.retransmit_interval_ms as u64)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            threshold_cm: crate::THRESHOLD_CM,
            hysteresis_cm: crate::HYSTERESIS_CM,
            sample_interval_ms: crate::SAMPLE_INTERVAL_MS,
            retransmit_interval_ms: crate::RETRANSMIT_INTERVAL_MS,
            payload_slot_len: crate::PAYLOAD_SLOT_LEN,
        }
    }
}

/// NodeConfigBuilder - Fluent interface for node configuration
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Create a new builder seeded with the protocol defaults
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn with_threshold_cm(mut self, threshold_cm: f32) -> Self {
        self.config.threshold_cm = threshold_cm;
        self
    }

    pub fn with_hysteresis_cm(mut self, hysteresis_cm: f32) -> Self {
        self.config.hysteresis_cm = hysteresis_cm;
        self
    }

    pub fn with_sample_interval_ms(mut self, interval_ms: u32) -> Self {
        self.config.sample_interval_ms = interval_ms;
        self
    }

    pub fn with_retransmit_interval_ms(mut self, interval_ms: u32) -> Self {
        self.config.retransmit_interval_ms = interval_ms;
        self
    }

    pub fn with_payload_slot_len(mut self, len: usize) -> Self {
        self.config.payload_slot_len = len;
        self
    }

    /// Validate and produce the configuration
    ///
    /// # Errors
    /// Returns `InvalidConfig` unless `0 <= H < T` with both finite, both
    /// intervals are non-zero, and the payload slot holds at least one byte.
    pub fn build(self) -> Result<NodeConfig> {
        let c = self.config;

        if !c.threshold_cm.is_finite() || !c.hysteresis_cm.is_finite() {
            return Err(AlertLinkError::InvalidConfig(
                "threshold and hysteresis must be finite".to_string(),
            ));
        }
        if c.hysteresis_cm < 0.0 || c.hysteresis_cm >= c.threshold_cm {
            return Err(AlertLinkError::InvalidConfig(format!(
                "hysteresis {} must satisfy 0 <= H < threshold {}",
                c.hysteresis_cm, c.threshold_cm
            )));
        }
        if c.sample_interval_ms == 0 || c.retransmit_interval_ms == 0 {
            return Err(AlertLinkError::InvalidConfig(
                "intervals must be non-zero".to_string(),
            ));
        }
        if c.payload_slot_len == 0 {
            return Err(AlertLinkError::InvalidConfig(
                "payload slot must hold at least one byte".to_string(),
            ));
        }

        Ok(c)
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
