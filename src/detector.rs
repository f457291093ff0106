//! Hysteresis threshold detector
//!
//! Classifies a stream of distance samples against a threshold `T` with a
//! dead band of half-width `H`. An event fires only on a full crossing from
//! `<= T-H` to `>= T+H` or back; samples inside `(T-H, T+H)` never change the
//! state. The first classification after construction is silent, so a
//! restarted node re-learns its side without alerting.

/// Side of the threshold last committed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdState {
    #[default]
    Unknown,
    Below,
    Above,
}

#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    threshold: f32,
    hysteresis: f32,
    state: ThresholdState,
}

impl ThresholdDetector {
    pub fn new(threshold: f32, hysteresis: f32) -> Self {
        Self {
            threshold,
            hysteresis,
            state: ThresholdState::Unknown,
        }
    }

    pub fn state(&self) -> ThresholdState {
        self.state
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Feed one sample; returns true when a crossing event fires
    ///
    /// `None`, negative and non-finite samples count as "no reading" and
    /// leave the state untouched.
    pub fn observe(&mut self, sample: Option<f32>) -> bool {
        let d = match sample {
            Some(d) if d.is_finite() && d >= 0.0 => d,
            _ => return false,
        };

        let low = self.threshold - self.hysteresis;
        let high = self.threshold + self.hysteresis;

        match self.state {
            ThresholdState::Unknown => {
                if d <= low {
                    self.state = ThresholdState::Below;
                } else if d >= high {
                    self.state = ThresholdState::Above;
                }
                false
            }
            ThresholdState::Below if d >= high => {
                self.state = ThresholdState::Above;
                true
            }
            ThresholdState::Above if d <= low => {
                self.state = ThresholdState::Below;
                true
            }
            _ => false,
        }
    }
}
