//! Distance sensor collaborator
//!
//! The node only needs "a reading in centimetres, or nothing". Hardware
//! drivers, closures and the simulated sensor used by the demo binary all
//! plug in through [`DistanceSensor`].
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Speed of sound in cm/µs at roughly 20 °C
pub const SOUND_CM_PER_US: f32 = 0.0343;

/// Anything that can take one bounded-time distance measurement
pub trait DistanceSensor {
    /// Distance in centimetres, or `None` when no echo arrived in time
    fn measure(&mut self) -> Option<f32>;
}

impl<F> DistanceSensor for F
where
    F: FnMut() -> Option<f32>,
{
    fn measure(&mut self) -> Option<f32> {
        self()
    }
}

/// Convert an ultrasonic round-trip echo time to centimetres
///
/// A duration of 0 is how pulse timers report a timeout and maps to `None`,
/// as does anything past [`crate::ECHO_TIMEOUT_US`].
pub fn distance_from_echo_us(duration_us: u32) -> Option<f32> {
    if duration_us == 0 || duration_us > crate::ECHO_TIMEOUT_US {
        return None;
    }
    Some(duration_us as f32 * SOUND_CM_PER_US / 2.0)
}

/// Seeded random-walk sensor for demos and soak tests
pub struct SimulatedSensor {
    rng: StdRng,
    distance_cm: f32,
    step_cm: f32,
    timeout_probability: f64,
    min_cm: f32,
    max_cm: f32,
}

impl SimulatedSensor {
    pub fn new(seed: u64, start_cm: f32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            distance_cm: start_cm,
            step_cm: 1.5,
            timeout_probability: 0.05,
            min_cm: 2.0,
            max_cm: 400.0,
        }
    }

    pub fn with_step_cm(mut self, step_cm: f32) -> Self {
        self.step_cm = step_cm;
        self
    }

    pub fn with_timeout_probability(mut self, probability: f64) -> Self {
        self.timeout_probability = probability.clamp(0.0, 1.0);
        self
    }
}

impl DistanceSensor for SimulatedSensor {
    fn measure(&mut self) -> Option<f32> {
        if self.rng.gen_bool(self.timeout_probability) {
            return None;
        }
        let step = self.rng.gen_range(-self.step_cm..=self.step_cm);
        self.distance_cm = (self.distance_cm + step).clamp(self.min_cm, self.max_cm);
        Some(self.distance_cm)
    }
}
