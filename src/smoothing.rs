use std::f64::consts::PI;

use crate::config::SmootherConfig;
use crate::types::Vec3;

/// First-order low-pass on a 3-vector with a per-axis smoothing factor.
struct LowPassFilter {
    last_output: Vec3,
    initialized: bool,
}

impl LowPassFilter {
    fn new() -> Self {
        Self {
            last_output: Vec3::zeros(),
            initialized: false,
        }
    }

    fn update(&mut self, input: Vec3, alpha: Vec3) -> Vec3 {
        if !self.initialized {
            self.last_output = input;
            self.initialized = true;
            return input;
        }
        self.last_output += alpha.component_mul(&(input - self.last_output));
        self.last_output
    }

    fn last(&self) -> Option<Vec3> {
        self.initialized.then_some(self.last_output)
    }
}

/// Smoothing factor of a first-order low-pass at `cutoff_hz` sampled at
/// `frequency_hz`.
fn smoothing_factor(cutoff_hz: f64, frequency_hz: f64) -> f64 {
    let tau = 1.0 / (2.0 * PI * cutoff_hz);
    let te = 1.0 / frequency_hz;
    1.0 / (1.0 + tau / te)
}

/// Speed-adaptive low-pass ("1€ filter") applied to the final position.
///
/// Slow motion gets a low cutoff (jitter removal); fast motion raises the
/// cutoff by `beta * |derivative|` (lag removal). Each axis adapts on its
/// own. Timestamps are expected to increase; a non-increasing timestamp
/// keeps the previous rate estimate.
pub struct OneEuroFilter {
    frequency: f64,
    min_cutoff: f64,
    beta: f64,
    derivative_cutoff: f64,
    max_cutoff: Option<f64>,
    value: LowPassFilter,
    derivative: LowPassFilter,
    last_timestamp: Option<f64>,
}

impl OneEuroFilter {
    pub fn new(config: &SmootherConfig) -> Self {
        Self {
            frequency: config.frequency,
            min_cutoff: config.min_cutoff,
            beta: config.beta,
            derivative_cutoff: config.derivative_cutoff,
            max_cutoff: config.max_cutoff,
            value: LowPassFilter::new(),
            derivative: LowPassFilter::new(),
            last_timestamp: None,
        }
    }

    /// Current sample-rate estimate in Hz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn reset(&mut self) {
        self.value = LowPassFilter::new();
        self.derivative = LowPassFilter::new();
        self.last_timestamp = None;
    }

    pub fn filter(&mut self, input: Vec3, timestamp: f64) -> Vec3 {
        if let Some(last) = self.last_timestamp {
            let dt = timestamp - last;
            if dt > 0.0 {
                self.frequency = 1.0 / dt;
            }
        }
        self.last_timestamp = Some(timestamp);

        let raw_derivative = match self.value.last() {
            Some(previous) => (input - previous) * self.frequency,
            None => Vec3::zeros(),
        };
        let d_alpha = smoothing_factor(self.derivative_cutoff, self.frequency);
        let derivative = self
            .derivative
            .update(raw_derivative, Vec3::repeat(d_alpha));

        let alpha = derivative.map(|d| {
            let mut cutoff = self.min_cutoff + self.beta * d.abs();
            if let Some(max) = self.max_cutoff {
                cutoff = cutoff.min(max);
            }
            smoothing_factor(cutoff, self.frequency)
        });
        self.value.update(input, alpha)
    }
}
