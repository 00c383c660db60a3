//! Exponential learning-rate decay with an optional warm-up delay

use std::f64::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

/// Log-linear interpolation from `lr_init` to `lr_final` over `max_steps`
///
/// During the first `delay_steps` the rate is additionally scaled by a factor
/// that rises from `delay_mult` to 1 along a quarter sine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExponentialLr {
    pub lr_init: f64,
    pub lr_final: f64,
    pub delay_steps: usize,
    pub delay_mult: f64,
    pub max_steps: usize,
}

impl ExponentialLr {
    /// Decay used for splat centers
    pub fn for_centers(max_steps: usize) -> Self {
        Self {
            lr_init: 1e-4,
            lr_final: 1.6e-6,
            delay_steps: 0,
            delay_mult: 0.01,
            max_steps,
        }
    }

    pub fn at(&self, step: usize) -> f64 {
        if self.lr_init == 0.0 && self.lr_final == 0.0 {
            return 0.0;
        }

        let delay_rate = if self.delay_steps > 0 {
            let warmup = (step as f64 / self.delay_steps as f64).clamp(0.0, 1.0);
            self.delay_mult + (1.0 - self.delay_mult) * (FRAC_PI_2 * warmup).sin()
        } else {
            1.0
        };

        let t = if self.max_steps == 0 {
            1.0
        } else {
            (step as f64 / self.max_steps as f64).clamp(0.0, 1.0)
        };
        let log_lerp = (self.lr_init.ln() * (1.0 - t) + self.lr_final.ln() * t).exp();
        delay_rate * log_lerp
    }
}
