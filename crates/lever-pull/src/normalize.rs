//! Potentiometer normalization

use lever_protocol::LeverState;
use serde::{Deserialize, Serialize};

/// Raw potentiometer span of a lever's travel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionRange {
    /// Reading at rest
    pub min: f32,
    /// Reading at full pull
    pub max: f32,
}

impl Default for PositionRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1023.0,
        }
    }
}

impl PositionRange {
    /// Map a raw reading into [0, 1]. A degenerate range maps to 0.
    pub fn normalize(&self, reading: f32) -> f32 {
        let span = self.max - self.min;
        if span.abs() <= f32::EPSILON || !span.is_finite() {
            return 0.0;
        }

        ((reading - self.min) / span).clamp(0.0, 1.0)
    }

    /// Normalized position carried by a state report
    pub fn position(&self, state: &LeverState) -> f32 {
        self.normalize(state.potentiometer_reading)
    }
}
