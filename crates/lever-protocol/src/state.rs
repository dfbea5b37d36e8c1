//! Lever telemetry and direction

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction the lever motor pushes against the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// Wire code used by the `d` command
    pub fn code(&self) -> u8 {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("Forward"),
            Direction::Reverse => f.write_str("Reverse"),
        }
    }
}

/// Snapshot of raw lever telemetry, replaced wholesale on every read
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LeverState {
    /// Strain gauge reading
    pub strain_gauge: f32,
    /// PWM duty the firmware computed from the force set-point
    pub calculated_pwm: f32,
    /// PWM duty actually applied to the motor
    pub actual_pwm: f32,
    /// Lever position potentiometer
    pub potentiometer_reading: f32,
}

impl fmt::Display for LeverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "strain_gauge: {:.6}", self.strain_gauge)?;
        writeln!(f, "calculated_pwm: {:.6}", self.calculated_pwm)?;
        writeln!(f, "actual_pwm: {:.6}", self.actual_pwm)?;
        write!(f, "potentiometer_reading: {:.6}", self.potentiometer_reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_codes() {
        assert_eq!(Direction::Forward.code(), 0);
        assert_eq!(Direction::Reverse.code(), 1);
        assert_eq!(Direction::default(), Direction::Forward);
    }

    #[test]
    fn test_state_display() {
        let state = LeverState {
            strain_gauge: 1.5,
            calculated_pwm: 20.0,
            actual_pwm: 19.0,
            potentiometer_reading: 512.0,
        };
        let text = state.to_string();
        assert!(text.starts_with("strain_gauge: 1.500000\n"));
        assert!(text.ends_with("potentiometer_reading: 512.000000"));
        assert_eq!(text.lines().count(), 4);
    }
}
