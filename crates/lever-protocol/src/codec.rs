//! Lever command encoding and response parsing

use crate::command;
use crate::error::ProtocolError;
use crate::state::{Direction, LeverState};
use crate::transport::LeverConnection;

const STRAIN_GAUGE_KEY: &str = "strain gauge reading: ";
const CALCULATED_PWM_KEY: &str = "calculated PWM: ";
// Spelled this way by the firmware.
const ACTUAL_PWM_KEY: &str = "acutal PWM: ";
const POTENTIOMETER_KEY: &str = "potentiometer reading: ";

/// Ask the lever for its state and parse the reply
pub fn read_state(conn: &mut dyn LeverConnection) -> Result<LeverState, ProtocolError> {
    conn.write_text(command::READ_STATE)?;
    let line = conn.read_line()?;
    parse_state(&line)
}

/// Set the resisting force in grams. Returns the firmware's acknowledgement
/// line.
pub fn set_force_grams(conn: &mut dyn LeverConnection, grams: i32) -> Result<String, ProtocolError> {
    conn.write_text(&format!("{}{}", command::SET_FORCE, grams))?;
    conn.read_line()
}

/// Set the motor direction. Succeeds once the firmware answers with a line.
pub fn set_direction(conn: &mut dyn LeverConnection, direction: Direction) -> Result<(), ProtocolError> {
    conn.write_text(&format!("{}{}", command::SET_DIRECTION, direction.code()))?;
    conn.read_line().map(|_| ())
}

/// Parse a state line such as
/// `strain gauge reading: 1.2\tcalculated PWM: 30\tacutal PWM: 28`.
///
/// The potentiometer field is optional on older firmware and reads as 0.0
/// when absent.
pub fn parse_state(line: &str) -> Result<LeverState, ProtocolError> {
    let required = |key: &str| {
        field_value(line, key).ok_or_else(|| {
            ProtocolError::InvalidResponse(format!(
                "missing or malformed `{}` in {:?}",
                key.trim_end_matches(": "),
                line
            ))
        })
    };

    let potentiometer_reading = if line.contains(POTENTIOMETER_KEY) {
        required(POTENTIOMETER_KEY)?
    } else {
        0.0
    };

    Ok(LeverState {
        strain_gauge: required(STRAIN_GAUGE_KEY)?,
        calculated_pwm: required(CALCULATED_PWM_KEY)?,
        actual_pwm: required(ACTUAL_PWM_KEY)?,
        potentiometer_reading,
    })
}

/// Number following `key`. Like C's `strtof`, the longest numeric prefix
/// of the token wins, so trailing junk (`28,`) is ignored.
fn field_value(line: &str, key: &str) -> Option<f32> {
    let start = line.find(key)? + key.len();
    let token = line[start..].split_whitespace().next()?;
    (1..=token.len())
        .rev()
        .filter(|&end| token.is_char_boundary(end))
        .find_map(|end| token[..end].parse().ok())
}
