//! Lever Protocol Implementation
//!
//! This crate provides blocking serial communication with force-controlled
//! lever actuators. The firmware speaks a line-oriented ASCII protocol:
//! single-letter commands in, one text line out.

mod codec;
mod error;
mod mock;
mod state;
mod transport;

pub use codec::{parse_state, read_state, set_direction, set_force_grams};
pub use error::ProtocolError;
pub use mock::{MockCommand, MockTransport};
pub use state::{Direction, LeverState};
pub use transport::{list_ports, LeverConnection, PortDescriptor, SerialPortTransport, SerialTransport};

/// Serial link defaults for the lever firmware
pub mod defaults {
    /// Baud rate the firmware is flashed with
    pub const BAUD_RATE: u32 = 9600;
    /// Read/write timeout in milliseconds
    pub const READ_WRITE_TIMEOUT_MS: u64 = 1000;
}

/// Single-letter command prefixes understood by the firmware
pub mod command {
    /// Report state
    pub const READ_STATE: &str = "s";
    /// Set force in grams, followed by the integer value
    pub const SET_FORCE: char = 'g';
    /// Set direction, followed by `0` (forward) or `1` (reverse)
    pub const SET_DIRECTION: char = 'd';
}
