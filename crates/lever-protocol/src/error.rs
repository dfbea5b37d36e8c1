//! Lever Protocol Error Types

use thiserror::Error;

/// Errors that can occur while talking to a lever
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serial port could not be opened or failed mid-transfer
    #[error("Serial port error: {0}")]
    Serial(String),

    /// No complete line arrived within the timeout
    #[error("Timeout waiting for lever response after {0}ms")]
    Timeout(u64),

    /// A line arrived but could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Operation on a connection that has been closed
    #[error("Serial connection is not open")]
    NotOpen,
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Serial(err.to_string())
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        ProtocolError::Serial(err.to_string())
    }
}
