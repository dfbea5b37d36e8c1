//! Messages exchanged between the control thread and the worker

use crate::PortOpenError;
use lever_protocol::{Direction, LeverState};
use std::fmt;

/// Opaque lever identifier, unique for the lifetime of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeverHandle(u32);

impl LeverHandle {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Numeric id
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LeverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lever#{}", self.0)
    }
}

/// Command delivered to the worker through a lever's mailbox
#[derive(Debug, Clone, PartialEq)]
pub enum LeverCommand {
    /// Update the commanded force and/or direction
    SetForceOrDirection {
        force: Option<i32>,
        direction: Option<Direction>,
    },
    /// Drop any connection and open `port`
    OpenPort { port: String },
    /// Drop any connection
    ClosePort,
}

/// Report published by the worker into the shared queue
#[derive(Debug, Clone, PartialEq)]
pub enum LeverReport {
    /// Latest hardware-confirmed values; `None` means unknown
    ShareState {
        handle: LeverHandle,
        force: Option<i32>,
        direction: Option<Direction>,
        state: Option<LeverState>,
        is_open: bool,
    },
    /// Result of the last open request
    PortStatus {
        handle: LeverHandle,
        result: Result<(), PortOpenError>,
        is_open: bool,
    },
}

impl LeverReport {
    /// Lever the report is about
    pub fn handle(&self) -> LeverHandle {
        match self {
            LeverReport::ShareState { handle, .. } | LeverReport::PortStatus { handle, .. } => *handle,
        }
    }
}
