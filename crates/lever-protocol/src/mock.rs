//! In-process simulated lever
//!
//! Answers the firmware protocol without hardware. Used by tests and by the
//! rig's mock mode.

use crate::error::ProtocolError;
use crate::state::Direction;
use crate::transport::{LeverConnection, SerialTransport};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Potentiometer reading of a lever at rest
const REST_POSITION: f32 = 100.0;
/// Potentiometer reading at full travel
const FULL_TRAVEL: f32 = 1023.0;

/// A command received by the mock, tagged with its port
#[derive(Debug, Clone, PartialEq)]
pub enum MockCommand {
    Open,
    ReadState,
    SetForce(i32),
    SetDirection(Direction),
    Unknown(String),
}

/// Simulated lever state per port
#[derive(Debug)]
struct MockLever {
    force: i32,
    direction: Direction,
    position: f32,
}

impl Default for MockLever {
    fn default() -> Self {
        Self {
            force: 0,
            direction: Direction::Forward,
            position: REST_POSITION,
        }
    }
}

impl MockLever {
    /// Crude motion model: pushing in reverse drives the lever out, forward
    /// lets it settle back to rest.
    fn step(&mut self) {
        let speed = (self.force.unsigned_abs() as f32).min(200.0) * 0.5;
        let (target, speed) = match self.direction {
            Direction::Reverse => (FULL_TRAVEL, speed),
            Direction::Forward => (REST_POSITION, speed.max(20.0)),
        };
        if self.position < target {
            self.position = (self.position + speed).min(target);
        } else {
            self.position = (self.position - speed).max(target);
        }
    }

    fn state_line(&self) -> String {
        let pwm = (self.force.max(0) as f32 * 255.0 / 200.0).min(255.0);
        format!(
            "strain gauge reading: {:.2}\tcalculated PWM: {:.1}\tacutal PWM: {:.1}\tpotentiometer reading: {:.1}",
            self.force as f32 / 10.0,
            pwm,
            pwm,
            self.position
        )
    }
}

#[derive(Debug, Default)]
struct Shared {
    refused: HashSet<String>,
    unplugged: HashSet<String>,
    silent: bool,
    pinned_positions: HashMap<String, f32>,
    levers: HashMap<String, MockLever>,
    log: Vec<(String, MockCommand)>,
}

/// Transport whose ports are simulated levers
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    /// Create a mock where every port opens successfully
    pub fn new() -> Self {
        info!("Creating mock lever transport");
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.shared)
    }

    /// Make every future open of `port` fail
    pub fn refuse_port(&self, port: &str) {
        self.lock().refused.insert(port.to_string());
    }

    /// Simulate pulling the cable on `port`: its connections report closed
    /// and every call fails with `NotOpen`
    pub fn unplug(&self, port: &str) {
        self.lock().unplugged.insert(port.to_string());
    }

    /// Stop (or resume) answering on every connection
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Pin the potentiometer reading reported on `port`
    pub fn pin_position(&self, port: &str, reading: f32) {
        self.lock().pinned_positions.insert(port.to_string(), reading);
    }

    /// Every command received so far, oldest first
    pub fn commands(&self) -> Vec<(String, MockCommand)> {
        self.lock().log.clone()
    }

    /// Commands received on one port, oldest first
    pub fn commands_for(&self, port: &str) -> Vec<MockCommand> {
        self.lock()
            .log
            .iter()
            .filter(|(p, _)| p == port)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Force the simulated lever on `port` was last set to
    pub fn force_on(&self, port: &str) -> Option<i32> {
        self.lock().levers.get(port).map(|l| l.force)
    }

    /// Direction the simulated lever on `port` was last set to
    pub fn direction_on(&self, port: &str) -> Option<Direction> {
        self.lock().levers.get(port).map(|l| l.direction)
    }
}

impl SerialTransport for MockTransport {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn LeverConnection>, ProtocolError> {
        let mut shared = self.lock();
        shared.log.push((port.to_string(), MockCommand::Open));

        if shared.refused.contains(port) {
            debug!("Mock refusing to open {}", port);
            return Err(ProtocolError::Serial(format!("mock port {} refused", port)));
        }

        debug!("Mock opened {} at {} baud", port, baud_rate);
        shared.levers.entry(port.to_string()).or_default();

        Ok(Box::new(MockConnection {
            port: port.to_string(),
            shared: Arc::clone(&self.shared),
            timeout,
            reply: None,
        }))
    }
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MockConnection {
    port: String,
    shared: Arc<Mutex<Shared>>,
    timeout: Duration,
    reply: Option<String>,
}

impl LeverConnection for MockConnection {
    fn write_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        let mut shared = lock_shared(&self.shared);
        if shared.unplugged.contains(&self.port) {
            return Err(ProtocolError::NotOpen);
        }
        let silent = shared.silent;
        let pinned = shared.pinned_positions.get(&self.port).copied();

        let (head, rest) = match text.chars().next() {
            Some(first) => text.split_at(first.len_utf8()),
            None => ("", ""),
        };
        let command = match (head, rest) {
            ("s", "") => MockCommand::ReadState,
            ("g", value) => value
                .parse()
                .map(MockCommand::SetForce)
                .unwrap_or_else(|_| MockCommand::Unknown(text.to_string())),
            ("d", "0") => MockCommand::SetDirection(Direction::Forward),
            ("d", "1") => MockCommand::SetDirection(Direction::Reverse),
            _ => MockCommand::Unknown(text.to_string()),
        };
        shared.log.push((self.port.clone(), command.clone()));

        let lever = shared.levers.entry(self.port.clone()).or_default();
        let reply = match command {
            MockCommand::ReadState => {
                lever.step();
                if let Some(reading) = pinned {
                    lever.position = reading;
                }
                lever.state_line()
            }
            MockCommand::SetForce(grams) => {
                lever.force = grams;
                format!("force: {}", grams)
            }
            MockCommand::SetDirection(direction) => {
                lever.direction = direction;
                format!("direction: {}", direction.code())
            }
            MockCommand::Open | MockCommand::Unknown(_) => "?".to_string(),
        };

        self.reply = if silent { None } else { Some(reply) };
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, ProtocolError> {
        if !self.is_open() {
            return Err(ProtocolError::NotOpen);
        }
        self.reply
            .take()
            .ok_or(ProtocolError::Timeout(self.timeout.as_millis() as u64))
    }

    fn is_open(&self) -> bool {
        !lock_shared(&self.shared).unplugged.contains(&self.port)
    }
}
