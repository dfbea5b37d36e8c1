//! Automated pull sequencing
//!
//! Drives a lever through four phases, ramping the commanded force toward
//! each phase's target and holding it before moving on:
//!
//! | Phase     | Target | On entry          |
//! |-----------|--------|-------------------|
//! | Forwards0 | high   |                   |
//! | Reverse0  | low    | direction Reverse |
//! | Reverse1  | high   |                   |
//! | Forwards1 | low    | direction Forward |
//!
//! The sequencer returns to idle once the Forwards1 hold expires.

use lever_protocol::Direction;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sequence phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PullPhase {
    #[default]
    Idle,
    Forwards0,
    Reverse0,
    Reverse1,
    Forwards1,
}

impl PullPhase {
    fn next(self) -> Self {
        match self {
            PullPhase::Idle => PullPhase::Idle,
            PullPhase::Forwards0 => PullPhase::Reverse0,
            PullPhase::Reverse0 => PullPhase::Reverse1,
            PullPhase::Reverse1 => PullPhase::Forwards1,
            PullPhase::Forwards1 => PullPhase::Idle,
        }
    }

    /// Direction to command when entering this phase
    fn entry_direction(self) -> Option<Direction> {
        match self {
            PullPhase::Reverse0 => Some(Direction::Reverse),
            PullPhase::Forwards1 => Some(Direction::Forward),
            _ => None,
        }
    }
}

/// Progress within a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ForceTransitionState {
    #[default]
    Idle,
    /// Ramping toward the phase target
    Transitioning,
    /// Holding at the target
    Timeout,
}

/// Ramp and hold settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomatedPullParams {
    /// Ramp rate in grams per second; zero or less jumps straight to target
    pub force_slope_g_s: f32,
    /// Force target for the low phases (grams)
    pub force_target_low: f32,
    /// Force target for the high phases (grams)
    pub force_target_high: f32,
    /// Hold at each target before advancing (seconds)
    pub force_transition_timeout_s: f32,
}

impl Default for AutomatedPullParams {
    fn default() -> Self {
        Self {
            force_slope_g_s: 800.0,
            force_target_low: 0.0,
            force_target_high: 100.0,
            force_transition_timeout_s: 0.125,
        }
    }
}

impl AutomatedPullParams {
    /// Hold time; NaN and negative mean no hold, huge values saturate
    fn hold(&self) -> Duration {
        Duration::try_from_secs_f32(self.force_transition_timeout_s.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// What the caller should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AutomatedPullResult {
    /// Sequence is still running
    pub active: bool,
    /// Force to command, when the ramp moved it
    pub set_force: Option<f32>,
    /// Direction to command, on phase entry
    pub set_direction: Option<Direction>,
    /// The full cycle finished on this tick
    pub completed: bool,
}

/// Automated pull sequencer
#[derive(Debug, Clone, Default)]
pub struct AutomatedPull {
    phase: PullPhase,
    force_state: ForceTransitionState,
    current_force: f32,
    target_high: bool,
    last_tick: Option<Instant>,
    phase_elapsed: Duration,
}

impl AutomatedPull {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a cycle from the lever's current force. Returns false, leaving
    /// the running cycle untouched, if one is already in progress.
    pub fn start(&mut self, current_force: f32) -> bool {
        if self.is_active() {
            warn!("Automated pull already running in {:?}", self.phase);
            return false;
        }

        info!("Starting automated pull from {} g", current_force);
        *self = Self {
            phase: PullPhase::Forwards0,
            force_state: ForceTransitionState::Transitioning,
            current_force,
            target_high: true,
            last_tick: None,
            phase_elapsed: Duration::ZERO,
        };
        true
    }

    /// Abandon the cycle
    pub fn cancel(&mut self) {
        if self.is_active() {
            info!("Automated pull cancelled in {:?}", self.phase);
        }
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.phase != PullPhase::Idle
    }

    pub fn phase(&self) -> PullPhase {
        self.phase
    }

    pub fn force_state(&self) -> ForceTransitionState {
        self.force_state
    }

    /// Force most recently produced by the ramp
    pub fn current_force(&self) -> f32 {
        self.current_force
    }

    /// Advance the sequence to `now`
    pub fn tick(&mut self, params: &AutomatedPullParams, now: Instant) -> AutomatedPullResult {
        let mut result = AutomatedPullResult::default();
        if !self.is_active() {
            return result;
        }

        let dt = self
            .last_tick
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_tick = Some(now);

        let target = if self.target_high {
            params.force_target_high
        } else {
            params.force_target_low
        };

        match self.force_state {
            ForceTransitionState::Idle | ForceTransitionState::Transitioning => {
                self.force_state = ForceTransitionState::Transitioning;

                let next = ramp(self.current_force, target, params.force_slope_g_s, dt);
                if next != self.current_force {
                    self.current_force = next;
                    result.set_force = Some(next);
                }
                if next == target {
                    self.force_state = ForceTransitionState::Timeout;
                    self.phase_elapsed = Duration::ZERO;
                }
            }
            ForceTransitionState::Timeout => {
                self.phase_elapsed = self.phase_elapsed.saturating_add(dt);
                if self.phase_elapsed >= params.hold() {
                    self.advance(&mut result);
                }
            }
        }

        result.active = self.is_active();
        result
    }

    fn advance(&mut self, result: &mut AutomatedPullResult) {
        let next = self.phase.next();
        debug!("Automated pull {:?} -> {:?}", self.phase, next);

        self.phase = next;
        self.target_high = !self.target_high;
        self.force_state = ForceTransitionState::Transitioning;
        self.phase_elapsed = Duration::ZERO;
        result.set_direction = next.entry_direction();

        if next == PullPhase::Idle {
            info!("Automated pull complete");
            self.force_state = ForceTransitionState::Idle;
            self.last_tick = None;
            result.completed = true;
        }
    }
}

/// Step `current` toward `target` by at most `slope * dt`
fn ramp(current: f32, target: f32, slope: f32, dt: Duration) -> f32 {
    if slope <= 0.0 {
        return target;
    }

    let max_step = slope * dt.as_secs_f32();
    let delta = target - current;
    if delta.abs() <= max_step {
        target
    } else {
        current + max_step.copysign(delta)
    }
}
