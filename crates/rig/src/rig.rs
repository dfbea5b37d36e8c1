//! Task-thread application object

use crate::config::RigConfig;
use crate::RigError;
use lever_protocol::SerialTransport;
use lever_pull::{AutomatedPull, PositionRange, PullDetector, PullEdge};
use lever_system::{LeverHandle, LeverRegistry, LeverWorker};
use pull_scheduler::PullScheduler;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counters reported when the rig stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub pulls: u64,
    pub releases: u64,
    pub scheduled_pulls: u64,
    pub completed_cycles: u64,
    pub levers_open: usize,
}

/// Per-lever task state
struct LeverSlot {
    handle: LeverHandle,
    detector: PullDetector,
    range: PositionRange,
}

/// Owns the registry and the pull state machines
pub struct Rig {
    config: RigConfig,
    registry: LeverRegistry,
    slots: Vec<LeverSlot>,
    scheduler: PullScheduler,
    automated: AutomatedPull,
    summary: RunSummary,
}

impl Rig {
    pub fn new(config: RigConfig, transport: Arc<dyn SerialTransport>) -> Self {
        let registry = LeverRegistry::new(transport, config.registry.clone());
        let scheduler = PullScheduler::new(config.schedule.clone());
        Self {
            config,
            registry,
            slots: Vec::new(),
            scheduler,
            automated: AutomatedPull::new(),
            summary: RunSummary::default(),
        }
    }

    /// Initialize the registry with a worker thread and apply the startup
    /// lever settings
    pub fn start(&mut self) -> Result<(), RigError> {
        self.config.validate()?;
        let handles = self.registry.initialize(self.config.levers.len())?;
        self.configure(handles);
        Ok(())
    }

    /// Like [`Rig::start`], but the caller drives the returned worker
    pub fn start_stepped(&mut self) -> Result<LeverWorker, RigError> {
        self.config.validate()?;
        let (handles, worker) = self.registry.initialize_stepped(self.config.levers.len())?;
        self.configure(handles);
        Ok(worker)
    }

    fn configure(&mut self, handles: Vec<LeverHandle>) {
        self.slots = handles
            .into_iter()
            .zip(&self.config.levers)
            .map(|(handle, lever)| {
                self.registry.set_force(handle, lever.force_grams);
                self.registry.set_direction(handle, lever.direction);
                if let Some(port) = &lever.port {
                    self.registry.open_connection(handle, port);
                }
                LeverSlot {
                    handle,
                    detector: PullDetector::new(lever.thresholds),
                    range: lever.range,
                }
            })
            .collect();

        info!("Rig started with {} levers", self.slots.len());
    }

    /// One control tick
    pub fn tick(&mut self, now: Instant) {
        self.summary.ticks += 1;
        self.registry.update();

        for slot in &mut self.slots {
            if let Some(error) = self.registry.open_error(slot.handle) {
                debug!("{}: {}", slot.handle, error);
            }

            // No telemetry: start detection afresh once readings return.
            let Some(state) = self.registry.state(slot.handle) else {
                slot.detector.reset();
                continue;
            };
            match slot.detector.detect(slot.range.position(&state)) {
                Some(PullEdge::Pulled) => {
                    info!("{} pulled", slot.handle);
                    self.summary.pulls += 1;
                }
                Some(PullEdge::Released) => {
                    info!("{} released", slot.handle);
                    self.summary.releases += 1;
                }
                None => {}
            }
        }

        let Some(pull_handle) = self.slots.get(self.config.pull_lever).map(|s| s.handle) else {
            return;
        };

        if self.scheduler.tick(now) {
            self.summary.scheduled_pulls += 1;
            let force = self.registry.commanded_force(pull_handle) as f32;
            if !self.automated.start(force) {
                warn!("Scheduled pull skipped, previous cycle still running");
            }
        }

        let result = self.automated.tick(&self.config.automated_pull, now);
        if let Some(force) = result.set_force {
            self.registry.set_force(pull_handle, force.round() as i32);
        }
        if let Some(direction) = result.set_direction {
            self.registry.set_direction(pull_handle, direction);
        }
        if result.completed {
            self.summary.completed_cycles += 1;
        }
    }

    pub fn registry(&self) -> &LeverRegistry {
        &self.registry
    }

    pub fn automated_pull(&self) -> &AutomatedPull {
        &self.automated
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Stop the registry and return the final counters
    pub fn shutdown(mut self) -> RunSummary {
        self.summary.levers_open = self
            .slots
            .iter()
            .filter(|s| self.registry.is_open(s.handle))
            .count();
        self.registry.terminate();

        info!(
            "Rig summary: {} ticks, {} pulls, {} scheduled pulls, {} cycles",
            self.summary.ticks, self.summary.pulls, self.summary.scheduled_pulls, self.summary.completed_cycles
        );
        self.summary
    }
}
