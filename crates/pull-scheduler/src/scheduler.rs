//! Pull Scheduler Implementation

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How the interval between pulls is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Always `interval_s`
    #[default]
    FixedInterval,
    /// Drawn from an exponential distribution after every pull
    ExpRandomInterval,
}

/// Alternating active and downtime windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochConfig {
    /// Length of an active epoch (seconds)
    pub active_s: f64,
    /// Length of a downtime epoch (seconds)
    pub downtime_s: f64,
}

/// Configuration for the pull scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub mode: ScheduleMode,
    /// Interval in fixed mode (default: 4.0 s)
    pub interval_s: f64,
    /// Mean of the exponential draw (seconds)
    pub mean_interval_s: f64,
    /// Lower clamp on drawn intervals (seconds)
    pub min_interval_s: f64,
    /// Upper clamp on drawn intervals (seconds)
    pub max_interval_s: f64,
    /// Epoch alternation; `None` keeps the scheduler always active
    pub epoch: Option<EpochConfig>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::FixedInterval,
            interval_s: 4.0,
            mean_interval_s: 4.0,
            min_interval_s: 1.0,
            max_interval_s: 10.0,
            epoch: None,
        }
    }
}

/// Decides when the next pull is due
pub struct PullScheduler {
    config: ScheduleConfig,
    rng: StdRng,
    current_interval: Duration,
    last_pull: Option<Instant>,
    epoch_start: Option<Instant>,
    active_epoch: bool,
}

impl PullScheduler {
    /// Create a scheduler seeded from the OS
    pub fn new(config: ScheduleConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a scheduler with a reproducible random sequence
    pub fn with_seed(config: ScheduleConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut config: ScheduleConfig, rng: StdRng) -> Self {
        if config.min_interval_s.is_nan() {
            warn!("Lower interval clamp is NaN, using 0");
            config.min_interval_s = 0.0;
        }
        if config.max_interval_s.is_nan() {
            warn!("Upper interval clamp is NaN, leaving draws unbounded");
            config.max_interval_s = f64::INFINITY;
        }
        if config.min_interval_s > config.max_interval_s {
            warn!(
                "Interval clamp [{}, {}] is inverted, swapping",
                config.min_interval_s, config.max_interval_s
            );
            std::mem::swap(&mut config.min_interval_s, &mut config.max_interval_s);
        }

        let mut scheduler = Self {
            current_interval: secs(config.interval_s),
            config,
            rng,
            last_pull: None,
            epoch_start: None,
            active_epoch: true,
        };
        if scheduler.config.mode == ScheduleMode::ExpRandomInterval {
            scheduler.current_interval = scheduler.draw_interval();
        }

        info!(
            "Pull scheduler created: {:?}, first interval {:?}",
            scheduler.config.mode, scheduler.current_interval
        );
        scheduler
    }

    /// Advance to `now`. Returns true when a pull should happen.
    pub fn tick(&mut self, now: Instant) -> bool {
        let last_pull = *self.last_pull.get_or_insert(now);
        let epoch_start = *self.epoch_start.get_or_insert(now);

        if let Some(epoch) = &self.config.epoch {
            let duration = if self.active_epoch {
                epoch.active_s
            } else {
                epoch.downtime_s
            };
            if now.saturating_duration_since(epoch_start) > secs(duration) {
                self.active_epoch = !self.active_epoch;
                self.epoch_start = Some(now);
                debug!(
                    "Pull schedule entering {} epoch",
                    if self.active_epoch { "active" } else { "downtime" }
                );
            }
        }

        if !self.active_epoch {
            return false;
        }

        if now.saturating_duration_since(last_pull) <= self.current_interval {
            return false;
        }

        self.last_pull = Some(now);
        if self.config.mode == ScheduleMode::ExpRandomInterval {
            self.current_interval = self.draw_interval();
        }
        debug!("Pull due, next interval {:?}", self.current_interval);
        true
    }

    /// Interval that must elapse after the last pull
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Pulls are currently allowed
    pub fn is_active_epoch(&self) -> bool {
        self.active_epoch
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    fn draw_interval(&mut self) -> Duration {
        let u: f64 = self.rng.gen();
        let drawn = -self.config.mean_interval_s * (1.0 - u).ln();
        let clamped = if drawn.is_finite() {
            drawn.clamp(self.config.min_interval_s, self.config.max_interval_s)
        } else {
            self.config.max_interval_s
        };
        secs(clamped)
    }
}

/// Seconds to a `Duration`: NaN and non-positive become zero, values too
/// large to represent saturate
fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    }
}
