//! Rig configuration

use crate::RigError;
use config::{Config, Environment, File};
use lever_protocol::Direction;
use lever_pull::{AutomatedPullParams, PositionRange, PullThresholds};
use lever_system::RegistryConfig;
use pull_scheduler::ScheduleConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "LEVER_RIG_CONFIG";
/// Prefix of environment overrides, e.g. `LEVER_RIG__CONTROL_PERIOD_MS`
pub const ENV_PREFIX: &str = "LEVER_RIG";

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Which transport backs the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Real serial ports
    #[default]
    Serial,
    /// In-process simulated levers
    Mock,
}

/// One lever on the rig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeverConfig {
    /// Port to open at startup; left closed when absent
    pub port: Option<String>,
    /// Initial resisting force (grams)
    pub force_grams: i32,
    /// Initial motor direction
    pub direction: Direction,
    /// Potentiometer span used to normalize position
    pub range: PositionRange,
    /// Pull detection thresholds on the normalized position
    pub thresholds: PullThresholds,
}

impl Default for LeverConfig {
    fn default() -> Self {
        Self {
            port: None,
            force_grams: 20,
            direction: Direction::Forward,
            range: PositionRange::default(),
            thresholds: PullThresholds::default(),
        }
    }
}

/// Top-level rig configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub log: LogConfig,
    pub transport: TransportKind,
    pub registry: RegistryConfig,
    pub levers: Vec<LeverConfig>,
    /// Task loop period (milliseconds)
    pub control_period_ms: u64,
    /// Stop after this many seconds; run until killed when absent
    pub duration_secs: Option<f64>,
    /// Index into `levers` driven by scheduled automated pulls
    pub pull_lever: usize,
    pub automated_pull: AutomatedPullParams,
    pub schedule: ScheduleConfig,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            transport: TransportKind::Serial,
            registry: RegistryConfig::default(),
            levers: vec![LeverConfig::default()],
            control_period_ms: 16,
            duration_secs: None,
            pull_lever: 0,
            automated_pull: AutomatedPullParams::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl RigConfig {
    /// Load from an optional TOML file, then apply `LEVER_RIG__*`
    /// environment overrides (nested keys separated by `__`).
    pub fn load(path: Option<&Path>) -> Result<Self, RigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: RigConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            "Loaded rig config: {} levers, {:?} transport",
            config.levers.len(),
            config.transport
        );
        Ok(config)
    }

    /// Reject settings the control loop cannot run with
    pub fn validate(&self) -> Result<(), RigError> {
        if self.levers.is_empty() {
            return Err(RigError::Invalid("at least one lever is required".to_string()));
        }
        if self.pull_lever >= self.levers.len() {
            return Err(RigError::Invalid(format!(
                "pull_lever {} out of range for {} levers",
                self.pull_lever,
                self.levers.len()
            )));
        }
        if self.control_period_ms == 0 {
            return Err(RigError::Invalid("control_period_ms must be positive".to_string()));
        }
        if let Some(secs) = self.duration_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(RigError::Invalid(format!(
                    "duration_secs must be a finite, non-negative number, got {}",
                    secs
                )));
            }
        }

        let pull = &self.automated_pull;
        let pull_fields = [
            ("force_slope_g_s", pull.force_slope_g_s),
            ("force_target_low", pull.force_target_low),
            ("force_target_high", pull.force_target_high),
            ("force_transition_timeout_s", pull.force_transition_timeout_s),
        ];
        for (name, value) in pull_fields {
            if !value.is_finite() {
                return Err(RigError::Invalid(format!("automated_pull.{} must be finite", name)));
            }
        }

        let schedule = &self.schedule;
        let mut schedule_fields = vec![
            ("interval_s", schedule.interval_s),
            ("mean_interval_s", schedule.mean_interval_s),
            ("min_interval_s", schedule.min_interval_s),
            ("max_interval_s", schedule.max_interval_s),
        ];
        if let Some(epoch) = &schedule.epoch {
            schedule_fields.push(("epoch.active_s", epoch.active_s));
            schedule_fields.push(("epoch.downtime_s", epoch.downtime_s));
        }
        for (name, value) in schedule_fields {
            if !value.is_finite() {
                return Err(RigError::Invalid(format!("schedule.{} must be finite", name)));
            }
        }

        for (i, lever) in self.levers.iter().enumerate() {
            if lever.thresholds.rising_edge <= lever.thresholds.falling_edge {
                return Err(RigError::Invalid(format!(
                    "lever {}: rising_edge must be above falling_edge",
                    i
                )));
            }
        }
        Ok(())
    }

    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }

    /// Run duration, if bounded. Lengths too large to represent saturate.
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs
            .filter(|s| *s >= 0.0)
            .map(|s| Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX))
    }
}
