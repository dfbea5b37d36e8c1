//! Lever Pull
//!
//! Single-threaded state machines driven by the task thread once per tick:
//! - Hysteresis pull detection on a normalized lever position
//! - Automated pull sequencing with ramped force for self-test
//! - Mapping of raw potentiometer readings into [0, 1]

pub mod automated;
pub mod detector;
pub mod normalize;

pub use automated::{AutomatedPull, AutomatedPullParams, AutomatedPullResult, ForceTransitionState, PullPhase};
pub use detector::{PullDetector, PullEdge, PullThresholds};
pub use normalize::PositionRange;
