//! Hysteresis pull detection

use serde::{Deserialize, Serialize};

/// Edge reported by [`PullDetector::detect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullEdge {
    /// Position rose above the rising edge
    Pulled,
    /// Position fell below the falling edge
    Released,
}

/// Detection thresholds on the normalized position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullThresholds {
    pub rising_edge: f32,
    pub falling_edge: f32,
}

impl Default for PullThresholds {
    fn default() -> Self {
        Self {
            rising_edge: 0.5,
            falling_edge: 0.2,
        }
    }
}

/// Two-threshold pull detector.
///
/// The band between the falling and rising edges absorbs jitter, so a
/// position hovering around either threshold yields a single edge.
#[derive(Debug, Clone)]
pub struct PullDetector {
    is_high: bool,
    rising_edge: f32,
    falling_edge: f32,
}

impl PullDetector {
    /// Create a detector in the released state
    pub fn new(thresholds: PullThresholds) -> Self {
        assert!(
            thresholds.rising_edge > thresholds.falling_edge,
            "Rising edge must be above falling edge"
        );
        Self {
            is_high: false,
            rising_edge: thresholds.rising_edge,
            falling_edge: thresholds.falling_edge,
        }
    }

    /// Feed one position sample. At most one edge fires per call.
    pub fn detect(&mut self, position: f32) -> Option<PullEdge> {
        if self.is_high && position < self.falling_edge {
            self.is_high = false;
            Some(PullEdge::Released)
        } else if !self.is_high && position > self.rising_edge {
            self.is_high = true;
            Some(PullEdge::Pulled)
        } else {
            None
        }
    }

    /// Lever is currently considered pulled
    pub fn is_high(&self) -> bool {
        self.is_high
    }

    /// Return to the released state
    pub fn reset(&mut self) {
        self.is_high = false;
    }
}

impl Default for PullDetector {
    fn default() -> Self {
        Self::new(PullThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pull_then_release() {
        let mut detector = PullDetector::new(PullThresholds {
            rising_edge: 0.5,
            falling_edge: 0.2,
        });

        let events: Vec<_> = [0.0, 0.6, 0.6, 0.1]
            .into_iter()
            .map(|p| detector.detect(p))
            .collect();

        assert_eq!(
            events,
            vec![None, Some(PullEdge::Pulled), None, Some(PullEdge::Released)]
        );
    }

    #[test]
    fn test_jitter_inside_band_is_ignored() {
        let mut detector = PullDetector::default();
        assert_eq!(detector.detect(0.55), Some(PullEdge::Pulled));

        // Dipping below the rising edge but not the falling edge
        for p in [0.45, 0.51, 0.3, 0.49, 0.21] {
            assert_eq!(detector.detect(p), None);
        }
        assert!(detector.is_high());
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let mut detector = PullDetector::default();
        assert_eq!(detector.detect(0.5), None);
        assert_eq!(detector.detect(0.51), Some(PullEdge::Pulled));
        assert_eq!(detector.detect(0.2), None);
        assert_eq!(detector.detect(0.19), Some(PullEdge::Released));
    }

    #[test]
    #[should_panic(expected = "Rising edge must be above falling edge")]
    fn test_inverted_thresholds_rejected() {
        PullDetector::new(PullThresholds {
            rising_edge: 0.2,
            falling_edge: 0.5,
        });
    }

    proptest! {
        #[test]
        fn prop_edges_alternate(positions in prop::collection::vec(-0.5f32..1.5, 0..200)) {
            let mut detector = PullDetector::default();
            let mut last = PullEdge::Released;

            for p in positions {
                if let Some(edge) = detector.detect(p) {
                    prop_assert_ne!(edge, last);
                    last = edge;
                }
                prop_assert_eq!(detector.is_high(), last == PullEdge::Pulled);
            }
        }
    }
}
