//! Policy rules and the hysteresis decision
//!
//! Per class, two states:
//!
//! ```text
//!              primary > threshold && secondary < primary * degrade
//!   ON_PRIMARY ────────────────────────────────────────────────────▶ ON_SECONDARY
//!              ◀────────────────────────────────────────────────────
//!                        primary < threshold * recovery
//! ```
//!
//! The margin to leave the primary differs from the margin to return,
//! which keeps noisy latency from flapping the class between paths.

use pbr_common::{PathError, PathId, PathResult, TrafficClass};
use serde::{Deserialize, Serialize};

/// Default bandwidth floor for new rules (Mbps)
pub const DEFAULT_BANDWIDTH_THRESHOLD_MBPS: f64 = 5.0;

/// Per-class switching rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PolicyRule {
    /// Governed class
    pub class: TrafficClass,
    /// Degradation trigger (ms)
    pub latency_threshold_ms: f64,
    /// Bandwidth floor (Mbps), reported alongside decisions
    pub bandwidth_threshold_mbps: f64,
    /// Preferred path
    pub primary: PathId,
    /// Fallback path
    pub secondary: PathId,
    /// Path currently in use, always `primary` or `secondary`
    current: PathId,
    /// Set once `current` has been pushed to a path sink
    #[serde(skip)]
    pub(crate) announced: bool,
}

impl PolicyRule {
    /// Create rule starting on the primary path
    pub fn new(class: TrafficClass, latency_threshold_ms: f64, primary: PathId, secondary: PathId) -> Self {
        Self {
            class,
            latency_threshold_ms,
            bandwidth_threshold_mbps: DEFAULT_BANDWIDTH_THRESHOLD_MBPS,
            primary,
            secondary,
            current: primary,
            announced: false,
        }
    }

    /// Override the bandwidth floor
    pub fn with_bandwidth_threshold(mut self, mbps: f64) -> Self {
        self.bandwidth_threshold_mbps = mbps;
        self
    }

    /// Path currently in use
    pub fn current(&self) -> PathId {
        self.current
    }

    /// Current state
    pub fn state(&self) -> PathState {
        if self.current == self.primary {
            PathState::OnPrimary
        } else {
            PathState::OnSecondary
        }
    }

    /// Move to the path implied by `decision`, returning the new path
    pub(crate) fn apply(&mut self, decision: Decision) -> Option<PathId> {
        let next = match decision {
            Decision::Stay => return None,
            Decision::SwitchToSecondary => self.secondary,
            Decision::ReturnToPrimary => self.primary,
        };
        self.current = next;
        Some(next)
    }

    /// Check the rule is usable
    pub fn validate(&self) -> PathResult<()> {
        if self.primary == self.secondary {
            return Err(PathError::InvalidPolicy(format!(
                "{}: primary and secondary are both {}",
                self.class, self.primary
            )));
        }
        if !(self.latency_threshold_ms.is_finite() && self.latency_threshold_ms > 0.0) {
            return Err(PathError::InvalidPolicy(format!(
                "{}: latency threshold must be positive, got {}",
                self.class, self.latency_threshold_ms
            )));
        }
        Ok(())
    }
}

/// Which path of the pair a class is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathState {
    /// Using the primary path
    OnPrimary,
    /// Using the secondary path
    OnSecondary,
}

/// Path quality read for one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observation {
    /// Primary latency (ms)
    pub primary_latency_ms: f64,
    /// Secondary latency (ms)
    pub secondary_latency_ms: f64,
    /// Primary bandwidth (Mbps)
    pub primary_bandwidth_mbps: f64,
    /// Secondary bandwidth (Mbps)
    pub secondary_bandwidth_mbps: f64,
}

/// Outcome of evaluating one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep the current path
    Stay,
    /// Primary degraded and secondary meaningfully better
    SwitchToSecondary,
    /// Primary recovered with margin
    ReturnToPrimary,
}

/// Hysteresis margins
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hysteresis {
    /// Secondary latency must be below primary latency times this
    pub degrade_margin: f64,
    /// Primary latency must be below threshold times this to return
    pub recovery_margin: f64,
}

impl Hysteresis {
    /// Decide the transition for `rule` given `obs`
    #[inline]
    pub fn decide(&self, rule: &PolicyRule, obs: &Observation) -> Decision {
        match rule.state() {
            PathState::OnPrimary => {
                if obs.primary_latency_ms > rule.latency_threshold_ms
                    && obs.secondary_latency_ms < obs.primary_latency_ms * self.degrade_margin
                {
                    Decision::SwitchToSecondary
                } else {
                    Decision::Stay
                }
            }
            PathState::OnSecondary => {
                if obs.primary_latency_ms < rule.latency_threshold_ms * self.recovery_margin {
                    Decision::ReturnToPrimary
                } else {
                    Decision::Stay
                }
            }
        }
    }
}

impl Default for Hysteresis {
    fn default() -> Self {
        Self {
            degrade_margin: 0.8,
            recovery_margin: 0.7,
        }
    }
}
