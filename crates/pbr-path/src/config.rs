//! Engine Configuration

use pbr_common::{PathError, PathId, PathResult, TrafficClass};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path metrics monitor settings
    pub monitor: MonitorConfig,
    /// Traffic classifier settings
    pub classifier: ClassifierConfig,
    /// Policy controller settings
    pub controller: ControllerConfig,
}

impl EngineConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> PathResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: impl AsRef<Path>) -> PathResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> PathResult<()> {
        let m = &self.monitor;
        if m.history_capacity == 0 {
            return Err(PathError::Config("history_capacity must be positive".into()));
        }
        if m.refresh_interval_ms == 0 {
            return Err(PathError::Config("refresh_interval_ms must be positive".into()));
        }
        if m.max_in_flight == 0 {
            return Err(PathError::Config("max_in_flight must be positive".into()));
        }

        let c = &self.controller;
        if c.evaluation_interval_ms == 0 {
            return Err(PathError::Config("evaluation_interval_ms must be positive".into()));
        }
        for (name, margin) in [("degrade_margin", c.degrade_margin), ("recovery_margin", c.recovery_margin)] {
            if !(margin > 0.0 && margin <= 1.0) {
                return Err(PathError::Config(format!("{name} must be in (0, 1], got {margin}")));
            }
        }

        for policy in &c.policies {
            for path in [policy.primary, policy.secondary] {
                if !m.tracked_paths.contains(&path) {
                    return Err(PathError::UnknownPath(path));
                }
            }
        }

        Ok(())
    }
}

/// Path metrics monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Paths known up front (reported even before traffic)
    pub tracked_paths: Vec<PathId>,
    /// Latency samples kept per path
    pub history_capacity: usize,
    /// Bandwidth refresh period
    pub refresh_interval_ms: u64,
    /// Delay before the first bandwidth refresh
    pub refresh_start_ms: u64,
    /// Destination ports whose throughput is attributed to `video_path`
    pub video_ports: Vec<u16>,
    /// Path credited with video flow throughput
    pub video_path: PathId,
    /// Path credited with all other flow throughput
    pub other_path: PathId,
    /// Upper bound on unmatched send records
    pub max_in_flight: usize,
    /// Send records older than this are dropped on refresh
    pub in_flight_timeout_ms: u64,
}

impl MonitorConfig {
    /// Bandwidth refresh period
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Delay before the first refresh
    pub fn refresh_start(&self) -> Duration {
        Duration::from_millis(self.refresh_start_ms)
    }

    /// In-flight record timeout
    pub fn in_flight_timeout(&self) -> Duration {
        Duration::from_millis(self.in_flight_timeout_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tracked_paths: (0..5).map(PathId).collect(),
            history_capacity: 100,
            refresh_interval_ms: 1000,
            refresh_start_ms: 2000,
            video_ports: vec![5004],
            video_path: PathId(1),
            other_path: PathId(2),
            max_in_flight: 65_536,
            in_flight_timeout_ms: 10_000,
        }
    }
}

/// Port to class table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortClass {
    /// Transport port
    pub port: u16,
    /// Class assigned on match
    pub class: TrafficClass,
}

/// Initial class to path assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPath {
    /// Traffic class
    pub class: TrafficClass,
    /// Egress path
    pub path: PathId,
}

/// Traffic classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Port matches, checked on destination then source port
    pub port_classes: Vec<PortClass>,
    /// DSCP classified as Video (EF)
    pub expedited_dscp: u8,
    /// DSCP classified as Data (BE)
    pub best_effort_dscp: u8,
    /// Mapping before any policy switch
    pub initial_paths: Vec<ClassPath>,
    /// Path returned for classes never assigned
    pub default_path: PathId,
    /// Emit a classification sample every N packets (0 disables)
    pub log_every: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            port_classes: vec![
                PortClass { port: 5004, class: TrafficClass::Video }, // RTP
                PortClass { port: 5005, class: TrafficClass::Video }, // RTCP
                PortClass { port: 21, class: TrafficClass::Data },    // FTP
                PortClass { port: 9, class: TrafficClass::Data },     // discard / bulk
            ],
            expedited_dscp: 46,
            best_effort_dscp: 0,
            initial_paths: vec![
                ClassPath { class: TrafficClass::Video, path: PathId(1) },
                ClassPath { class: TrafficClass::Data, path: PathId(2) },
            ],
            default_path: PathId(0),
            log_every: 100,
        }
    }
}

/// Per-class policy definition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Class governed by this policy
    pub class: TrafficClass,
    /// Primary latency above this triggers degradation checks (ms)
    pub latency_threshold_ms: f64,
    /// Bandwidth floor (Mbps)
    #[serde(default = "default_bandwidth_threshold")]
    pub bandwidth_threshold_mbps: f64,
    /// Preferred path
    pub primary: PathId,
    /// Fallback path
    pub secondary: PathId,
}

fn default_bandwidth_threshold() -> f64 {
    5.0
}

/// Policy controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Evaluation period
    pub evaluation_interval_ms: u64,
    /// Secondary must beat primary latency times this to switch away
    pub degrade_margin: f64,
    /// Primary must fall below threshold times this to switch back
    pub recovery_margin: f64,
    /// Emit a metrics report every N evaluations (0 disables)
    pub report_every: u64,
    /// Switch events retained
    pub switch_log_capacity: usize,
    /// Policies registered at startup, in evaluation order
    pub policies: Vec<PolicyConfig>,
}

impl ControllerConfig {
    /// Evaluation period
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_ms: 1000,
            degrade_margin: 0.8,
            recovery_margin: 0.7,
            report_every: 5,
            switch_log_capacity: 64,
            policies: vec![PolicyConfig {
                class: TrafficClass::Video,
                latency_threshold_ms: 30.0,
                bandwidth_threshold_mbps: default_bandwidth_threshold(),
                primary: PathId(1),
                secondary: PathId(2),
            }],
        }
    }
}
