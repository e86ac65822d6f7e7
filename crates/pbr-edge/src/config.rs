//! Scenario Configuration

use pbr_common::{PathError, PathId, PathResult, TrafficClass, PROTO_TCP, PROTO_UDP};
use pbr_path::config::ClassPath;
use pbr_path::EngineConfig;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Longest accepted run time, delay or event time (one day, in ms)
pub const MAX_SCENARIO_MS: u64 = 86_400_000;

/// Edge scenario configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Path selection engine settings
    pub engine: EngineConfig,
    /// Egress links
    pub links: Vec<LinkConfig>,
    /// Traffic sources
    pub sources: Vec<SourceConfig>,
    /// Scheduled link delay changes
    pub link_events: Vec<LinkEvent>,
    /// Virtual run time (ms)
    pub duration_ms: u64,
}

impl ScenarioConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> PathResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject scenarios that cannot run
    pub fn validate(&self) -> PathResult<()> {
        self.engine.validate()?;
        check_time("duration_ms", self.duration_ms)?;
        for source in &self.sources {
            if source.interval_ms == 0 {
                return Err(PathError::Config(format!("source {}: interval_ms must be positive", source.name)));
            }
            check_time(&format!("source {}: interval_ms", source.name), source.interval_ms)?;
            check_time(&format!("source {}: start_ms", source.name), source.start_ms)?;
        }
        for link in &self.links {
            check_delay(&format!("link {}", link.path), link.delay_ms)?;
        }
        for event in &self.link_events {
            if !self.links.iter().any(|l| l.path == event.path) {
                return Err(PathError::UnknownPath(event.path));
            }
            check_time(&format!("event on {}: at_ms", event.path), event.at_ms)?;
            check_delay(&format!("event on {}", event.path), event.delay_ms)?;
        }
        Ok(())
    }

    /// Virtual run time
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let mut engine = EngineConfig::default();
        // Probe traffic keeps the primary measured while video is away
        engine.classifier.initial_paths.push(ClassPath {
            class: TrafficClass::Default,
            path: PathId(1),
        });

        let studio = Ipv4Addr::new(10, 1, 1, 1);
        let cloud = Ipv4Addr::new(10, 1, 2, 2);

        Self {
            engine,
            links: vec![
                LinkConfig { path: PathId(1), delay_ms: 10.0 },
                LinkConfig { path: PathId(2), delay_ms: 15.0 },
            ],
            sources: vec![
                SourceConfig {
                    name: "video".into(),
                    src_ip: studio,
                    dst_ip: cloud,
                    src_port: 49153,
                    dst_port: 5004,
                    protocol: PROTO_UDP,
                    dscp: 46,
                    payload_bytes: 160,
                    interval_ms: 20,
                    start_ms: 2_000,
                },
                SourceConfig {
                    name: "bulk".into(),
                    src_ip: studio,
                    dst_ip: cloud,
                    src_port: 49154,
                    dst_port: 9,
                    protocol: PROTO_TCP,
                    dscp: 0,
                    payload_bytes: 1460,
                    interval_ms: 10,
                    start_ms: 3_000,
                },
                SourceConfig {
                    name: "probe".into(),
                    src_ip: studio,
                    dst_ip: cloud,
                    src_port: 49155,
                    dst_port: 7,
                    protocol: PROTO_UDP,
                    dscp: 26,
                    payload_bytes: 32,
                    interval_ms: 50,
                    start_ms: 1_000,
                },
            ],
            link_events: vec![
                LinkEvent { at_ms: 10_000, path: PathId(1), delay_ms: 50.0 },
                LinkEvent { at_ms: 18_000, path: PathId(1), delay_ms: 10.0 },
            ],
            duration_ms: 30_000,
        }
    }
}

fn check_time(what: &str, ms: u64) -> PathResult<()> {
    if ms > MAX_SCENARIO_MS {
        return Err(PathError::Config(format!("{what} must be at most {MAX_SCENARIO_MS}, got {ms}")));
    }
    Ok(())
}

fn check_delay(what: &str, delay_ms: f64) -> PathResult<()> {
    if !(delay_ms.is_finite() && delay_ms >= 0.0 && delay_ms <= MAX_SCENARIO_MS as f64) {
        return Err(PathError::Config(format!(
            "{what}: delay_ms must be within [0, {MAX_SCENARIO_MS}], got {delay_ms}"
        )));
    }
    Ok(())
}

/// One egress link
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Path identifier
    pub path: PathId,
    /// One-way delay (ms)
    pub delay_ms: f64,
}

/// Delay change applied at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkEvent {
    /// When to apply (ms)
    pub at_ms: u64,
    /// Affected link
    pub path: PathId,
    /// New one-way delay (ms)
    pub delay_ms: f64,
}

/// Constant bit-rate packet source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Label used in logs
    pub name: String,
    /// Source address
    pub src_ip: Ipv4Addr,
    /// Destination address
    pub dst_ip: Ipv4Addr,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// IP protocol
    pub protocol: u8,
    /// DSCP marking
    pub dscp: u8,
    /// Application payload per packet
    pub payload_bytes: usize,
    /// Inter-packet gap (ms)
    pub interval_ms: u64,
    /// First packet time (ms)
    pub start_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        let config = ScenarioConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.duration(), Duration::from_secs(30));
        assert_eq!(config.sources.len(), 3);
    }

    #[test]
    fn test_rejects_event_on_missing_link() {
        let mut config = ScenarioConfig::default();
        config.link_events.push(LinkEvent { at_ms: 1, path: PathId(4), delay_ms: 1.0 });
        assert!(matches!(config.validate(), Err(PathError::UnknownPath(PathId(4)))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut config = ScenarioConfig::default();
        config.sources[0].interval_ms = 0;
        assert!(matches!(config.validate(), Err(PathError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_delays() {
        for bad in [1e300, -1.0, f64::NAN, f64::INFINITY] {
            let mut config = ScenarioConfig::default();
            config.links[0].delay_ms = bad;
            assert!(matches!(config.validate(), Err(PathError::Config(_))), "link delay {bad}");

            let mut config = ScenarioConfig::default();
            config.link_events[0].delay_ms = bad;
            assert!(matches!(config.validate(), Err(PathError::Config(_))), "event delay {bad}");
        }
    }

    #[test]
    fn test_rejects_out_of_range_times() {
        let mut config = ScenarioConfig::default();
        config.duration_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(PathError::Config(_))));

        let mut config = ScenarioConfig::default();
        config.sources[1].start_ms = MAX_SCENARIO_MS + 1;
        assert!(matches!(config.validate(), Err(PathError::Config(_))));

        let mut config = ScenarioConfig::default();
        config.link_events[1].at_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(PathError::Config(_))));

        let mut config = ScenarioConfig::default();
        config.duration_ms = MAX_SCENARIO_MS;
        config.links[1].delay_ms = MAX_SCENARIO_MS as f64;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_overrides() {
        let json = r#"{ "duration_ms": 5000, "links": [{ "path": 1, "delay_ms": 3.0 }] }"#;
        let config: ScenarioConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.duration_ms, 5000);
        assert_eq!(config.links.len(), 1);
        assert_eq!(config.sources.len(), 3);
    }
}
