//! Engine wiring
//!
//! [`PathEngine`] owns the three components and closes the feedback loop:
//! the controller reads the monitor through [`MetricsView`] and writes the
//! classifier through [`PathSink`], nothing else touches either side.
//!
//! [`MetricsView`]: crate::monitor::MetricsView
//! [`PathSink`]: crate::classifier::PathSink

use crate::classifier::{PathSink, TrafficClassifier};
use crate::config::EngineConfig;
use crate::controller::PolicyController;
use crate::monitor::PathMetricsMonitor;
use crate::policy::PolicyRule;
use pbr_common::{FlowRecord, PathError, PathId, PathResult, SimTime, TrafficClass};
use pbr_sched::Scheduler;
use tracing::info;

/// World type the periodic engine tasks run against
pub trait EngineHost: 'static {
    /// The engine inside the world
    fn engine(&mut self) -> &mut PathEngine;

    /// Current per-flow statistics, consumed by the bandwidth refresh
    fn flow_snapshot(&mut self) -> Vec<FlowRecord> {
        Vec::new()
    }
}

/// Policy-based path selection engine
#[derive(Debug, Default)]
pub struct PathEngine {
    /// Path Metrics Monitor
    pub monitor: PathMetricsMonitor,
    /// Traffic Classifier
    pub classifier: TrafficClassifier,
    /// Policy Controller
    pub controller: PolicyController,
}

impl PathEngine {
    /// Create engine with default configuration and no policies
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a validated configuration, registering its policies
    pub fn from_config(config: EngineConfig) -> PathResult<Self> {
        config.validate()?;

        let mut engine = Self {
            classifier: TrafficClassifier::new(&config.classifier),
            controller: PolicyController::new(&config.controller),
            monitor: PathMetricsMonitor::new(config.monitor),
        };
        for p in &config.controller.policies {
            let rule = PolicyRule::new(p.class, p.latency_threshold_ms, p.primary, p.secondary)
                .with_bandwidth_threshold(p.bandwidth_threshold_mbps);
            engine.register(rule)?;
        }

        Ok(engine)
    }

    /// Register a policy after checking its paths are tracked
    pub fn add_policy(
        &mut self,
        class: TrafficClass,
        latency_threshold_ms: f64,
        primary: PathId,
        secondary: PathId,
    ) -> PathResult<()> {
        self.register(PolicyRule::new(class, latency_threshold_ms, primary, secondary))
    }

    fn register(&mut self, rule: PolicyRule) -> PathResult<()> {
        rule.validate()?;
        for path in [rule.primary, rule.secondary] {
            if !self.monitor.is_tracked(path) {
                return Err(PathError::UnknownPath(path));
            }
        }

        self.controller.insert(rule);
        self.classifier.update_active_path(rule.class, rule.primary);
        Ok(())
    }

    /// One evaluation cycle. Returns the number of switches applied.
    pub fn evaluate(&mut self, now: SimTime) -> usize {
        let applied = self.controller.evaluate(now, &self.monitor, &mut self.classifier);
        if self.controller.report_due() {
            info!("\n{}", self.monitor.report(now));
        }
        applied
    }

    /// Start the bandwidth refresh and the policy evaluation. The refresh is
    /// scheduled first so that when both fall on the same tick the metrics
    /// are updated before the policies read them.
    pub fn start<W: EngineHost>(&mut self, sched: &mut Scheduler<W>) -> PathResult<()> {
        if self.controller.is_running(sched) {
            return Err(PathError::AlreadyStarted);
        }
        self.monitor.start_refresh(sched);
        self.controller.start(sched)
    }

    /// Cancel both periodic tasks
    pub fn stop<W>(&mut self, sched: &mut Scheduler<W>) {
        self.controller.stop(sched);
        self.monitor.stop_refresh(sched);
    }
}

impl EngineHost for PathEngine {
    fn engine(&mut self) -> &mut PathEngine {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use pbr_common::{FlowId, FlowKey, FlowStats, PROTO_UDP};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn ms(v: u64) -> SimTime {
        SimTime::from_millis(v)
    }

    /// Feed `n` samples of `delay_ms` on `path`
    fn samples(engine: &mut PathEngine, path: u32, delay_ms: u64, n: u64, base_id: u64) {
        for i in 0..n {
            let id = base_id + i;
            engine.monitor.record_send(id, PathId(path), ms(i));
            engine.monitor.record_receive(id, PathId(path), ms(i + delay_ms));
        }
    }

    #[test]
    fn test_from_config_registers_policies() {
        let engine = PathEngine::from_config(EngineConfig::default()).unwrap();
        let video = engine.controller.policy(TrafficClass::Video).copied();
        assert_eq!(video.map(|p| p.primary), Some(PathId(1)));
        assert_eq!(video.map(|p| p.bandwidth_threshold_mbps), Some(5.0));
        assert_eq!(engine.classifier.active_path(TrafficClass::Video), PathId(1));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = EngineConfig::default();
        config.controller.policies.push(PolicyConfig {
            class: TrafficClass::Data,
            latency_threshold_ms: 40.0,
            bandwidth_threshold_mbps: 5.0,
            primary: PathId(2),
            secondary: PathId(2),
        });
        assert!(matches!(PathEngine::from_config(config), Err(PathError::InvalidPolicy(_))));
    }

    #[test]
    fn test_add_policy_validation() {
        let mut engine = PathEngine::new();
        assert!(matches!(
            engine.add_policy(TrafficClass::Video, 30.0, PathId(1), PathId(9)),
            Err(PathError::UnknownPath(PathId(9)))
        ));
        assert!(engine.add_policy(TrafficClass::Video, 0.0, PathId(1), PathId(2)).is_err());
        assert!(engine.controller.policies().is_empty());

        engine.add_policy(TrafficClass::Data, 50.0, PathId(3), PathId(4)).unwrap();
        assert_eq!(engine.classifier.active_path(TrafficClass::Data), PathId(3));
    }

    #[test]
    fn test_scenarios_through_monitor() {
        let mut engine = PathEngine::new();
        engine.add_policy(TrafficClass::Video, 30.0, PathId(1), PathId(2)).unwrap();

        samples(&mut engine, 1, 10, 100, 0);
        samples(&mut engine, 2, 15, 100, 1_000);
        assert_eq!(engine.evaluate(ms(1000)), 0);

        // A: P1 at 50ms, P2 at 15ms
        samples(&mut engine, 1, 50, 100, 2_000);
        assert!((engine.monitor.latency(PathId(1)) - 50.0).abs() < 1e-9);
        assert_eq!(engine.evaluate(ms(2000)), 1);
        assert_eq!(engine.controller.switch_count(), 1);
        assert_eq!(engine.classifier.active_path(TrafficClass::Video), PathId(2));

        // B: P1 back to 18ms
        samples(&mut engine, 1, 18, 100, 3_000);
        assert_eq!(engine.evaluate(ms(3000)), 1);
        assert_eq!(engine.controller.switch_count(), 2);
        assert_eq!(engine.classifier.active_path(TrafficClass::Video), PathId(1));

        // C: P1 at 35ms, P2 at 32ms
        samples(&mut engine, 1, 35, 100, 4_000);
        samples(&mut engine, 2, 32, 100, 5_000);
        assert_eq!(engine.evaluate(ms(4000)), 0);
        assert_eq!(engine.classifier.active_path(TrafficClass::Video), PathId(1));

        // D: unmatched receive
        let before = engine.monitor.metrics(PathId(1));
        engine.monitor.record_receive(99_999, PathId(1), ms(5000));
        assert_eq!(engine.monitor.metrics(PathId(1)), before);
        assert_eq!(engine.controller.switch_count(), 2);
    }

    #[test]
    fn test_start_twice_errors() {
        let mut engine = PathEngine::new();
        let mut sched: Scheduler<PathEngine> = Scheduler::new();
        engine.start(&mut sched).unwrap();
        let pending = sched.pending_count();
        assert!(matches!(engine.start(&mut sched), Err(PathError::AlreadyStarted)));
        assert_eq!(sched.pending_count(), pending);
    }

    #[test]
    fn test_stop_cancels_both_tasks() {
        let mut engine = PathEngine::new();
        let mut sched: Scheduler<PathEngine> = Scheduler::new();
        engine.stop(&mut sched);
        engine.start(&mut sched).unwrap();
        assert_eq!(sched.pending_count(), 2);

        engine.stop(&mut sched);
        assert_eq!(sched.pending_count(), 0);
        sched.run(&mut engine);
        assert_eq!(engine.controller.evaluations(), 0);
    }

    /// World recording the order of refresh and evaluation on a shared tick
    struct Host {
        engine: PathEngine,
        flows: Vec<FlowRecord>,
    }

    impl EngineHost for Host {
        fn engine(&mut self) -> &mut PathEngine {
            &mut self.engine
        }

        fn flow_snapshot(&mut self) -> Vec<FlowRecord> {
            self.flows.clone()
        }
    }

    #[test]
    fn test_refresh_runs_before_evaluation() {
        let mut config = EngineConfig::default();
        config.monitor.refresh_start_ms = 1000;
        let mut host = Host {
            engine: PathEngine::from_config(config).unwrap(),
            flows: vec![FlowRecord {
                id: FlowId(1),
                key: FlowKey::new(
                    Ipv4Addr::new(10, 1, 1, 1),
                    Ipv4Addr::new(10, 1, 2, 2),
                    49153,
                    5004,
                    PROTO_UDP,
                ),
                stats: FlowStats {
                    tx_packets: 100,
                    rx_packets: 100,
                    rx_bytes: 125_000,
                    delay_sum: Duration::from_millis(1000),
                    time_first_tx: ms(0),
                    time_last_rx: ms(1000),
                    ..Default::default()
                },
            }],
        };

        let mut sched: Scheduler<Host> = Scheduler::new();
        host.engine.start(&mut sched).unwrap();
        // Both tasks are due at 1s; only the refresh may run first
        sched.step(&mut host);
        assert_eq!(sched.now(), ms(1000));
        assert!((host.engine.monitor.bandwidth(PathId(1)) - 1.0).abs() < 1e-9);
        assert_eq!(host.engine.controller.evaluations(), 0);

        sched.step(&mut host);
        assert_eq!(host.engine.controller.evaluations(), 1);
    }
}
