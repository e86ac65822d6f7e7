//! Path Metrics Monitor
//!
//! Turns per-packet send/receive events and periodic flow statistics into a
//! latency and bandwidth estimate per physical path.
//!
//! # Latency
//!
//! Each matched send/receive pair yields one sample. The last
//! `history_capacity` samples per path are kept (oldest evicted first) and
//! their arithmetic mean is the path latency.
//!
//! # Bandwidth
//!
//! On every refresh the receive throughput of each flow is credited to a path
//! picked by destination port: video ports to the video path, everything else
//! to the other path.

use crate::config::MonitorConfig;
use crate::engine::EngineHost;
use pbr_common::{FlowRecord, PathId, SimTime};
use pbr_sched::{Scheduler, TaskHandle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Read access to current path quality
pub trait MetricsView {
    /// Smoothed latency in milliseconds, 0.0 for unknown paths
    fn latency_ms(&self, path: PathId) -> f64;

    /// Estimated bandwidth in Mbps, 0.0 for unknown paths
    fn bandwidth_mbps(&self, path: PathId) -> f64;
}

/// Current estimate for one path
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PathMetrics {
    /// Mean latency over the sample history (ms)
    pub latency_ms: f64,
    /// Receive throughput attributed to this path (Mbps)
    pub bandwidth_mbps: f64,
    /// Packets sent
    pub packets_sent: u64,
    /// Packets received with a matching send record
    pub packets_received: u64,
    /// Time of the last latency sample
    pub last_update: SimTime,
}

#[derive(Debug, Default)]
struct PathState {
    metrics: PathMetrics,
    history: VecDeque<f64>,
}

impl PathState {
    fn push_sample(&mut self, latency_ms: f64, capacity: usize) {
        self.history.push_back(latency_ms);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
        self.metrics.latency_ms = self.history.iter().sum::<f64>() / self.history.len() as f64;
    }
}

/// Path metrics monitor
#[derive(Debug)]
pub struct PathMetricsMonitor {
    config: MonitorConfig,
    paths: BTreeMap<PathId, PathState>,
    /// Packet id -> send time
    in_flight: HashMap<u64, SimTime>,
    /// Send records ordered oldest first
    send_order: BTreeSet<(SimTime, u64)>,
    evicted: u64,
    pending_refresh: Option<TaskHandle>,
}

impl PathMetricsMonitor {
    /// Create monitor with zeroed metrics for every tracked path. History
    /// and in-flight capacities below one are raised to one.
    pub fn new(mut config: MonitorConfig) -> Self {
        config.history_capacity = config.history_capacity.max(1);
        config.max_in_flight = config.max_in_flight.max(1);

        let paths = config
            .tracked_paths
            .iter()
            .map(|&path| (path, PathState::default()))
            .collect();

        Self {
            config,
            paths,
            in_flight: HashMap::new(),
            send_order: BTreeSet::new(),
            evicted: 0,
            pending_refresh: None,
        }
    }

    /// Record a packet leaving on `path`
    pub fn record_send(&mut self, packet_id: u64, path: PathId, now: SimTime) {
        if let Some(previous) = self.in_flight.insert(packet_id, now) {
            self.send_order.remove(&(previous, packet_id));
        }
        self.send_order.insert((now, packet_id));
        self.paths.entry(path).or_default().metrics.packets_sent += 1;

        while self.in_flight.len() > self.config.max_in_flight {
            let Some((sent_at, id)) = self.send_order.pop_first() else {
                break;
            };
            self.in_flight.remove(&id);
            self.evicted += 1;
            debug!(packet_id = id, %sent_at, "in-flight record evicted at capacity");
        }
    }

    /// Record a packet arriving on `path`. Packets without a send record are
    /// ignored.
    pub fn record_receive(&mut self, packet_id: u64, path: PathId, now: SimTime) {
        let Some(sent_at) = self.in_flight.remove(&packet_id) else {
            return;
        };
        self.send_order.remove(&(sent_at, packet_id));

        let latency_ms = now.saturating_since(sent_at).as_secs_f64() * 1e3;
        let capacity = self.config.history_capacity;
        let state = self.paths.entry(path).or_default();
        state.push_sample(latency_ms, capacity);
        state.metrics.packets_received += 1;
        state.metrics.last_update = now;
    }

    /// Recompute bandwidth from a flow statistics snapshot and drop stale
    /// send records
    pub fn refresh_bandwidth(&mut self, flows: &[FlowRecord], now: SimTime) {
        self.purge_in_flight(now);

        for flow in flows {
            let Some(mbps) = flow.stats.throughput_mbps() else {
                continue;
            };
            let path = self.path_for_port(flow.key.dst_port);
            self.paths.entry(path).or_default().metrics.bandwidth_mbps = mbps;
        }
    }

    fn path_for_port(&self, dst_port: u16) -> PathId {
        if self.config.video_ports.contains(&dst_port) {
            self.config.video_path
        } else {
            self.config.other_path
        }
    }

    fn purge_in_flight(&mut self, now: SimTime) {
        let timeout = self.config.in_flight_timeout();
        let mut purged = 0u64;

        while let Some(&(sent_at, id)) = self.send_order.first() {
            if now.saturating_since(sent_at) <= timeout {
                break;
            }
            self.send_order.pop_first();
            self.in_flight.remove(&id);
            purged += 1;
        }

        if purged > 0 {
            self.evicted += purged;
            warn!(purged, "dropped send records without a matching receive");
        }
    }

    /// Latency estimate, 0.0 if unknown
    pub fn latency(&self, path: PathId) -> f64 {
        self.paths.get(&path).map(|s| s.metrics.latency_ms).unwrap_or(0.0)
    }

    /// Bandwidth estimate, 0.0 if unknown
    pub fn bandwidth(&self, path: PathId) -> f64 {
        self.paths.get(&path).map(|s| s.metrics.bandwidth_mbps).unwrap_or(0.0)
    }

    /// Full metrics for a path, zeroed if unknown
    pub fn metrics(&self, path: PathId) -> PathMetrics {
        self.paths.get(&path).map(|s| s.metrics).unwrap_or_default()
    }

    /// Whether the path has an entry
    pub fn is_tracked(&self, path: PathId) -> bool {
        self.paths.contains_key(&path)
    }

    /// Latency samples currently held for a path
    pub fn history_len(&self, path: PathId) -> usize {
        self.paths.get(&path).map(|s| s.history.len()).unwrap_or(0)
    }

    /// Send records awaiting a receive
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Send records dropped by capacity or timeout
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Monitor configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Snapshot of every path
    pub fn report(&self, at: SimTime) -> MetricsReport {
        MetricsReport {
            at,
            paths: self.paths.iter().map(|(&id, s)| (id, s.metrics)).collect(),
        }
    }

    /// Schedule the periodic bandwidth refresh
    pub fn start_refresh<W: EngineHost>(&mut self, sched: &mut Scheduler<W>) {
        if self.refresh_running(sched) {
            return;
        }
        let handle = sched.schedule_in(self.config.refresh_start(), refresh_tick::<W>);
        self.pending_refresh = Some(handle);
    }

    /// Cancel the periodic bandwidth refresh
    pub fn stop_refresh<W>(&mut self, sched: &mut Scheduler<W>) {
        if let Some(handle) = self.pending_refresh.take() {
            sched.cancel(handle);
        }
    }

    fn refresh_running<W>(&self, sched: &Scheduler<W>) -> bool {
        self.pending_refresh.is_some_and(|h| sched.is_pending(h))
    }
}

fn refresh_tick<W: EngineHost>(world: &mut W, sched: &mut Scheduler<W>) {
    let flows = world.flow_snapshot();
    let monitor = &mut world.engine().monitor;
    monitor.refresh_bandwidth(&flows, sched.now());

    let next = sched.schedule_in(monitor.config.refresh_interval(), refresh_tick::<W>);
    monitor.pending_refresh = Some(next);
}

impl MetricsView for PathMetricsMonitor {
    fn latency_ms(&self, path: PathId) -> f64 {
        self.latency(path)
    }

    fn bandwidth_mbps(&self, path: PathId) -> f64 {
        self.bandwidth(path)
    }
}

impl Default for PathMetricsMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// Point-in-time metrics of every path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Snapshot time
    pub at: SimTime,
    /// Metrics per path, ordered by path id
    pub paths: Vec<(PathId, PathMetrics)>,
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "path metrics at {}", self.at)?;
        writeln!(
            f,
            "{:<6} {:>12} {:>14} {:>10} {:>10}",
            "path", "latency(ms)", "bandwidth(Mbps)", "sent", "received"
        )?;
        for (path, m) in &self.paths {
            writeln!(
                f,
                "{:<6} {:>12.2} {:>14.3} {:>10} {:>10}",
                path.to_string(),
                m.latency_ms,
                m.bandwidth_mbps,
                m.packets_sent,
                m.packets_received
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbr_common::{FlowId, FlowKey, FlowStats, PROTO_UDP};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn ms(v: u64) -> SimTime {
        SimTime::from_millis(v)
    }

    #[test]
    fn test_latency_sample() {
        let mut monitor = PathMetricsMonitor::default();
        monitor.record_send(7, PathId(1), ms(1000));
        monitor.record_receive(7, PathId(1), ms(1012));

        let m = monitor.metrics(PathId(1));
        assert!((m.latency_ms - 12.0).abs() < 1e-9);
        assert_eq!(m.packets_sent, 1);
        assert_eq!(m.packets_received, 1);
        assert_eq!(m.last_update, ms(1012));
        assert_eq!(monitor.in_flight(), 0);
    }

    #[test]
    fn test_moving_average() {
        let mut monitor = PathMetricsMonitor::default();
        for (id, delay) in [(1u64, 10u64), (2, 20), (3, 30)] {
            monitor.record_send(id, PathId(1), ms(0));
            monitor.record_receive(id, PathId(1), ms(delay));
        }
        assert!((monitor.latency(PathId(1)) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_history_fifo_eviction() {
        let mut monitor = PathMetricsMonitor::default();

        // 100 samples of 50ms, then 100 of 10ms: the 50ms samples age out
        for id in 0..200u64 {
            let delay = if id < 100 { 50 } else { 10 };
            monitor.record_send(id, PathId(1), ms(id * 100));
            monitor.record_receive(id, PathId(1), ms(id * 100 + delay));
            assert!(monitor.history_len(PathId(1)) <= 100);
        }

        assert_eq!(monitor.history_len(PathId(1)), 100);
        assert!((monitor.latency(PathId(1)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_history_evicts_oldest_first() {
        let mut config = MonitorConfig::default();
        config.history_capacity = 3;
        let mut monitor = PathMetricsMonitor::new(config);

        for (id, delay) in [(1u64, 100u64), (2, 10), (3, 10), (4, 10)] {
            monitor.record_send(id, PathId(2), ms(0));
            monitor.record_receive(id, PathId(2), ms(delay));
        }
        // The 100ms sample was first in, first out
        assert!((monitor.latency(PathId(2)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_capacities_are_clamped() {
        let mut config = MonitorConfig::default();
        config.history_capacity = 0;
        config.max_in_flight = 0;
        let mut monitor = PathMetricsMonitor::new(config);

        monitor.record_send(1, PathId(1), ms(0));
        assert_eq!(monitor.in_flight(), 1);
        monitor.record_receive(1, PathId(1), ms(10));

        let latency = monitor.latency(PathId(1));
        assert!(!latency.is_nan());
        assert!((latency - 10.0).abs() < 1e-9);
        assert_eq!(monitor.history_len(PathId(1)), 1);
        assert_eq!(monitor.config().history_capacity, 1);
    }

    #[test]
    fn test_receive_without_send_is_noop() {
        let mut monitor = PathMetricsMonitor::default();
        monitor.record_receive(42, PathId(1), ms(500));

        assert_eq!(monitor.metrics(PathId(1)), PathMetrics::default());
        assert_eq!(monitor.history_len(PathId(1)), 0);
    }

    #[test]
    fn test_duplicate_send_replaces_timestamp() {
        let mut monitor = PathMetricsMonitor::default();
        monitor.record_send(5, PathId(1), ms(0));
        monitor.record_send(5, PathId(1), ms(40));
        monitor.record_receive(5, PathId(1), ms(50));

        assert!((monitor.latency(PathId(1)) - 10.0).abs() < 1e-9);
        assert_eq!(monitor.metrics(PathId(1)).packets_sent, 2);
        assert_eq!(monitor.in_flight(), 0);
    }

    #[test]
    fn test_unknown_path_reads_zero() {
        let monitor = PathMetricsMonitor::default();
        assert_eq!(monitor.latency(PathId(77)), 0.0);
        assert_eq!(monitor.bandwidth(PathId(77)), 0.0);
        assert!(!monitor.is_tracked(PathId(77)));
    }

    #[test]
    fn test_in_flight_capacity() {
        let mut config = MonitorConfig::default();
        config.max_in_flight = 2;
        let mut monitor = PathMetricsMonitor::new(config);

        monitor.record_send(1, PathId(1), ms(0));
        monitor.record_send(2, PathId(1), ms(1));
        monitor.record_send(3, PathId(1), ms(2));
        assert_eq!(monitor.in_flight(), 2);
        assert_eq!(monitor.evicted(), 1);

        // Oldest record is gone, newer ones still match
        monitor.record_receive(1, PathId(1), ms(10));
        monitor.record_receive(3, PathId(1), ms(10));
        assert_eq!(monitor.metrics(PathId(1)).packets_received, 1);
    }

    #[test]
    fn test_in_flight_timeout_on_refresh() {
        let mut monitor = PathMetricsMonitor::default();
        monitor.record_send(1, PathId(1), ms(0));
        monitor.record_send(2, PathId(1), ms(9_000));

        monitor.refresh_bandwidth(&[], ms(12_000));
        assert_eq!(monitor.in_flight(), 1);
        assert_eq!(monitor.evicted(), 1);
    }

    fn flow(dst_port: u16, rx_bytes: u64, first_tx: u64, last_rx: u64) -> FlowRecord {
        FlowRecord {
            id: FlowId(dst_port as u32),
            key: FlowKey::new(
                Ipv4Addr::new(10, 1, 1, 1),
                Ipv4Addr::new(10, 1, 2, 2),
                49153,
                dst_port,
                PROTO_UDP,
            ),
            stats: FlowStats {
                tx_packets: 10,
                rx_packets: if rx_bytes > 0 { 10 } else { 0 },
                rx_bytes,
                time_first_tx: ms(first_tx),
                time_last_rx: ms(last_rx),
                delay_sum: Duration::from_millis(100),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_bandwidth_attribution() {
        let mut monitor = PathMetricsMonitor::default();
        let flows = [
            // 1_000_000 bytes over 2s = 4 Mbps
            flow(5004, 1_000_000, 2000, 4000),
            // 250_000 bytes over 1s = 2 Mbps
            flow(9, 250_000, 3000, 4000),
        ];
        monitor.refresh_bandwidth(&flows, ms(4000));

        assert!((monitor.bandwidth(PathId(1)) - 4.0).abs() < 1e-9);
        assert!((monitor.bandwidth(PathId(2)) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_bandwidth_skips_empty_flows() {
        let mut monitor = PathMetricsMonitor::default();
        monitor.refresh_bandwidth(&[flow(5004, 0, 0, 0), flow(9, 500, 3000, 3000)], ms(4000));
        assert_eq!(monitor.bandwidth(PathId(1)), 0.0);
        assert_eq!(monitor.bandwidth(PathId(2)), 0.0);
    }

    #[test]
    fn test_report_lists_tracked_paths() {
        let monitor = PathMetricsMonitor::default();
        let report = monitor.report(ms(5000));
        assert_eq!(report.paths.len(), 5);
        assert!(report.to_string().contains("if4"));
    }
}
