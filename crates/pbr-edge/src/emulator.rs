//! Two-path link emulator
//!
//! Sources emit packets at a constant rate. Each packet passes the
//! classifier, leaves on its class's active path and arrives after that
//! path's current one-way delay. The monitor sees every send and receive,
//! and per-flow statistics feed the bandwidth refresh.

use crate::config::{LinkEvent, ScenarioConfig, SourceConfig};
use pbr_common::packet::{encode_ipv4, ETHERTYPE_IPV4};
use pbr_common::{FlowId, FlowKey, FlowRecord, FlowStats, PathId, PathResult, SimTime, TrafficClass};
use pbr_path::{EngineHost, FlowReport, PathEngine};
use pbr_sched::Scheduler;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

struct Flow {
    key: FlowKey,
    source: SourceConfig,
    stats: FlowStats,
}

/// Per-path forwarding counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounters {
    /// Packets forwarded
    pub packets: u64,
    /// Bytes forwarded
    pub bytes: u64,
}

/// Emulated edge router with two or more egress links
pub struct Emulator {
    engine: PathEngine,
    delays: BTreeMap<PathId, Duration>,
    counters: BTreeMap<PathId, LinkCounters>,
    flows: Vec<Flow>,
    next_packet_id: u64,
    dropped: u64,
    end: SimTime,
}

impl Emulator {
    /// Build the emulator and its engine
    pub fn new(config: &ScenarioConfig) -> PathResult<Self> {
        config.validate()?;

        let flows = config
            .sources
            .iter()
            .map(|s| Flow {
                key: FlowKey::new(s.src_ip, s.dst_ip, s.src_port, s.dst_port, s.protocol),
                source: s.clone(),
                stats: FlowStats::default(),
            })
            .collect();

        Ok(Self {
            engine: PathEngine::from_config(config.engine.clone())?,
            delays: config.links.iter().map(|l| (l.path, delay(l.delay_ms))).collect(),
            counters: BTreeMap::new(),
            flows,
            next_packet_id: 0,
            dropped: 0,
            end: SimTime::ZERO + config.duration(),
        })
    }

    /// Queue sources, link events and the engine's periodic tasks
    pub fn install(&mut self, sched: &mut Scheduler<Self>, events: &[LinkEvent]) -> PathResult<()> {
        for (index, flow) in self.flows.iter().enumerate() {
            let start = SimTime::from_millis(flow.source.start_ms);
            sched.schedule_at(start, move |em: &mut Self, s: &mut Scheduler<Self>| em.emit(s, index));
        }

        for &event in events {
            sched.schedule_at(SimTime::from_millis(event.at_ms), move |em: &mut Self, _: &mut Scheduler<Self>| {
                info!(path = %event.path, delay_ms = event.delay_ms, "link delay changed");
                em.delays.insert(event.path, delay(event.delay_ms));
            });
        }

        self.engine.start(sched)
    }

    /// Run until the configured end time, then stop the engine
    pub fn run(&mut self, sched: &mut Scheduler<Self>) {
        let end = self.end;
        sched.run_until(self, end);
        self.engine.stop(sched);
        info!(
            at = %sched.now(),
            events = sched.executed(),
            switches = self.engine.controller.switch_count(),
            "scenario finished"
        );
    }

    fn emit(&mut self, sched: &mut Scheduler<Self>, index: usize) {
        let now = sched.now();
        if now >= self.end {
            return;
        }

        let Some(flow) = self.flows.get(index) else {
            return;
        };
        let datagram = encode_ipv4(&flow.key, flow.source.dscp, flow.source.payload_bytes);
        let interval = Duration::from_millis(flow.source.interval_ms);
        let bytes = datagram.len() as u64;

        let classifier = &mut self.engine.classifier;
        let class = classifier
            .observe(ETHERTYPE_IPV4, &datagram)
            .unwrap_or(TrafficClass::Default);
        let path = classifier.active_path(class);

        let packet_id = self.next_packet_id;
        self.next_packet_id += 1;
        self.flows[index].stats.record_tx(bytes, now);

        match self.delays.get(&path).copied() {
            Some(one_way) => {
                self.engine.monitor.record_send(packet_id, path, now);
                let counters = self.counters.entry(path).or_default();
                counters.packets += 1;
                counters.bytes += bytes;

                sched.schedule_in(one_way, move |em: &mut Self, s: &mut Scheduler<Self>| {
                    em.deliver(s.now(), index, packet_id, path, bytes, now);
                });
            }
            None => {
                self.dropped += 1;
                self.flows[index].stats.lost_packets += 1;
                debug!(%class, %path, "no link for active path, packet dropped");
            }
        }

        sched.schedule_in(interval, move |em: &mut Self, s: &mut Scheduler<Self>| em.emit(s, index));
    }

    fn deliver(&mut self, now: SimTime, index: usize, packet_id: u64, path: PathId, bytes: u64, sent_at: SimTime) {
        self.engine.monitor.record_receive(packet_id, path, now);
        if let Some(flow) = self.flows.get_mut(index) {
            flow.stats.record_rx(bytes, now - sent_at, now);
        }
    }

    /// The engine
    pub fn engine(&self) -> &PathEngine {
        &self.engine
    }

    /// Snapshot of every flow
    pub fn flow_records(&self) -> Vec<FlowRecord> {
        self.flows
            .iter()
            .enumerate()
            .map(|(i, f)| FlowRecord {
                id: FlowId(i as u32 + 1),
                key: f.key,
                stats: f.stats,
            })
            .collect()
    }

    /// Per-flow report, video decided by the monitor's video ports
    pub fn flow_report(&self) -> FlowReport {
        FlowReport::from_records(&self.flow_records(), &self.engine.monitor.config().video_ports)
    }

    /// Forwarding counters for a path
    pub fn link_counters(&self, path: PathId) -> LinkCounters {
        self.counters.get(&path).copied().unwrap_or_default()
    }

    /// Packets whose active path had no link
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl EngineHost for Emulator {
    fn engine(&mut self) -> &mut PathEngine {
        &mut self.engine
    }

    fn flow_snapshot(&mut self) -> Vec<FlowRecord> {
        self.flow_records()
    }
}

fn delay(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms / 1e3).unwrap_or(Duration::ZERO)
}
