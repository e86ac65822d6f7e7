//! Traffic Classification
//!
//! Maps packets to a [`TrafficClass`] and holds the class to path mapping
//! consulted by the forwarding side.
//!
//! Resolution order is fixed: destination port, then source port, then
//! DSCP, then Default. Server listening ports are a more reliable signal
//! than ephemeral client ports, so the destination port wins.

use crate::config::ClassifierConfig;
use pbr_common::packet::ETHERTYPE_IPV4;
use pbr_common::{Ipv4Summary, PathId, TrafficClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Receiver of class to path assignments
pub trait PathSink {
    /// Overwrite the active path for a class
    fn update_active_path(&mut self, class: TrafficClass, path: PathId);
}

/// Outcome of packet inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the packet to normal processing
    Continue,
}

/// Packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierStats {
    /// Packets observed
    pub packets: u64,
    /// Packets that could not be classified (non-IPv4, non-UDP/TCP)
    pub indeterminate: u64,
    /// Video packets
    pub video: u64,
    /// Data packets
    pub data: u64,
    /// Default packets
    pub default: u64,
}

impl ClassifierStats {
    /// Packets counted for a class
    pub fn count(&self, class: TrafficClass) -> u64 {
        match class {
            TrafficClass::Video => self.video,
            TrafficClass::Data => self.data,
            TrafficClass::Default => self.default,
        }
    }

    fn bump(&mut self, class: TrafficClass) {
        match class {
            TrafficClass::Video => self.video += 1,
            TrafficClass::Data => self.data += 1,
            TrafficClass::Default => self.default += 1,
        }
    }
}

/// Port/DSCP traffic classifier
#[derive(Debug)]
pub struct TrafficClassifier {
    port_classes: HashMap<u16, TrafficClass>,
    expedited_dscp: u8,
    best_effort_dscp: u8,
    active_paths: HashMap<TrafficClass, PathId>,
    default_path: PathId,
    log_every: u64,
    stats: ClassifierStats,
}

impl TrafficClassifier {
    /// Create classifier from configuration
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            port_classes: config.port_classes.iter().map(|pc| (pc.port, pc.class)).collect(),
            expedited_dscp: config.expedited_dscp,
            best_effort_dscp: config.best_effort_dscp,
            active_paths: config.initial_paths.iter().map(|cp| (cp.class, cp.path)).collect(),
            default_path: config.default_path,
            log_every: config.log_every,
            stats: ClassifierStats::default(),
        }
    }

    /// Classify by ports and DSCP
    #[inline]
    pub fn classify(&self, src_port: u16, dst_port: u16, dscp: u8) -> TrafficClass {
        if let Some(&class) = self.port_classes.get(&dst_port) {
            return class;
        }
        if let Some(&class) = self.port_classes.get(&src_port) {
            return class;
        }
        if dscp == self.expedited_dscp {
            TrafficClass::Video
        } else if dscp == self.best_effort_dscp {
            TrafficClass::Data
        } else {
            TrafficClass::Default
        }
    }

    /// Classify a raw datagram. `None` for non-IPv4 frames and protocols
    /// other than UDP/TCP.
    pub fn inspect(&self, ethertype: u16, datagram: &[u8]) -> Option<TrafficClass> {
        self.classify_datagram(ethertype, datagram).map(|(class, _)| class)
    }

    /// Observation hook for every packet seen by the router. Never drops or
    /// redirects.
    pub fn on_packet(&mut self, ethertype: u16, datagram: &[u8]) -> Verdict {
        self.observe(ethertype, datagram);
        Verdict::Continue
    }

    /// Count and classify one packet, parsing it once. Forwarding code uses
    /// the returned class to pick the egress path.
    pub fn observe(&mut self, ethertype: u16, datagram: &[u8]) -> Option<TrafficClass> {
        self.stats.packets += 1;

        let Some((class, dst_port)) = self.classify_datagram(ethertype, datagram) else {
            self.stats.indeterminate += 1;
            return None;
        };
        self.stats.bump(class);
        if self.log_every > 0 && self.stats.packets % self.log_every == 0 {
            debug!(class = %class, dst_port, packets = self.stats.packets, "packet classified");
        }
        Some(class)
    }

    fn classify_datagram(&self, ethertype: u16, datagram: &[u8]) -> Option<(TrafficClass, u16)> {
        if ethertype != ETHERTYPE_IPV4 {
            return None;
        }
        let summary = Ipv4Summary::parse(datagram)?;
        let (src_port, dst_port) = summary.transport.ports()?;
        Some((self.classify(src_port, dst_port, summary.dscp), dst_port))
    }

    /// Active path for a class, the default path if never assigned
    pub fn active_path(&self, class: TrafficClass) -> PathId {
        self.active_paths.get(&class).copied().unwrap_or(self.default_path)
    }

    /// Packet counters
    pub fn stats(&self) -> ClassifierStats {
        self.stats
    }
}

impl PathSink for TrafficClassifier {
    fn update_active_path(&mut self, class: TrafficClass, path: PathId) {
        self.active_paths.insert(class, path);
        info!(class = %class, path = %path, "active path updated");
    }
}

impl Default for TrafficClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}
