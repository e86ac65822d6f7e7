//! Flow keys and aggregate per-flow statistics
//!
//! A flow monitor owned by the surrounding system produces [`FlowRecord`]
//! snapshots; the path engine only reads them.

use crate::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// IP protocol number for TCP
pub const PROTO_TCP: u8 = 6;
/// IP protocol number for UDP
pub const PROTO_UDP: u8 = 17;

/// Flow identifier assigned by the flow monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub u32);

/// IPv4 5-tuple flow key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
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
}

impl FlowKey {
    /// Create new flow key
    pub const fn new(
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

/// Aggregate statistics for one flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    /// Packets transmitted
    pub tx_packets: u64,
    /// Packets received
    pub rx_packets: u64,
    /// Bytes transmitted
    pub tx_bytes: u64,
    /// Bytes received
    pub rx_bytes: u64,
    /// Packets declared lost
    pub lost_packets: u64,
    /// Sum of one-way delays of received packets
    pub delay_sum: Duration,
    /// First transmission time
    pub time_first_tx: SimTime,
    /// Last reception time
    pub time_last_rx: SimTime,
}

impl FlowStats {
    /// Account a transmitted packet
    pub fn record_tx(&mut self, bytes: u64, now: SimTime) {
        if self.tx_packets == 0 {
            self.time_first_tx = now;
        }
        self.tx_packets += 1;
        self.tx_bytes += bytes;
    }

    /// Account a received packet
    pub fn record_rx(&mut self, bytes: u64, delay: Duration, now: SimTime) {
        self.rx_packets += 1;
        self.rx_bytes += bytes;
        self.delay_sum += delay;
        self.time_last_rx = now;
    }

    /// Observation window from first transmission to last reception
    pub fn window(&self) -> Duration {
        self.time_last_rx.saturating_since(self.time_first_tx)
    }

    /// Receive throughput in Mbps, `None` without data or window
    pub fn throughput_mbps(&self) -> Option<f64> {
        if self.rx_packets == 0 {
            return None;
        }
        let secs = self.window().as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        Some(self.rx_bytes as f64 * 8.0 / secs / 1e6)
    }

    /// Mean one-way delay in milliseconds, `None` without receptions
    pub fn mean_delay_ms(&self) -> Option<f64> {
        if self.rx_packets == 0 {
            return None;
        }
        Some(self.delay_sum.as_secs_f64() * 1e3 / self.rx_packets as f64)
    }

    /// Loss rate in percent of transmitted packets
    pub fn loss_percent(&self) -> f64 {
        if self.tx_packets == 0 {
            return 0.0;
        }
        self.lost_packets as f64 * 100.0 / self.tx_packets as f64
    }
}

/// One entry of a flow statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Flow identifier
    pub id: FlowId,
    /// Resolved 5-tuple
    pub key: FlowKey,
    /// Aggregate counters
    pub stats: FlowStats,
}
