//! End-of-run flow report

use pbr_common::{FlowId, FlowKey, FlowRecord, TrafficClass};
use serde::Serialize;
use std::fmt;

/// Per-flow result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSummary {
    /// Flow identifier
    pub id: FlowId,
    /// 5-tuple
    pub key: FlowKey,
    /// Video when the destination port is a video port, Data otherwise
    pub class: TrafficClass,
    /// Mean one-way delay (ms)
    pub avg_delay_ms: f64,
    /// Receive throughput (Mbps), 0 without an observation window
    pub throughput_mbps: f64,
    /// Lost over transmitted packets (%)
    pub loss_percent: f64,
}

/// Flow results plus per-class latency aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowReport {
    /// Flows that received at least one packet
    pub flows: Vec<FlowSummary>,
    /// Mean of video flow delays (ms)
    pub video_latency_ms: Option<f64>,
    /// Mean of data flow delays (ms)
    pub data_latency_ms: Option<f64>,
}

impl FlowReport {
    /// Summarize flow records. Flows without receptions are skipped.
    pub fn from_records(records: &[FlowRecord], video_ports: &[u16]) -> Self {
        let flows: Vec<FlowSummary> = records
            .iter()
            .filter_map(|r| {
                let avg_delay_ms = r.stats.mean_delay_ms()?;
                let class = if video_ports.contains(&r.key.dst_port) {
                    TrafficClass::Video
                } else {
                    TrafficClass::Data
                };
                Some(FlowSummary {
                    id: r.id,
                    key: r.key,
                    class,
                    avg_delay_ms,
                    throughput_mbps: r.stats.throughput_mbps().unwrap_or(0.0),
                    loss_percent: r.stats.loss_percent(),
                })
            })
            .collect();

        let mean_for = |class: TrafficClass| {
            let delays: Vec<f64> = flows
                .iter()
                .filter(|f| f.class == class)
                .map(|f| f.avg_delay_ms)
                .collect();
            (!delays.is_empty()).then(|| delays.iter().sum::<f64>() / delays.len() as f64)
        };

        Self {
            video_latency_ms: mean_for(TrafficClass::Video),
            data_latency_ms: mean_for(TrafficClass::Data),
            flows,
        }
    }
}

impl fmt::Display for FlowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flow in &self.flows {
            writeln!(f, "flow {} ({}) {}", flow.id.0, flow.key, flow.class.label())?;
            writeln!(f, "  avg delay:  {:.3} ms", flow.avg_delay_ms)?;
            writeln!(f, "  throughput: {:.3} Mbps", flow.throughput_mbps)?;
            writeln!(f, "  loss:       {:.2} %", flow.loss_percent)?;
        }
        if let Some(ms) = self.video_latency_ms {
            writeln!(f, "video mean latency: {ms:.3} ms")?;
        }
        if let Some(ms) = self.data_latency_ms {
            writeln!(f, "data mean latency:  {ms:.3} ms")?;
        }
        Ok(())
    }
}
