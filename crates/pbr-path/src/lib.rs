//! Policy-Based WAN Path Selection
//!
//! Watches per-path latency and bandwidth and decides, per traffic class,
//! which of two egress paths is active.
//!
//! ```text
//!   send/receive events        flow statistics
//!          │                         │
//!          ▼                         ▼
//!   ┌──────────────────────────────────────┐
//!   │         PathMetricsMonitor           │
//!   └──────────────────┬───────────────────┘
//!                      │ MetricsView (read)
//!                      ▼
//!   ┌──────────────────────────────────────┐
//!   │          PolicyController            │  every evaluation interval
//!   └──────────────────┬───────────────────┘
//!                      │ PathSink (push)
//!                      ▼
//!   ┌──────────────────────────────────────┐
//!   │         TrafficClassifier            │◀── packets
//!   └──────────────────────────────────────┘
//!                      │
//!                      ▼
//!            active path per class
//! ```
//!
//! # Features
//!
//! - Bounded moving-average latency per path
//! - Port then DSCP classification
//! - Two-state hysteresis per class (0.8 to leave, 0.7 to return)
//! - Periodic tasks driven by a discrete-event scheduler

#![warn(missing_docs)]

pub mod classifier;
pub mod config;
pub mod controller;
pub mod engine;
pub mod monitor;
pub mod policy;
pub mod report;

pub use classifier::{ClassifierStats, PathSink, TrafficClassifier, Verdict};
pub use config::{ClassifierConfig, ControllerConfig, EngineConfig, MonitorConfig, PolicyConfig};
pub use controller::{PolicyController, SwitchEvent};
pub use engine::{EngineHost, PathEngine};
pub use monitor::{MetricsReport, MetricsView, PathMetrics, PathMetricsMonitor};
pub use policy::{Decision, Hysteresis, Observation, PathState, PolicyRule};
pub use report::{FlowReport, FlowSummary};
