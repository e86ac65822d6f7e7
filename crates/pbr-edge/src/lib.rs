//! Edge Router Scenario
//!
//! Drives the path selection engine with emulated traffic over two
//! egress links whose delays change on a schedule.

#![warn(missing_docs)]

pub mod config;
pub mod emulator;

pub use config::{LinkConfig, LinkEvent, ScenarioConfig, SourceConfig};
pub use emulator::{Emulator, LinkCounters};
