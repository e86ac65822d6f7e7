//! Edge Router Scenario - Main Entry Point

use anyhow::Context;
use pbr_edge::{Emulator, ScenarioConfig};
use pbr_sched::Scheduler;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pbr-edge v{}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::var("CONFIG_PATH") {
        Ok(path) => ScenarioConfig::load(&path).unwrap_or_else(|e| {
            tracing::warn!(%path, error = %e, "Config not loaded, using defaults");
            ScenarioConfig::default()
        }),
        Err(_) => ScenarioConfig::default(),
    };

    let mut sched = Scheduler::new();
    let mut emulator = Emulator::new(&config).context("building emulator")?;
    emulator
        .install(&mut sched, &config.link_events)
        .context("starting engine")?;
    emulator.run(&mut sched);

    let engine = emulator.engine();
    println!("{}", engine.monitor.report(sched.now()));
    println!("{}", emulator.flow_report());
    for event in engine.controller.switch_events() {
        println!(
            "{} {}: {} -> {} ({})",
            event.at,
            event.class.label(),
            event.from,
            event.to,
            event.reason
        );
    }
    println!("total switches: {}", engine.controller.switch_count());

    Ok(())
}
