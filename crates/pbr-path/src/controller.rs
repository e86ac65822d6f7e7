//! Policy Controller
//!
//! Periodically compares measured path quality against per-class rules and
//! pushes path changes into the classifier.

use crate::classifier::PathSink;
use crate::config::ControllerConfig;
use crate::engine::EngineHost;
use crate::monitor::MetricsView;
use crate::policy::{Decision, Hysteresis, Observation, PolicyRule};
use pbr_common::{PathError, PathId, PathResult, SimTime, TrafficClass};
use pbr_sched::{Scheduler, TaskHandle};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

/// Record of one applied transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchEvent {
    /// Evaluation time
    pub at: SimTime,
    /// Class that moved
    pub class: TrafficClass,
    /// Previous path
    pub from: PathId,
    /// New path
    pub to: PathId,
    /// Human-readable cause
    pub reason: String,
    /// Primary latency at decision time (ms)
    pub primary_latency_ms: f64,
    /// Secondary latency at decision time (ms)
    pub secondary_latency_ms: f64,
}

/// Hysteresis-based per-class path controller
#[derive(Debug)]
pub struct PolicyController {
    /// Rules in registration order
    policies: Vec<PolicyRule>,
    hysteresis: Hysteresis,
    interval: Duration,
    switch_count: u64,
    evaluations: u64,
    report_every: u64,
    switch_log: VecDeque<SwitchEvent>,
    switch_log_capacity: usize,
    pending: Option<TaskHandle>,
}

impl PolicyController {
    /// Create controller with no policies
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            policies: Vec::new(),
            hysteresis: Hysteresis {
                degrade_margin: config.degrade_margin,
                recovery_margin: config.recovery_margin,
            },
            interval: config.evaluation_interval(),
            switch_count: 0,
            evaluations: 0,
            report_every: config.report_every,
            switch_log: VecDeque::with_capacity(config.switch_log_capacity),
            switch_log_capacity: config.switch_log_capacity,
            pending: None,
        }
    }

    /// Register a rule for `class`, starting on `primary`. Re-registering a
    /// class replaces its rule in place and resets it to the primary path.
    ///
    /// No sink is touched here. The rule's path reaches the sink on the next
    /// `evaluate`, switch or not; `PathEngine::add_policy` pushes it at once.
    pub fn add_policy(
        &mut self,
        class: TrafficClass,
        latency_threshold_ms: f64,
        primary: PathId,
        secondary: PathId,
    ) {
        self.insert(PolicyRule::new(class, latency_threshold_ms, primary, secondary));
    }

    /// Register a fully specified rule
    pub fn insert(&mut self, rule: PolicyRule) {
        info!(
            class = %rule.class,
            threshold_ms = rule.latency_threshold_ms,
            primary = %rule.primary,
            secondary = %rule.secondary,
            "policy registered"
        );

        match self.policies.iter_mut().find(|p| p.class == rule.class) {
            Some(existing) => *existing = rule,
            None => self.policies.push(rule),
        }
    }

    /// Run one evaluation cycle over every rule. Returns the number of
    /// transitions applied. A rule evaluated for the first time since it was
    /// registered writes its current path to `sink` even without a switch.
    pub fn evaluate<M, S>(&mut self, now: SimTime, metrics: &M, sink: &mut S) -> usize
    where
        M: MetricsView + ?Sized,
        S: PathSink + ?Sized,
    {
        self.evaluations += 1;
        let mut applied = 0;

        for rule in &mut self.policies {
            let obs = Observation {
                primary_latency_ms: metrics.latency_ms(rule.primary),
                secondary_latency_ms: metrics.latency_ms(rule.secondary),
                primary_bandwidth_mbps: metrics.bandwidth_mbps(rule.primary),
                secondary_bandwidth_mbps: metrics.bandwidth_mbps(rule.secondary),
            };

            let decision = self.hysteresis.decide(rule, &obs);
            let from = rule.current();
            let switched = rule.apply(decision);
            if switched.is_none() && !rule.announced {
                sink.update_active_path(rule.class, from);
            }
            rule.announced = true;
            let Some(to) = switched else {
                continue;
            };

            sink.update_active_path(rule.class, to);
            self.switch_count += 1;
            applied += 1;

            let reason = match decision {
                Decision::SwitchToSecondary => format!(
                    "primary latency {:.2}ms over {:.2}ms threshold, secondary at {:.2}ms",
                    obs.primary_latency_ms, rule.latency_threshold_ms, obs.secondary_latency_ms
                ),
                _ => format!(
                    "primary latency {:.2}ms recovered below {:.2}ms",
                    obs.primary_latency_ms,
                    rule.latency_threshold_ms * self.hysteresis.recovery_margin
                ),
            };
            info!(
                class = %rule.class,
                %from,
                %to,
                primary_bw_mbps = obs.primary_bandwidth_mbps,
                secondary_bw_mbps = obs.secondary_bandwidth_mbps,
                switches = self.switch_count,
                "{reason}"
            );

            if self.switch_log_capacity > 0 {
                if self.switch_log.len() == self.switch_log_capacity {
                    self.switch_log.pop_front();
                }
                self.switch_log.push_back(SwitchEvent {
                    at: now,
                    class: rule.class,
                    from,
                    to,
                    reason,
                    primary_latency_ms: obs.primary_latency_ms,
                    secondary_latency_ms: obs.secondary_latency_ms,
                });
            }
        }

        applied
    }

    /// Schedule the periodic evaluation
    pub fn start<W: EngineHost>(&mut self, sched: &mut Scheduler<W>) -> PathResult<()> {
        if self.is_running(sched) {
            return Err(PathError::AlreadyStarted);
        }
        self.pending = Some(sched.schedule_in(self.interval, evaluation_tick::<W>));
        debug!(interval_ms = self.interval.as_millis() as u64, "policy evaluation started");
        Ok(())
    }

    /// Cancel the pending evaluation, if any
    pub fn stop<W>(&mut self, sched: &mut Scheduler<W>) {
        if let Some(handle) = self.pending.take() {
            if sched.cancel(handle) {
                debug!("policy evaluation stopped");
            }
        }
    }

    /// Whether an evaluation is scheduled
    pub fn is_running<W>(&self, sched: &Scheduler<W>) -> bool {
        self.pending.is_some_and(|h| sched.is_pending(h))
    }

    /// Transitions applied since creation
    pub fn switch_count(&self) -> u64 {
        self.switch_count
    }

    /// Evaluation cycles run since creation
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Rule for a class
    pub fn policy(&self, class: TrafficClass) -> Option<&PolicyRule> {
        self.policies.iter().find(|p| p.class == class)
    }

    /// Rules in evaluation order
    pub fn policies(&self) -> &[PolicyRule] {
        &self.policies
    }

    /// Most recent transitions, oldest first
    pub fn switch_events(&self) -> impl Iterator<Item = &SwitchEvent> {
        self.switch_log.iter()
    }

    pub(crate) fn report_due(&self) -> bool {
        self.report_every > 0 && self.evaluations % self.report_every == 0
    }
}

impl Default for PolicyController {
    fn default() -> Self {
        Self::new(&ControllerConfig::default())
    }
}

fn evaluation_tick<W: EngineHost>(world: &mut W, sched: &mut Scheduler<W>) {
    let engine = world.engine();
    engine.evaluate(sched.now());

    let controller = &mut engine.controller;
    let next = sched.schedule_in(controller.interval, evaluation_tick::<W>);
    controller.pending = Some(next);
}
