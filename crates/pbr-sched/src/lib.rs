//! Discrete-Event Scheduler
//!
//! Single-threaded, cooperative execution of callbacks against a virtual
//! clock.
//!
//! # Semantics
//!
//! - Events run to completion, one at a time, in (time, enqueue order)
//! - Events scheduled for the same instant run FIFO
//! - Each event receives the world and the scheduler, so periodic work
//!   re-arms itself by scheduling its next invocation
//! - Cancelling an event that already fired (or never existed) is a no-op

#![warn(missing_docs)]

use pbr_common::SimTime;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// Callback invoked when an event fires
pub type Event<W> = Box<dyn FnOnce(&mut W, &mut Scheduler<W>)>;

/// Handle to a scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

struct Entry<W> {
    at: SimTime,
    seq: u64,
    event: Event<W>,
}

impl<W> PartialEq for Entry<W> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<W> Eq for Entry<W> {}

impl<W> PartialOrd for Entry<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W> Ord for Entry<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse the ordering for min-heap
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Event scheduler over a world of type `W`
pub struct Scheduler<W> {
    now: SimTime,
    next_seq: u64,
    queue: BinaryHeap<Entry<W>>,
    /// Sequence numbers still eligible to fire
    pending: HashSet<u64>,
    executed: u64,
}

impl<W> Scheduler<W> {
    /// Create scheduler at time zero
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
            executed: 0,
        }
    }

    /// Current virtual time
    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` after `delay`
    pub fn schedule_in<F>(&mut self, delay: Duration, event: F) -> TaskHandle
    where
        F: FnOnce(&mut W, &mut Scheduler<W>) + 'static,
    {
        let at = self.now + delay;
        self.push(at, Box::new(event))
    }

    /// Schedule `event` at an absolute time. Times in the past fire at `now`.
    pub fn schedule_at<F>(&mut self, at: SimTime, event: F) -> TaskHandle
    where
        F: FnOnce(&mut W, &mut Scheduler<W>) + 'static,
    {
        let at = at.max(self.now);
        self.push(at, Box::new(event))
    }

    fn push(&mut self, at: SimTime, event: Event<W>) -> TaskHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(seq);
        self.queue.push(Entry { at, seq, event });
        trace!(seq, %at, "event scheduled");
        TaskHandle(seq)
    }

    /// Cancel a scheduled event. Returns whether it was still pending.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let removed = self.pending.remove(&handle.0);
        if removed {
            trace!(seq = handle.0, "event cancelled");
        }
        removed
    }

    /// Whether the event behind `handle` has yet to fire
    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    /// Number of events waiting to fire
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Total events executed so far
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Time of the next live event
    pub fn next_event_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.queue.peek().map(|e| e.at)
    }

    fn discard_cancelled(&mut self) {
        while let Some(head) = self.queue.peek() {
            if self.pending.contains(&head.seq) {
                break;
            }
            self.queue.pop();
        }
    }

    /// Execute the next event. Returns `false` when nothing is left.
    pub fn step(&mut self, world: &mut W) -> bool {
        self.discard_cancelled();
        let Some(entry) = self.queue.pop() else {
            return false;
        };

        self.pending.remove(&entry.seq);
        self.now = entry.at;
        self.executed += 1;
        (entry.event)(world, self);
        true
    }

    /// Execute every event due at or before `end`, then advance the clock
    /// to `end`.
    pub fn run_until(&mut self, world: &mut W, end: SimTime) {
        while let Some(at) = self.next_event_time() {
            if at > end {
                break;
            }
            self.step(world);
        }
        self.now = self.now.max(end);
    }

    /// Execute events until the queue drains. Never returns while a
    /// periodic task keeps re-arming itself.
    pub fn run(&mut self, world: &mut W) {
        while self.step(world) {}
    }
}

impl<W> Default for Scheduler<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> fmt::Debug for Scheduler<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now)
            .field("pending", &self.pending.len())
            .field("executed", &self.executed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        entries: Vec<(u64, &'static str)>,
    }

    fn record(label: &'static str) -> impl FnOnce(&mut Log, &mut Scheduler<Log>) {
        move |log, sched| log.entries.push((sched.now().as_nanos() / 1_000_000, label))
    }

    #[test]
    fn test_time_order() {
        let mut sched = Scheduler::new();
        let mut log = Log::default();

        sched.schedule_in(Duration::from_millis(30), record("c"));
        sched.schedule_in(Duration::from_millis(10), record("a"));
        sched.schedule_in(Duration::from_millis(20), record("b"));
        sched.run(&mut log);

        assert_eq!(log.entries, vec![(10, "a"), (20, "b"), (30, "c")]);
    }

    #[test]
    fn test_fifo_tie_break() {
        let mut sched = Scheduler::new();
        let mut log = Log::default();

        sched.schedule_at(SimTime::from_secs(1), record("metrics"));
        sched.schedule_at(SimTime::from_secs(1), record("policy"));
        sched.schedule_at(SimTime::from_secs(1), record("report"));
        sched.run(&mut log);

        let labels: Vec<_> = log.entries.iter().map(|(_, l)| *l).collect();
        assert_eq!(labels, vec!["metrics", "policy", "report"]);
    }

    #[test]
    fn test_cancel() {
        let mut sched = Scheduler::new();
        let mut log = Log::default();

        let a = sched.schedule_in(Duration::from_millis(5), record("a"));
        let b = sched.schedule_in(Duration::from_millis(6), record("b"));
        assert!(sched.cancel(b));
        assert!(!sched.cancel(b));
        assert_eq!(sched.pending_count(), 1);

        sched.run(&mut log);
        assert_eq!(log.entries, vec![(5, "a")]);

        // Already fired
        assert!(!sched.is_pending(a));
        assert!(!sched.cancel(a));
    }

    #[test]
    fn test_periodic_rearm() {
        fn tick(log: &mut Log, sched: &mut Scheduler<Log>) {
            log.entries.push((sched.now().as_nanos() / 1_000_000, "tick"));
            sched.schedule_in(Duration::from_secs(1), tick);
        }

        let mut sched = Scheduler::new();
        let mut log = Log::default();
        sched.schedule_in(Duration::from_secs(1), tick);
        sched.run_until(&mut log, SimTime::from_millis(3500));

        assert_eq!(log.entries.len(), 3);
        assert_eq!(sched.now(), SimTime::from_millis(3500));
        assert_eq!(sched.next_event_time(), Some(SimTime::from_secs(4)));
    }

    #[test]
    fn test_past_time_fires_now() {
        let mut sched = Scheduler::new();
        let mut log = Log::default();
        sched.run_until(&mut log, SimTime::from_secs(2));

        sched.schedule_at(SimTime::from_secs(1), record("late"));
        sched.run(&mut log);
        assert_eq!(log.entries, vec![(2000, "late")]);
    }

    #[test]
    fn test_event_schedules_same_instant() {
        let mut sched = Scheduler::new();
        let mut log = Log::default();

        sched.schedule_in(Duration::from_millis(1), |log: &mut Log, s: &mut Scheduler<Log>| {
            log.entries.push((1, "first"));
            s.schedule_in(Duration::ZERO, record("nested"));
        });
        sched.schedule_in(Duration::from_millis(1), record("second"));
        sched.run(&mut log);

        let labels: Vec<_> = log.entries.iter().map(|(_, l)| *l).collect();
        assert_eq!(labels, vec!["first", "second", "nested"]);
        assert_eq!(sched.executed(), 3);
    }
}
