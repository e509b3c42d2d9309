//! Single-threaded cooperative scheduler.
//!
//! All stream state transitions happen in discrete, non-blocking steps
//! executed here. A task is either sleeping on an expiration tick, queued
//! for the current iteration, or idle waiting for an I/O wake-up from the
//! external multiplexer.
//!
//! Guarantees:
//! - within one iteration a task runs at most once; re-waking a running
//!   task defers it to the next iteration;
//! - tasks sharing an expiration tick run in creation order;
//! - an iteration with nothing queued and nothing expired is a no-op.

use hashbrown::HashMap;
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

/// Monotonic scheduler time, in milliseconds since process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(u64);

impl Tick {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// The tick `d` later than this one.
    #[must_use]
    pub fn advance(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_millis() as u64))
    }

    /// Duration until `later`, zero if already past.
    #[must_use]
    pub const fn until(self, later: Self) -> Duration {
        Duration::from_millis(later.0.saturating_sub(self.0))
    }
}

/// Handle to a scheduled task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

#[derive(Debug)]
struct TaskState {
    expire: Option<Tick>,
    queued: bool,
}

/// Expiration-ordered task registry with a FIFO run queue.
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: HashMap<TaskId, TaskState>,
    expiry: BTreeSet<(Tick, TaskId)>,
    run_queue: VecDeque<TaskId>,
    next_id: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task. It starts idle: not queued, no expiration.
    pub fn create_task(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.insert(
            id,
            TaskState {
                expire: None,
                queued: false,
            },
        );
        id
    }

    /// Remove a task entirely. Safe to call on an already-removed id.
    pub fn kill(&mut self, id: TaskId) {
        if let Some(state) = self.tasks.remove(&id) {
            if let Some(exp) = state.expire {
                self.expiry.remove(&(exp, id));
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Number of live tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Queue a task for the next iteration (I/O readiness changed, a peer
    /// made progress, ...). Idempotent while already queued.
    pub fn wake(&mut self, id: TaskId) {
        if let Some(state) = self.tasks.get_mut(&id) {
            if !state.queued {
                state.queued = true;
                self.run_queue.push_back(id);
            }
        }
    }

    /// Move, set or clear a task's expiration tick.
    pub fn set_expire(&mut self, id: TaskId, expire: Option<Tick>) {
        if let Some(state) = self.tasks.get_mut(&id) {
            if let Some(old) = state.expire.take() {
                self.expiry.remove(&(old, id));
            }
            if let Some(new) = expire {
                state.expire = Some(new);
                self.expiry.insert((new, id));
            }
        }
    }

    /// Pop every task whose tick has expired into the run queue.
    fn wake_expired(&mut self, now: Tick) {
        loop {
            let Some(&(tick, id)) = self.expiry.iter().next() else {
                break;
            };
            if tick > now {
                break;
            }
            self.expiry.remove(&(tick, id));
            if let Some(state) = self.tasks.get_mut(&id) {
                state.expire = None;
                if !state.queued {
                    state.queued = true;
                    self.run_queue.push_back(id);
                }
            }
        }
    }

    /// Run one scheduler iteration: wake expired timers, then drain the
    /// tasks queued so far through `run`. Tasks woken during the iteration
    /// wait for the next one. Returns the number of tasks run.
    pub fn run_iteration<F>(&mut self, now: Tick, mut run: F) -> usize
    where
        F: FnMut(&mut Self, TaskId),
    {
        self.wake_expired(now);

        let batch: Vec<TaskId> = self.run_queue.drain(..).collect();
        for id in &batch {
            if let Some(state) = self.tasks.get_mut(id) {
                state.queued = false;
            }
        }

        let mut ran = 0;
        for id in batch {
            // A task may be killed by an earlier task in the same batch.
            if !self.tasks.contains_key(&id) {
                continue;
            }
            run(self, id);
            ran += 1;
        }
        ran
    }

    /// Timeout to hand to the event multiplexer: time until the earliest
    /// expiration, zero if work is already queued, `None` if fully idle.
    #[must_use]
    pub fn next_timeout(&self, now: Tick) -> Option<Duration> {
        if !self.run_queue.is_empty() {
            return Some(Duration::ZERO);
        }
        self.expiry
            .iter()
            .next()
            .map(|&(tick, _)| now.until(tick))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_iteration_is_a_no_op() {
        let mut sched = Scheduler::new();
        let ran = sched.run_iteration(Tick::ZERO, |_, _| panic!("nothing should run"));
        assert_eq!(ran, 0);
    }

    #[test]
    fn wake_runs_once_per_iteration() {
        let mut sched = Scheduler::new();
        let id = sched.create_task();
        sched.wake(id);
        sched.wake(id);

        let mut runs = Vec::new();
        sched.run_iteration(Tick::ZERO, |s, t| {
            runs.push(t);
            // Re-waking from inside the run defers to the next iteration.
            s.wake(t);
        });
        assert_eq!(runs, vec![id]);

        runs.clear();
        sched.run_iteration(Tick::ZERO, |_, t| runs.push(t));
        assert_eq!(runs, vec![id]);
    }

    #[test]
    fn expired_timers_fire_in_creation_order() {
        let mut sched = Scheduler::new();
        let a = sched.create_task();
        let b = sched.create_task();
        sched.set_expire(b, Some(Tick::from_millis(100)));
        sched.set_expire(a, Some(Tick::from_millis(100)));

        let mut runs = Vec::new();
        sched.run_iteration(Tick::from_millis(100), |_, t| runs.push(t));
        assert_eq!(runs, vec![a, b]);
    }

    #[test]
    fn future_timer_does_not_fire() {
        let mut sched = Scheduler::new();
        let id = sched.create_task();
        sched.set_expire(id, Some(Tick::from_millis(200)));

        let ran = sched.run_iteration(Tick::from_millis(199), |_, _| {});
        assert_eq!(ran, 0);
        assert_eq!(
            sched.next_timeout(Tick::from_millis(199)),
            Some(Duration::from_millis(1))
        );
    }

    #[test]
    fn kill_inside_batch_skips_the_victim() {
        let mut sched = Scheduler::new();
        let a = sched.create_task();
        let b = sched.create_task();
        sched.wake(a);
        sched.wake(b);

        let mut runs = Vec::new();
        sched.run_iteration(Tick::ZERO, |s, t| {
            runs.push(t);
            if t == a {
                s.kill(b);
            }
        });
        assert_eq!(runs, vec![a]);
        assert!(!sched.contains(b));
    }

    #[test]
    fn set_expire_replaces_previous_tick() {
        let mut sched = Scheduler::new();
        let id = sched.create_task();
        sched.set_expire(id, Some(Tick::from_millis(50)));
        sched.set_expire(id, Some(Tick::from_millis(500)));

        let ran = sched.run_iteration(Tick::from_millis(60), |_, _| {});
        assert_eq!(ran, 0);

        let mut runs = 0;
        sched.run_iteration(Tick::from_millis(500), |_, _| runs += 1);
        assert_eq!(runs, 1);
    }
}
