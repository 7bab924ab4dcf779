//! Virtual scheduler behind `vi.useFakeTimers()`.
//!
//! The worker also keeps its real timers in a `FakeClock` whose time is the
//! run's elapsed wall time.
//!
//! The clock itself never calls back into script code. Drivers pop one due
//! task at a time and fire it with no borrow held, so a callback may freely
//! schedule or clear timers on the same clock.

use std::cell::RefCell;

use crate::config::limits::{ADVANCE_ITERATION_CAP, MIN_INTERVAL_MS, RUN_ALL_ITERATION_CAP};

pub type TimerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Timeout,
    Interval,
}

#[derive(Debug, Clone)]
pub struct TimerTask<C> {
    pub id: TimerId,
    pub callback: C,
    pub fire_at: u64,
    pub kind: TimerKind,
    pub period: u64,
}

#[derive(Debug)]
pub struct FakeClock<C> {
    now: u64,
    queue: Vec<TimerTask<C>>,
    next_id: TimerId,
    installed: bool,
}

impl<C> Default for FakeClock<C> {
    fn default() -> Self {
        Self {
            now: 0,
            queue: Vec::new(),
            next_id: 1,
            installed: false,
        }
    }
}

/// Clamps a script-supplied delay to whole non-negative milliseconds.
pub fn normalize_delay(delay: f64) -> u64 {
    if delay.is_finite() && delay > 0.0 {
        delay.floor() as u64
    } else {
        0
    }
}

impl<C: Clone> FakeClock<C> {
    /// Freezes virtual time at `now`. Returns false when already installed.
    pub fn install(&mut self, now: u64) -> bool {
        if self.installed {
            return false;
        }
        self.installed = true;
        self.now = now;
        self.queue.clear();
        true
    }

    /// Drops every pending task. Returns false when not installed.
    pub fn uninstall(&mut self) -> bool {
        if !self.installed {
            return false;
        }
        self.installed = false;
        self.queue.clear();
        true
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn schedule(&mut self, callback: C, delay: f64, kind: TimerKind) -> TimerId {
        let mut delay = normalize_delay(delay);
        if kind == TimerKind::Interval {
            delay = delay.max(MIN_INTERVAL_MS);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.enqueue(TimerTask {
            id,
            callback,
            fire_at: self.now.saturating_add(delay),
            kind,
            period: delay,
        });
        id
    }

    pub fn clear(&mut self, id: TimerId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|task| task.id != id);
        before != self.queue.len()
    }

    /// Inserts after every task firing at the same time or earlier, keeping
    /// the queue sorted and FIFO among equal fire times.
    fn enqueue(&mut self, task: TimerTask<C>) {
        let at = self.queue.partition_point(|queued| queued.fire_at <= task.fire_at);
        self.queue.insert(at, task);
    }

    fn take_at(&mut self, position: usize) -> C {
        let task = self.queue.remove(position);
        self.now = self.now.max(task.fire_at);
        if task.kind == TimerKind::Interval {
            let mut next = task.clone();
            next.fire_at = task.fire_at.saturating_add(task.period);
            self.enqueue(next);
        }
        task.callback
    }

    /// Earliest task due at or before `until`. Intervals are re-enqueued
    /// before their callback runs.
    pub fn pop_due(&mut self, until: u64) -> Option<C> {
        match self.queue.first() {
            Some(task) if task.fire_at <= until => Some(self.take_at(0)),
            _ => None,
        }
    }

    pub fn pop_next(&mut self) -> Option<C> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.take_at(0))
        }
    }

    pub fn take(&mut self, id: TimerId) -> Option<C> {
        let position = self.queue.iter().position(|task| task.id == id)?;
        Some(self.take_at(position))
    }

    pub fn pending_ids(&self) -> Vec<TimerId> {
        self.queue.iter().map(|task| task.id).collect()
    }

    /// Moves time forward to `at`; never moves it back.
    pub fn catch_up(&mut self, at: u64) {
        self.now = self.now.max(at);
    }

    /// Fire time of the earliest pending task.
    pub fn next_fire_at(&self) -> Option<u64> {
        self.queue.first().map(|task| task.fire_at)
    }
}

/// Fires everything due within the next `ms` virtual milliseconds, then lands
/// on exactly `now + ms`. Returns the number of callbacks fired.
pub fn advance<C: Clone>(clock: &RefCell<FakeClock<C>>, ms: u64, mut fire: impl FnMut(C)) -> usize {
    let target = clock.borrow().now.saturating_add(ms);
    let mut fired = 0;
    while fired < ADVANCE_ITERATION_CAP {
        let next = clock.borrow_mut().pop_due(target);
        let Some(callback) = next else {
            break;
        };
        fire(callback);
        fired += 1;
    }
    clock.borrow_mut().catch_up(target);
    fired
}

/// Fires exactly the tasks pending at call time.
pub fn run_pending<C: Clone>(clock: &RefCell<FakeClock<C>>, mut fire: impl FnMut(C)) -> usize {
    let snapshot = clock.borrow().pending_ids();
    let mut fired = 0;
    for id in snapshot {
        let next = clock.borrow_mut().take(id);
        if let Some(callback) = next {
            fire(callback);
            fired += 1;
        }
    }
    fired
}

/// Drains the queue, bounded by the iteration cap.
pub fn run_all<C: Clone>(clock: &RefCell<FakeClock<C>>, mut fire: impl FnMut(C)) -> usize {
    let mut fired = 0;
    while fired < RUN_ALL_ITERATION_CAP {
        let next = clock.borrow_mut().pop_next();
        let Some(callback) = next else {
            break;
        };
        fire(callback);
        fired += 1;
    }
    fired
}
