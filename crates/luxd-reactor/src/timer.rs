//! Timer schedule for the reactor.
//!
//! An arena of timer records keyed by a stable [`TimerId`], plus a
//! min-heap of `(deadline, id)` pairs. Cancellation is O(1) lazy
//! tombstoning: `remove_timeout` drops the arena record, and a heap entry
//! whose record is gone is skipped when it reaches the top. The heap holds
//! at most one entry per live timer, so no stale-deadline bookkeeping is
//! needed.
//!
//! Owned exclusively by the reactor thread — no locking (cross-thread
//! interaction goes through `Remote`, never through this type).
//!
//! # Complexity
//!
//! - Register: O(log n)
//! - Cancel: O(1)
//! - Expiry sweep: O(k log n) for k expired timers
//!
//! # Repeat semantics
//!
//! A repeating callback returns `true` to keep running. Reschedule is
//! `deadline += interval` (no drift accumulation), applied after the
//! sweep: a timer that missed several intervals fires once per sweep and
//! catches up across iterations, never multiple times inside one sweep.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

/// Stable handle for cancelling a scheduled timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw id value, for logs.
    pub fn raw(self) -> u64 {
        self.0
    }
}

enum TimerKind {
    /// Fires once; the callback is consumed.
    Single(Box<dyn FnOnce()>),
    /// Fires every `interval` until the callback returns `false` or the
    /// timer is removed.
    Repeating {
        interval: Duration,
        callback: Box<dyn FnMut() -> bool>,
    },
}

struct TimerRecord {
    deadline: Instant,
    kind: TimerKind,
}

/// Heap entry ordered earliest-deadline-first, ties broken by
/// registration order so same-deadline timers fire deterministically.
struct HeapEntry {
    deadline: Instant,
    id: TimerId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest
        // deadline (then the oldest id) on top.
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.id.cmp(&self.id),
            ord => ord,
        }
    }
}

/// Priority-ordered collection of scheduled callbacks.
pub struct TimerManager {
    records: HashMap<TimerId, TimerRecord>,
    heap: BinaryHeap<HeapEntry>,
    next_id: u64,
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            heap: BinaryHeap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, deadline: Instant, kind: TimerKind) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.records.insert(id, TimerRecord { deadline, kind });
        self.heap.push(HeapEntry { deadline, id });
        id
    }

    /// Schedule `callback` to run once, `delay` from now.
    pub fn register_single_timeout(
        &mut self,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) -> TimerId {
        self.insert(Instant::now() + delay, TimerKind::Single(Box::new(callback)))
    }

    /// Schedule `callback` to run every `interval`, first fire one
    /// interval from now. The callback returning `false` stops the timer.
    pub fn register_repeating_timeout(
        &mut self,
        interval: Duration,
        callback: impl FnMut() -> bool + 'static,
    ) -> TimerId {
        self.insert(
            Instant::now() + interval,
            TimerKind::Repeating {
                interval,
                callback: Box::new(callback),
            },
        )
    }

    /// Cancel a pending timeout. Returns false if the id is unknown
    /// (never registered, already fired, or already removed). A cancelled
    /// timer's callback is guaranteed not to run.
    pub fn remove_timeout(&mut self, id: TimerId) -> bool {
        self.records.remove(&id).is_some()
    }

    /// Number of live (non-cancelled) timers.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// How long the poll wait may block: the time until the earliest live
    /// timer, capped at `default`, clamped to >= 0.
    pub fn next_wake(&mut self, now: Instant, default: Duration) -> Duration {
        // Shed tombstoned entries so a cancelled timer cannot force an
        // early wake.
        while let Some(top) = self.heap.peek() {
            if self.records.contains_key(&top.id) {
                break;
            }
            self.heap.pop();
        }
        match self.heap.peek() {
            Some(top) => default.min(top.deadline.saturating_duration_since(now)),
            None => default,
        }
    }

    /// Pop and invoke every timer whose deadline is at or before `now`,
    /// in deadline order. Returns the number of callbacks invoked.
    pub fn service_expired(&mut self, now: Instant) -> usize {
        // Phase 1: collect expired records in fire order. Cancellation is
        // observed here — a removed record leaves only a dead heap entry.
        let mut due: Vec<(TimerId, Instant, TimerKind)> = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = match self.heap.pop() {
                Some(entry) => entry,
                None => break,
            };
            if let Some(record) = self.records.remove(&entry.id) {
                due.push((entry.id, record.deadline, record.kind));
            }
        }

        // Phase 2: invoke, re-arming repeats that want to keep running.
        let fired = due.len();
        for (id, deadline, kind) in due {
            match kind {
                TimerKind::Single(callback) => callback(),
                TimerKind::Repeating {
                    interval,
                    mut callback,
                } => {
                    if callback() {
                        let next = deadline + interval;
                        self.records.insert(
                            id,
                            TimerRecord {
                                deadline: next,
                                kind: TimerKind::Repeating { interval, callback },
                            },
                        );
                        self.heap.push(HeapEntry { deadline: next, id });
                    }
                }
            }
        }
        fired
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerManager")
            .field("live", &self.records.len())
            .field("heap", &self.heap.len())
            .finish()
    }
}
