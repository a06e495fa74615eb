//! Deadline scheduler: a monotonic-time priority queue of one-shot callbacks.
//!
//! The reactor is driven synchronously by an external loop (§5 of the design): there is no
//! wall-clock and no background thread here, only a logical clock that the caller advances by
//! calling [`Scheduler::poll`] with the elapsed duration since the previous call.
//!
//! Entries carry a plain payload `T` rather than a closure over their owner (§9: "cyclic
//! references"). The reactor instantiates `Scheduler<TimerKind>` and interprets the payloads
//! `poll` hands back itself, so no scheduler entry ever references the reactor it belongs to.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

/// Opaque handle to a scheduled entry, returned by [`Scheduler::add`].
///
/// Cancelling a handle whose entry has already fired or already been cancelled is a no-op
/// (§8 invariant 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

struct Entry<T> {
    deadline: Duration,
    sequence: u64,
    token: Token,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}
impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    /// Reversed so the `BinaryHeap` (a max-heap) pops the *smallest* deadline first; ties break
    /// by insertion order, also reversed for the same reason.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A min-ordered set of `(deadline, payload)` entries advanced by an externally supplied
/// elapsed-time tick.
///
/// Cancellation is lazy: `cancel` just drops the token from the `alive` set rather than touching
/// the heap (`BinaryHeap` has no safe way to remove an arbitrary element). A cancelled entry is
/// discarded the next time `poll` reaches it instead.
pub struct Scheduler<T> {
    now: Duration,
    heap: BinaryHeap<Entry<T>>,
    alive: HashSet<Token>,
    next_token: u64,
    next_sequence: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Scheduler {
            now: Duration::default(),
            heap: BinaryHeap::new(),
            alive: HashSet::new(),
            next_token: 0,
            next_sequence: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of the logical clock.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of live (not yet fired, not cancelled) entries.
    pub fn len(&self) -> usize {
        self.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    /// Schedules `payload` to fire at `now() + delay`, returning a handle that can cancel it.
    pub fn add(&mut self, delay: Duration, payload: T) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.heap.push(Entry {
            deadline: self.now + delay,
            sequence,
            token,
            payload,
        });
        self.alive.insert(token);

        token
    }

    /// Marks `token`'s entry dead if it is still live. Idempotent: cancelling an already-fired or
    /// already-cancelled token is a no-op (§8 invariant 2). The entry itself is lazily dropped out
    /// of the heap the next time `poll` reaches it.
    pub fn cancel(&mut self, token: Token) {
        self.alive.remove(&token);
    }

    /// Advances the logical clock by `elapsed`, then removes and returns every entry whose
    /// deadline is now due, in non-decreasing deadline order (ties broken by insertion order).
    /// Entries cancelled before their deadline are silently discarded rather than returned.
    ///
    /// The caller may re-enter `add`/`cancel` while processing the returned payloads; a newly
    /// added entry whose deadline is `<= now()` will be due, but only surfaces on the *next* call
    /// to `poll`.
    pub fn poll(&mut self, elapsed: Duration) -> Vec<T> {
        self.now += elapsed;
        let mut fired = Vec::new();

        while let Some(entry) = self.heap.peek() {
            if entry.deadline > self.now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry must pop");
            if self.alive.remove(&entry.token) {
                fired.push(entry.payload);
            }
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut sched = Scheduler::new();
        sched.add(Duration::from_secs(2), "two");
        sched.add(Duration::from_secs(1), "one");

        assert_eq!(sched.poll(Duration::from_secs(3)), vec!["one", "two"]);
        assert_eq!(sched.len(), 0);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut sched = Scheduler::new();
        for i in 0..5 {
            sched.add(Duration::from_secs(1), i);
        }

        assert_eq!(sched.poll(Duration::from_secs(1)), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut sched = Scheduler::new();
        let token = sched.add(Duration::from_secs(1), "x");

        assert_eq!(sched.len(), 1);
        sched.cancel(token);
        assert_eq!(sched.len(), 0);
        sched.cancel(token);
        assert_eq!(sched.len(), 0);

        assert!(sched.poll(Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn cancelled_entry_does_not_fire() {
        let mut sched = Scheduler::new();
        let keep = sched.add(Duration::from_secs(1), "keep");
        let drop_me = sched.add(Duration::from_secs(1), "drop");
        sched.cancel(drop_me);

        assert_eq!(sched.poll(Duration::from_secs(1)), vec!["keep"]);
        let _ = keep;
    }

    #[test]
    fn nothing_fires_before_its_deadline() {
        let mut sched = Scheduler::new();
        sched.add(Duration::from_secs(10), "late");

        assert!(sched.poll(Duration::from_secs(5)).is_empty());
        assert_eq!(sched.len(), 1);

        assert_eq!(sched.poll(Duration::from_secs(5)), vec!["late"]);
    }

    #[test]
    fn reentrant_add_with_zero_delay_fires_next_poll() {
        let mut sched = Scheduler::new();
        sched.add(Duration::from_secs(1), "first");

        let fired = sched.poll(Duration::from_secs(1));
        assert_eq!(fired, vec!["first"]);

        // Simulating the reactor's own re-entrant scheduling in response to "first" firing: a
        // zero-delay add lands at exactly `now()`, so it is due on the very next poll call even
        // with zero elapsed time.
        sched.add(Duration::from_secs(0), "second");
        assert_eq!(sched.poll(Duration::from_secs(0)), vec!["second"]);
    }
}
