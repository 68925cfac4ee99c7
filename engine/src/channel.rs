//! Multi-input rendezvous channel: synchronizes `K` producers with one
//! consumer. Every producer pushes exactly once per activation; the
//! consumer unblocks only after all `K` have pushed, then releases the
//! producers for the next activation.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Upper bound on a channel's fan-in, fixed by the width of the
/// `arrived` bitmask. Configurable by widening the mask type, not a
/// structural limit.
pub const MAX_FAN_IN: usize = 64;

/// How often a blocked `push`/`pop` re-checks the stop flag. Bounds
/// cancellation latency without needing the stop flag itself to be
/// wired into every channel's condvars.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct ChannelState {
    arrived: u64,
    waiting: [u32; MAX_FAN_IN],
}

/// A `capacity`-input rendezvous point. Exactly one consumer thread may
/// call `pop`; up to `capacity` distinct producer threads may call
/// `push`, at most one per slot index.
pub struct RendezvousChannel {
    capacity: usize,
    full_mask: u64,
    state: Mutex<ChannelState>,
    consumer_cond: Condvar,
    producer_conds: Vec<Condvar>,
}

impl RendezvousChannel {
    /// `capacity` must be at least 1 (the channel for a task with no
    /// predecessors is built with capacity 1 as a placeholder and must
    /// never have `pop` called on it — see `engine::dag::START_GATE_CAPACITY`).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "rendezvous channel capacity must be at least 1");
        assert!(
            capacity <= MAX_FAN_IN,
            "rendezvous channel capacity {capacity} exceeds MAX_FAN_IN {MAX_FAN_IN}"
        );
        let full_mask = if capacity == 64 { u64::MAX } else { (1u64 << capacity) - 1 };
        Self {
            capacity,
            full_mask,
            state: Mutex::new(ChannelState { arrived: 0, waiting: [0; MAX_FAN_IN] }),
            consumer_cond: Condvar::new(),
            producer_conds: (0..capacity).map(|_| Condvar::new()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish slot `i`. Returns `Some(true)` iff this call caused all
    /// slots to be simultaneously filled (i.e. it is the push that
    /// unblocks the consumer), `Some(false)` if other slots are still
    /// outstanding, or `None` if `stop` was observed before slot `i`
    /// became available. Blocks while slot `i` is still set from a prior
    /// activation that the consumer has not yet popped.
    pub fn push(&self, i: usize, stop: &AtomicBool) -> Option<bool> {
        assert!(i < self.capacity, "slot index {i} out of range for capacity {}", self.capacity);
        let bit = 1u64 << i;
        let mut state = self.state.lock().unwrap();
        while state.arrived & bit != 0 {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            state.waiting[i] += 1;
            let (s, _) = self.producer_conds[i].wait_timeout(state, STOP_POLL_INTERVAL).unwrap();
            state = s;
            state.waiting[i] -= 1;
        }
        state.arrived |= bit;
        let notified = state.arrived == self.full_mask;
        if notified {
            self.consumer_cond.notify_one();
        }
        Some(notified)
    }

    /// Block until every slot has been filled for this activation, then
    /// clear all slots and wake exactly the producers that were waiting
    /// for the clear (never relies on a broadcast across all slots).
    /// Returns `false` without clearing anything if `stop` was observed
    /// first.
    pub fn pop(&self, stop: &AtomicBool) -> bool {
        assert!(self.capacity > 0, "pop() must not be called on a zero-capacity channel");
        let mut state = self.state.lock().unwrap();
        while state.arrived != self.full_mask {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            let (s, _) = self.consumer_cond.wait_timeout(state, STOP_POLL_INTERVAL).unwrap();
            state = s;
        }
        state.arrived = 0;
        for i in 0..self.capacity {
            if state.waiting[i] > 0 {
                self.producer_conds[i].notify_one();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn running() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn single_slot_push_unblocks_immediately() {
        let ch = RendezvousChannel::new(1);
        assert_eq!(ch.push(0, &running()), Some(true));
    }

    #[test]
    fn two_slots_only_second_push_notifies() {
        let ch = RendezvousChannel::new(2);
        assert_eq!(ch.push(0, &running()), Some(false));
        assert_eq!(ch.push(1, &running()), Some(true));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_slot_panics() {
        let ch = RendezvousChannel::new(2);
        ch.push(5, &running());
    }

    #[test]
    #[should_panic]
    fn zero_capacity_rejected_at_construction() {
        RendezvousChannel::new(0);
    }

    #[test]
    fn pop_blocks_until_all_slots_filled_then_clears() {
        let ch = Arc::new(RendezvousChannel::new(3));
        let consumer = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.pop(&running()))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!consumer.is_finished());
        ch.push(0, &running());
        ch.push(1, &running());
        thread::sleep(Duration::from_millis(20));
        assert!(!consumer.is_finished());
        ch.push(2, &running());
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn blocked_producer_wakes_without_broadcast() {
        let ch = Arc::new(RendezvousChannel::new(1));
        ch.push(0, &running()); // fill the single slot; channel is now "full"

        let producer = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                // blocks because slot 0 is still set
                ch.push(0, &running())
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!producer.is_finished());

        ch.pop(&running()); // clears the slot and must wake the blocked producer
        let notified = producer.join().unwrap();
        assert_eq!(notified, Some(true));
    }

    #[test]
    fn repeated_activations_alternate_push_and_pop() {
        let ch = Arc::new(RendezvousChannel::new(2));
        for _ in 0..50 {
            let a = {
                let ch = Arc::clone(&ch);
                thread::spawn(move || ch.push(0, &running()))
            };
            let b = {
                let ch = Arc::clone(&ch);
                thread::spawn(move || ch.push(1, &running()))
            };
            a.join().unwrap();
            b.join().unwrap();
            ch.pop(&running());
        }
    }

    #[test]
    fn stop_flag_releases_a_blocked_pop() {
        let ch = Arc::new(RendezvousChannel::new(2));
        let stop = Arc::new(AtomicBool::new(false));
        let consumer = {
            let ch = Arc::clone(&ch);
            let stop = Arc::clone(&stop);
            thread::spawn(move || ch.pop(&stop))
        };
        thread::sleep(Duration::from_millis(10));
        assert!(!consumer.is_finished());
        stop.store(true, Ordering::Relaxed);
        assert!(!consumer.join().unwrap());
    }

    #[test]
    fn stop_flag_releases_a_blocked_push() {
        let ch = Arc::new(RendezvousChannel::new(1));
        ch.push(0, &running());
        let stop = Arc::new(AtomicBool::new(false));
        let producer = {
            let ch = Arc::clone(&ch);
            let stop = Arc::clone(&stop);
            thread::spawn(move || ch.push(0, &stop))
        };
        thread::sleep(Duration::from_millis(10));
        assert!(!producer.is_finished());
        stop.store(true, Ordering::Relaxed);
        assert_eq!(producer.join().unwrap(), None);
    }
}
