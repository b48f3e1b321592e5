// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! A single-threaded timer wheel, grounded on
//! `original_source/src/shared/libosmocore/src/timer.c`: an ordered set keyed
//! on absolute expiry (there: a red-black tree; here: a `BTreeMap`), a
//! `nearest()` query for a select-style I/O loop, and an `expire()` call that
//! fires everything due in deadline order.
//!
//! The C original stores the callback inside the timer node itself and calls
//! it directly from `osmo_timers_update()`. That does not translate cleanly:
//! the callback needs `&mut` access to whatever structure owns the timer
//! (an FSM instance, an `Nsvc`, a flow-control bucket), and the wheel cannot
//! hold that borrow across the dispatch. Instead, per DESIGN.md, [`TimerWheel`]
//! is generic over an opaque, `Copy + Eq + Hash` key `K` supplied by the
//! owner; `expire()` returns the keys that fired, already snapshotted into a
//! `Vec`, so the caller dispatches into its own structures after the wheel's
//! borrow has ended. This sidesteps the re-entrancy hazard the original
//! handles with an eviction list: re-arming or cancelling a timer from inside
//! a "callback" (which is just the caller's own loop body now) can never
//! observe a half-mutated wheel, because the wheel isn't borrowed during
//! dispatch at all.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::time::Duration;

use util::time::Instant;
use util::HashMap;

/// A timer wheel scheduling opaque keys `K` for future expiry. `K` is
/// typically a small `Copy` id (an FSM instance id, an `Nsvc` id) rather than
/// the callback itself.
pub struct TimerWheel<K> {
    by_deadline: BTreeMap<(Instant, u64), K>,
    by_key: HashMap<K, (Instant, u64)>,
    next_seq: u64,
}

impl<K> Default for TimerWheel<K>
where
    K: Copy + Eq + Hash,
{
    fn default() -> Self {
        TimerWheel {
            by_deadline: BTreeMap::new(),
            by_key: HashMap::default(),
            next_seq: 0,
        }
    }
}

impl<K> TimerWheel<K>
where
    K: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `key` to fire `delay` from `now`. Re-scheduling an
    /// already-scheduled key first cancels the previous entry, matching
    /// `osmo_timer_add()`'s call to `osmo_timer_del()` before inserting.
    pub fn schedule(&mut self, key: K, now: Instant, delay: Duration) {
        self.cancel(key);
        let deadline = now.checked_add(delay).unwrap_or(now);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_deadline.insert((deadline, seq), key);
        self.by_key.insert(key, (deadline, seq));
    }

    /// Idempotent: cancelling a key that isn't scheduled is a no-op.
    pub fn cancel(&mut self, key: K) {
        if let Some(slot) = self.by_key.remove(&key) {
            self.by_deadline.remove(&slot);
        }
    }

    pub fn is_scheduled(&self, key: K) -> bool {
        self.by_key.contains_key(&key)
    }

    /// Duration until the next expiry, `Some(Duration::ZERO)` if one is
    /// already due, `None` if nothing is scheduled. Feeds directly into a
    /// `poll`/`select` timeout, matching `osmo_timers_nearest()`.
    pub fn nearest(&self, now: Instant) -> Option<Duration> {
        self.by_deadline.keys().next().map(|(deadline, _)| {
            if *deadline <= now {
                Duration::ZERO
            } else {
                deadline.saturating_duration_since(now)
            }
        })
    }

    /// Removes and returns every key whose deadline is `<= now`, in deadline
    /// order (ties broken by scheduling order), as an up-front snapshot so
    /// the caller can freely re-schedule or cancel any timer — including the
    /// one currently being dispatched — while iterating the result.
    pub fn expire(&mut self, now: Instant) -> Vec<K> {
        let due: Vec<(Instant, u64)> = self
            .by_deadline
            .range(..=(now, u64::MAX))
            .map(|(k, _)| *k)
            .collect();
        let mut fired = Vec::with_capacity(due.len());
        for slot in due {
            if let Some(key) = self.by_deadline.remove(&slot) {
                self.by_key.remove(&key);
                fired.push(key);
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.by_deadline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_then_expire_in_deadline_order() {
        let mut w: TimerWheel<u32> = TimerWheel::new();
        let t0 = Instant::now();
        w.schedule(2, t0, Duration::from_millis(20));
        w.schedule(1, t0, Duration::from_millis(10));
        w.schedule(3, t0, Duration::from_millis(30));

        assert_eq!(w.nearest(t0), Some(Duration::from_millis(10)));
        let later = t0.checked_add(Duration::from_millis(25)).unwrap();
        assert_eq!(w.expire(later), vec![1, 2]);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn rescheduling_cancels_previous_entry() {
        let mut w: TimerWheel<&str> = TimerWheel::new();
        let t0 = Instant::now();
        w.schedule("a", t0, Duration::from_millis(5));
        w.schedule("a", t0, Duration::from_millis(50));
        assert_eq!(w.len(), 1);
        let soon = t0.checked_add(Duration::from_millis(10)).unwrap();
        assert!(w.expire(soon).is_empty());
        assert_eq!(w.nearest(t0), Some(Duration::from_millis(50)));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut w: TimerWheel<u8> = TimerWheel::new();
        w.cancel(9);
        let t0 = Instant::now();
        w.schedule(9, t0, Duration::from_secs(1));
        w.cancel(9);
        w.cancel(9);
        assert!(w.is_empty());
    }

    #[test]
    fn nearest_is_zero_when_already_due() {
        let mut w: TimerWheel<u8> = TimerWheel::new();
        let t0 = Instant::now();
        w.schedule(1, t0, Duration::from_millis(1));
        let later = t0.checked_add(Duration::from_millis(50)).unwrap();
        assert_eq!(w.nearest(later), Some(Duration::ZERO));
    }
}
