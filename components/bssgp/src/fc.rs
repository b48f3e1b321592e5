// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! The leaky-bucket downlink flow-control algorithm (spec.md §4.4), grounded
//! on `original_source/openbsc/src/gprs/gprs_bssgp_fc.c`. One [`FlowControl`]
//! models a single bucket; both the per-MS and per-BVC buckets in
//! [`crate::bvc`] are instances of the same type, chained together rather
//! than special-cased.
//!
//! Bucket algebra: a bucket holds `bucket_counter` octets, which leaks away
//! at `leak_rate` octets/second. [`FlowControl::offer`] drains the bucket for
//! the elapsed time since the last PDU, then either admits the new PDU
//! (counter += len) or queues it if admitting it would overflow
//! `bucket_size_max`. A queue beyond `max_queue_depth` drops its oldest
//! entry — never the newest — and counts it as [`FcCtr::Discarded`].

use std::collections::VecDeque;
use std::time::Duration;

use util::rate_ctr::RateCtrGroup;
use util::time::Instant;

use crate::ctrs::FcCtr;

/// One PDU waiting in a bucket's queue. `llc_len` is the upper-layer LLC
/// payload length, carried alongside the network-level `payload` because
/// spec.md's bucket accounting and the eventual NS-VC delivery address two
/// different lengths (the BSSGP+LLC octet count vs. the LLC PDU alone).
#[derive(Debug, Clone)]
pub struct PendingPdu {
    pub payload: Vec<u8>,
    pub llc_len: u32,
}

impl PendingPdu {
    fn octets(&self) -> u32 {
        self.payload.len() as u32
    }
}

#[derive(Debug, Clone)]
pub struct FlowControl {
    pub bucket_size_max: u32,
    /// Octets/second the bucket leaks at. Zero means the bucket never
    /// drains: offered PDUs queue until `max_queue_depth` is reached, then
    /// the oldest is dropped on every further arrival (tested in
    /// `zero_leak_rate_never_drains`).
    pub leak_rate: u32,
    pub max_queue_depth: u32,
    bucket_counter: u32,
    time_last_pdu: Option<Instant>,
    queue: VecDeque<PendingPdu>,
    timer_deadline: Option<Instant>,
    pub ctrs: RateCtrGroup<FcCtr>,
}

impl FlowControl {
    pub fn new(name: &'static str, bucket_size_max: u32, leak_rate: u32, max_queue_depth: u32) -> Self {
        FlowControl {
            bucket_size_max,
            leak_rate,
            max_queue_depth,
            bucket_counter: 0,
            time_last_pdu: None,
            queue: VecDeque::new(),
            timer_deadline: None,
            ctrs: RateCtrGroup::new(name),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn is_timer_scheduled(&self) -> bool {
        self.timer_deadline.is_some()
    }

    /// Time remaining until this bucket's timer is next due, if one is
    /// scheduled. `Duration::ZERO` if already due or overdue.
    pub fn nearest(&self, now: Instant) -> Option<Duration> {
        self.timer_deadline.map(|due| due.saturating_duration_since(now))
    }

    fn drain(&mut self, now: Instant) -> u32 {
        let elapsed = self.time_last_pdu.map(|t| now.saturating_duration_since(t)).unwrap_or(Duration::ZERO);
        let leaked = (self.leak_rate as u64 * elapsed.as_micros() as u64) / 1_000_000;
        self.bucket_counter = self.bucket_counter.saturating_sub(leaked as u32);
        self.time_last_pdu = Some(now);
        self.bucket_counter
    }

    fn delay_for(needed_octets: u32, leak_rate: u32) -> Duration {
        if leak_rate == 0 || needed_octets == 0 {
            return Duration::ZERO;
        }
        let micros = (needed_octets as u64 * 1_000_000 + leak_rate as u64 - 1) / leak_rate as u64;
        Duration::from_micros(micros)
    }

    /// Offers one PDU to the bucket at `now`. Returns `Some(pdu)` if it was
    /// admitted immediately (the caller should forward it on), or `None` if
    /// it was queued (the caller should wait for [`FlowControl::expire`]).
    pub fn offer(&mut self, now: Instant, pdu: PendingPdu) -> Option<PendingPdu> {
        self.ctrs.inc(FcCtr::PacketsIn);
        self.ctrs.add(FcCtr::BytesIn, pdu.octets() as u64);

        let drained = self.drain(now);
        if drained + pdu.octets() <= self.bucket_size_max {
            self.bucket_counter = drained + pdu.octets();
            self.ctrs.inc(FcCtr::PacketsOut);
            self.ctrs.add(FcCtr::BytesOut, pdu.octets() as u64);
            return Some(pdu);
        }

        self.ctrs.inc(FcCtr::Blocked);
        if self.queue.len() as u32 >= self.max_queue_depth {
            self.queue.pop_front();
            self.ctrs.inc(FcCtr::Discarded);
        }
        let needed = pdu.octets().saturating_sub(self.bucket_size_max.saturating_sub(drained));
        self.queue.push_back(pdu);
        if self.timer_deadline.is_none() && self.leak_rate > 0 {
            let delta = Self::delay_for(needed, self.leak_rate);
            self.timer_deadline = now.checked_add(delta);
        }
        None
    }

    /// Called when this bucket's timer fires: drains whatever the bucket can
    /// now admit from the head of the queue, in order, and reschedules for
    /// whatever remains.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingPdu> {
        let mut emitted = Vec::new();
        loop {
            let drained = self.drain(now);
            match self.queue.front() {
                Some(head) if drained + head.octets() <= self.bucket_size_max => {
                    let pdu = self.queue.pop_front().unwrap();
                    self.bucket_counter = drained + pdu.octets();
                    self.ctrs.inc(FcCtr::PacketsOut);
                    self.ctrs.add(FcCtr::BytesOut, pdu.octets() as u64);
                    emitted.push(pdu);
                }
                _ => break,
            }
        }

        self.timer_deadline = None;
        if let Some(head) = self.queue.front() {
            let drained = self.bucket_counter;
            let needed = head.octets().saturating_sub(self.bucket_size_max.saturating_sub(drained));
            if self.leak_rate > 0 {
                self.timer_deadline = now.checked_add(Self::delay_for(needed, self.leak_rate));
            }
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdu(len: usize) -> PendingPdu {
        PendingPdu { payload: vec![0u8; len], llc_len: len as u32 }
    }

    /// Scenario 4 (spec.md §8): traffic under the leak rate is always
    /// admitted immediately, queue stays empty.
    #[test]
    fn under_rate_traffic_is_admitted_immediately() {
        let mut fc = FlowControl::new("test", 2000, 1000, 4);
        let now = Instant::now();
        for _ in 0..5 {
            let admitted = fc.offer(now, pdu(100));
            assert!(admitted.is_some());
        }
        assert_eq!(fc.queue_depth(), 0);
        assert!(!fc.is_timer_scheduled());
    }

    /// Scenario 5 (spec.md §8): a burst that exceeds `bucket_size_max` queues
    /// the overflow and dequeues it on a schedule paced by `leak_rate`.
    #[test]
    fn over_rate_burst_queues_and_dequeues_on_schedule() {
        let mut fc = FlowControl::new("test", 500, 500, 8);
        let mut now = Instant::now();
        // Bucket starts empty; a burst of 5x500-octet PDUs back to back.
        for _ in 0..5 {
            fc.offer(now, pdu(500));
        }
        // First fits (0+500<=500); rest queue.
        assert_eq!(fc.queue_depth(), 4);
        assert!(fc.is_timer_scheduled());

        // At 500 octets/s, draining 500 octets takes 1s; each subsequent
        // 500-octet PDU needs another full second once the bucket is full.
        for expected_emitted in 1..=4 {
            let due = fc.nearest(now).unwrap();
            now = now.checked_add(due).unwrap();
            let emitted = fc.expire(now);
            assert_eq!(emitted.len(), 1, "round {expected_emitted}");
        }
        assert_eq!(fc.queue_depth(), 0);
        assert!(!fc.is_timer_scheduled());
    }

    /// Scenario 6 (spec.md §8): overflow beyond `max_queue_depth` drops the
    /// oldest queued entry and counts it as discarded.
    #[test]
    fn queue_overflow_drops_oldest_and_counts_discarded() {
        let mut fc = FlowControl::new("test", 100, 100, 2);
        let now = Instant::now();
        fc.offer(now, pdu(100)); // fills the bucket exactly, admitted
        fc.offer(now, pdu(50)); // queued (1/2)
        fc.offer(now, pdu(60)); // queued (2/2)
        fc.offer(now, pdu(70)); // queue full: drops the 50-octet entry, queues the 70

        assert_eq!(fc.queue_depth(), 2);
        assert_eq!(fc.ctrs.get(FcCtr::Discarded), 1);
    }

    #[test]
    fn zero_leak_rate_never_drains() {
        let mut fc = FlowControl::new("test", 100, 0, 2);
        let now = Instant::now();
        fc.offer(now, pdu(100));
        fc.offer(now, pdu(10));
        assert_eq!(fc.queue_depth(), 1);
        assert!(!fc.is_timer_scheduled());
        let later = now.checked_add(Duration::from_secs(3600)).unwrap();
        assert!(fc.expire(later).is_empty());
        assert_eq!(fc.queue_depth(), 1);
    }
}
