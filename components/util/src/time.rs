// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! A monotonic instant, decoupled from `std::time::Instant` so the timer
//! service and the FSM/NS/BSSGP crates above it share one clock type. This is
//! the Rust analogue of the spec's `Monotonic` type: `CLOCK_MONOTONIC`, never
//! affected by wall-clock adjustments.

use std::time::{Duration, Instant as StdInstant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(StdInstant);

impl Instant {
    pub fn now() -> Instant {
        Instant(StdInstant::now())
    }

    /// Saturating forward shift; used to compute a future deadline.
    pub fn checked_add(self, d: Duration) -> Option<Instant> {
        self.0.checked_add(d).map(Instant)
    }

    /// `self - earlier`, saturating to zero instead of panicking if the
    /// ordering assumption turns out to be wrong (clock hiccup, test clock).
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    pub fn saturating_elapsed(self) -> Duration {
        Instant::now().saturating_duration_since(self)
    }
}
