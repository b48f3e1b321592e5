// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

use util::rate_ctr::CtrIndex;

/// Per-bucket flow-control counters (spec.md §4.4): packets/bytes offered,
/// packets/bytes actually let through, and the two back-pressure signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcCtr {
    PacketsIn,
    PacketsOut,
    BytesIn,
    BytesOut,
    Blocked,
    Discarded,
}

impl CtrIndex for FcCtr {
    const ALL: &'static [Self] = &[
        FcCtr::PacketsIn,
        FcCtr::PacketsOut,
        FcCtr::BytesIn,
        FcCtr::BytesOut,
        FcCtr::Blocked,
        FcCtr::Discarded,
    ];

    fn index(self) -> usize {
        match self {
            FcCtr::PacketsIn => 0,
            FcCtr::PacketsOut => 1,
            FcCtr::BytesIn => 2,
            FcCtr::BytesOut => 3,
            FcCtr::Blocked => 4,
            FcCtr::Discarded => 5,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FcCtr::PacketsIn => "packets_in",
            FcCtr::PacketsOut => "packets_out",
            FcCtr::BytesIn => "bytes_in",
            FcCtr::BytesOut => "bytes_out",
            FcCtr::Blocked => "blocked",
            FcCtr::Discarded => "discarded",
        }
    }
}
