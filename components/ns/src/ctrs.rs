// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

use util::rate_ctr::CtrIndex;

/// Per-Nsvc counters, matching the fields `rate_ctr_group` tracks for a
/// `gprs_nsvc` in `original_source/` plus the `DISCARDED` counter spec.md
/// §4.3/§7 calls out for malformed-PDU drops.
#[derive(Debug, Clone, Copy)]
pub enum NsvcCtr {
    PacketsIn,
    PacketsOut,
    BytesIn,
    BytesOut,
    Blocked,
    Discarded,
}

impl CtrIndex for NsvcCtr {
    const ALL: &'static [Self] = &[
        NsvcCtr::PacketsIn,
        NsvcCtr::PacketsOut,
        NsvcCtr::BytesIn,
        NsvcCtr::BytesOut,
        NsvcCtr::Blocked,
        NsvcCtr::Discarded,
    ];

    fn index(self) -> usize {
        match self {
            NsvcCtr::PacketsIn => 0,
            NsvcCtr::PacketsOut => 1,
            NsvcCtr::BytesIn => 2,
            NsvcCtr::BytesOut => 3,
            NsvcCtr::Blocked => 4,
            NsvcCtr::Discarded => 5,
        }
    }

    fn name(self) -> &'static str {
        match self {
            NsvcCtr::PacketsIn => "packets_in",
            NsvcCtr::PacketsOut => "packets_out",
            NsvcCtr::BytesIn => "bytes_in",
            NsvcCtr::BytesOut => "bytes_out",
            NsvcCtr::Blocked => "blocked",
            NsvcCtr::Discarded => "discarded",
        }
    }
}
