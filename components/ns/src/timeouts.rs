// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

use std::time::Duration;

/// The four `Tns-*` timers plus their retry counts (spec.md §4.3,
/// `NS_TIMERS_COUNT` in `original_source/include/osmocom/gprs/gprs_ns.h`).
/// Loaded once into a `gsm_config::StackConfig` and copied into every Nsvc at
/// creation time; never hot-reloaded (see SPEC_FULL.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsTimeouts {
    pub tns_block: Duration,
    pub tns_block_retries: u8,
    pub tns_reset: Duration,
    pub tns_reset_retries: u8,
    pub tns_test: Duration,
    pub tns_alive: Duration,
    pub tns_alive_retries: u8,
}

impl Default for NsTimeouts {
    fn default() -> Self {
        NsTimeouts {
            tns_block: Duration::from_secs(3),
            tns_block_retries: 3,
            tns_reset: Duration::from_secs(3),
            tns_reset_retries: 3,
            tns_test: Duration::from_secs(30),
            tns_alive: Duration::from_secs(3),
            tns_alive_retries: 3,
        }
    }
}
