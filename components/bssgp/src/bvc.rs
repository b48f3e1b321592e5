// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! A BVC (BSSGP Virtual Connection) context: one cell's downlink flow
//! control state, found by either `(ra_id, cell_id)` or `(bvci, nsei)` —
//! spec.md §3's data model requires both indexes to agree, which
//! [`crate::instance::BssgpInstance`] enforces by construction (both are
//! populated from the single [`BvcContext::new`] call, never independently).

use crate::fc::FlowControl;

/// GSM routing area identity: MCC/MNC/LAC/RAC, the four fields that
/// together with a cell id address one BSS cell (spec.md GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingAreaId {
    pub mcc: u16,
    pub mnc: u16,
    pub lac: u16,
    pub rac: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvcState {
    Unblocked,
    Blocked,
}

pub struct BvcContext {
    pub ra_id: RoutingAreaId,
    pub cell_id: u16,
    pub bvci: u16,
    pub nsei: u16,
    pub state: BvcState,
    pub fc: FlowControl,
    pub bmax_default_ms: u32,
    pub r_default_ms: u32,
}

impl BvcContext {
    pub fn new(ra_id: RoutingAreaId, cell_id: u16, bvci: u16, nsei: u16, bucket_size_max: u32, leak_rate: u32, max_queue_depth: u32) -> Self {
        BvcContext {
            ra_id,
            cell_id,
            bvci,
            nsei,
            state: BvcState::Blocked,
            fc: FlowControl::new("bvc", bucket_size_max, leak_rate, max_queue_depth),
            bmax_default_ms: bucket_size_max,
            r_default_ms: leak_rate,
        }
    }

    pub fn is_unblocked(&self) -> bool {
        self.state == BvcState::Unblocked
    }
}

/// A per-MS bucket, keyed by TLLI (Temporary Logical Link Identity). Not
/// named as a distinct type in spec.md's data model, which only speaks of
/// "each MS has its own bucket" — this is the minimal concrete type that
/// statement requires, composed with a [`BvcContext`]'s bucket exactly like
/// any other `FlowControl` chain stage (spec.md §4.4's "MS bucket feeds BVC
/// bucket").
pub struct MsContext {
    pub tlli: u32,
    pub bvci: u16,
    pub nsei: u16,
    pub fc: FlowControl,
}

impl MsContext {
    pub fn new(tlli: u32, bvci: u16, nsei: u16, bucket_size_max: u32, leak_rate: u32, max_queue_depth: u32) -> Self {
        MsContext { tlli, bvci, nsei, fc: FlowControl::new("ms", bucket_size_max, leak_rate, max_queue_depth) }
    }
}
