// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! The per-NS-VC procedure FSM: DEAD → RESETTING → BLOCKED → UNBLOCKED, per
//! spec.md §4.3's state table. Grounded on `fsm::FsmClass` for the runtime
//! machinery and on `original_source/include/osmocom/gprs/gprs_ns.h`'s
//! `struct gprs_nsvc` for the per-instance fields that survive as `NsvcPriv`.
//!
//! The table in spec.md §4.3 is taken as authoritative over the
//! `state`/`remote_state` bitflag pair the original's data model also names:
//! the flags would duplicate what the four-state table already expresses for
//! a single local endpoint, so only the table is implemented.

use std::any::Any;
use std::net::SocketAddr;

use fsm::{FsmClass, FsmRuntime, InstanceId, StateDesc, StateId};
use util::logger::{debug, info, warn};
use util::time::Instant;
use util::rate_ctr::RateCtrGroup;

use crate::ctrs::NsvcCtr;
use crate::mailbox::{Delivery, Mailboxes, NsSignal, OutboundFrame, SignalEvent};
use crate::pdu::{Cause, Pdu};
use crate::timeouts::NsTimeouts;

pub const CLASS_NAME: &str = "ns-vc";

pub const ST_DEAD: StateId = 0;
pub const ST_RESETTING: StateId = 1;
pub const ST_BLOCKED: StateId = 2;
pub const ST_UNBLOCKED: StateId = 3;

pub const EV_START: u8 = 0;
pub const EV_RESET_RX: u8 = 1;
pub const EV_RESET_ACK_RX: u8 = 2;
pub const EV_BLOCK_RX: u8 = 3;
pub const EV_UNBLOCK_RX: u8 = 4;
pub const EV_UNBLOCK_ACK_RX: u8 = 5;
pub const EV_ALIVE_RX: u8 = 6;
pub const EV_ALIVE_ACK_RX: u8 = 7;
pub const EV_UNITDATA_RX: u8 = 8;
pub const EV_UNITDATA_TX: u8 = 9;

static STATES: [StateDesc; 4] = [
    StateDesc {
        name: "DEAD",
        in_event_mask: (1 << EV_START) | (1 << EV_RESET_RX),
        out_state_mask: 1 << ST_RESETTING,
    },
    StateDesc {
        name: "RESETTING",
        in_event_mask: (1 << EV_RESET_RX) | (1 << EV_RESET_ACK_RX),
        out_state_mask: (1 << ST_RESETTING) | (1 << ST_BLOCKED) | (1 << ST_DEAD),
    },
    StateDesc {
        name: "BLOCKED",
        in_event_mask: (1 << EV_UNBLOCK_RX) | (1 << EV_UNBLOCK_ACK_RX) | (1 << EV_BLOCK_RX),
        out_state_mask: (1 << ST_BLOCKED) | (1 << ST_UNBLOCKED) | (1 << ST_RESETTING),
    },
    StateDesc {
        name: "UNBLOCKED",
        in_event_mask: (1 << EV_UNITDATA_RX)
            | (1 << EV_UNITDATA_TX)
            | (1 << EV_BLOCK_RX)
            | (1 << EV_ALIVE_RX)
            | (1 << EV_ALIVE_ACK_RX),
        out_state_mask: (1 << ST_UNBLOCKED) | (1 << ST_DEAD),
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Udp,
    FrGre,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerMode {
    Reset,
    Block,
    Test,
    Alive,
}

/// Incoming-event payload handed to [`FsmRuntime::dispatch`] for every
/// `EV_*_RX` event; `action`/`allstate_action` downcast `&mut dyn Any` to
/// this.
#[derive(Debug, Clone)]
pub enum NsvcEventData {
    None,
    Reset { cause: u8, nsvci: u16, nsei: u16 },
    UnitData { bvci: u16, payload: Vec<u8> },
    Send { bvci: u16, payload: Vec<u8> },
}

pub struct NsvcPriv {
    pub nsei: u16,
    pub nsvci: u16,
    pub remote_addr: SocketAddr,
    pub ll: LinkLayer,
    pub persistent: bool,
    pub remote_is_sgsn: bool,
    pub ctrs: RateCtrGroup<NsvcCtr>,
    timeouts: NsTimeouts,
    timer_mode: TimerMode,
    retries: u8,
    mailboxes: Mailboxes,
}

impl NsvcPriv {
    pub fn new(
        nsei: u16,
        nsvci: u16,
        remote_addr: SocketAddr,
        ll: LinkLayer,
        persistent: bool,
        remote_is_sgsn: bool,
        timeouts: NsTimeouts,
        mailboxes: Mailboxes,
    ) -> NsvcPriv {
        NsvcPriv {
            nsei,
            nsvci,
            remote_addr,
            ll,
            persistent,
            remote_is_sgsn,
            ctrs: RateCtrGroup::new("ns-vc"),
            timeouts,
            timer_mode: TimerMode::Reset,
            retries: 0,
            mailboxes,
        }
    }

    fn send(&mut self, pdu: &Pdu) {
        match pdu.encode() {
            Ok(msg) => {
                self.ctrs.inc(NsvcCtr::PacketsOut);
                self.ctrs.add(NsvcCtr::BytesOut, msg.length() as u64);
                self.mailboxes.outbox.borrow_mut().push_back(OutboundFrame {
                    ll: self.ll,
                    remote: self.remote_addr,
                    bytes: msg.as_slice().to_vec(),
                });
            }
            Err(e) => warn!("failed to encode outgoing NS PDU"; "error" => %e),
        }
    }

    fn raise(&self, signal: NsSignal) {
        self.mailboxes.signals.borrow_mut().push_back(SignalEvent { signal, nsei: self.nsei, nsvci: self.nsvci });
    }
}

/// The class-wide (stateless) FSM behavior table; all mutable state lives in
/// [`NsvcPriv`], downcast from the instance's `priv_data`.
pub struct NsvcFsm;

fn priv_mut<'a>(rt: &'a mut FsmRuntime, id: InstanceId) -> &'a mut NsvcPriv {
    rt.instance_mut(id)
        .and_then(|i| i.priv_mut::<NsvcPriv>())
        .expect("ns-vc instance always carries NsvcPriv")
}

impl FsmClass for NsvcFsm {
    fn name(&self) -> &'static str {
        CLASS_NAME
    }

    fn states(&self) -> &'static [StateDesc] {
        &STATES
    }

    fn event_name(&self, event: u8) -> &'static str {
        match event {
            EV_START => "START",
            EV_RESET_RX => "RESET",
            EV_RESET_ACK_RX => "RESET-ACK",
            EV_BLOCK_RX => "BLOCK",
            EV_UNBLOCK_RX => "UNBLOCK",
            EV_UNBLOCK_ACK_RX => "UNBLOCK-ACK",
            EV_ALIVE_RX => "ALIVE",
            EV_ALIVE_ACK_RX => "ALIVE-ACK",
            EV_UNITDATA_RX => "UNITDATA-IND",
            EV_UNITDATA_TX => "UNITDATA-REQ",
            _ => "?",
        }
    }

    fn action(&self, rt: &mut FsmRuntime, id: InstanceId, state: StateId, event: u8, data: &mut dyn Any) {
        let now = Instant::now();
        let payload = data.downcast_mut::<NsvcEventData>().map(std::mem::take);
        match (state, event) {
            (ST_DEAD, EV_START) => {
                let p = priv_mut(rt, id);
                p.timer_mode = TimerMode::Reset;
                p.retries = 0;
                let (cause, nsvci, nsei) = (Cause::NetworkServiceUnavailable as u8, p.nsvci, p.nsei);
                p.send(&Pdu::Reset { cause, nsvci, nsei });
                let timeout = p.timeouts.tns_reset;
                rt.state_chg(id, ST_RESETTING, Some(timeout), 1, now).ok();
            }
            (ST_DEAD, EV_RESET_RX) => {
                let p = priv_mut(rt, id);
                p.timer_mode = TimerMode::Reset;
                p.retries = 0;
                let (nsvci, nsei) = (p.nsvci, p.nsei);
                p.send(&Pdu::ResetAck { nsvci, nsei });
                p.raise(NsSignal::Reset);
                let timeout = p.timeouts.tns_reset;
                rt.state_chg(id, ST_RESETTING, Some(timeout), 1, now).ok();
            }
            (ST_RESETTING, EV_RESET_RX) => {
                // Idempotent per spec.md §8: no counter change, exactly one reply.
                let p = priv_mut(rt, id);
                let (nsvci, nsei) = (p.nsvci, p.nsei);
                p.send(&Pdu::ResetAck { nsvci, nsei });
            }
            (ST_RESETTING, EV_RESET_ACK_RX) => {
                let p = priv_mut(rt, id);
                p.retries = 0;
                p.timer_mode = TimerMode::Block;
                p.send(&Pdu::Unblock);
                let timeout = p.timeouts.tns_block;
                rt.state_chg(id, ST_BLOCKED, Some(timeout), 2, now).ok();
            }
            (ST_BLOCKED, EV_UNBLOCK_ACK_RX) => {
                let p = priv_mut(rt, id);
                p.retries = 0;
                p.timer_mode = TimerMode::Test;
                p.raise(NsSignal::Unblock);
                let timeout = p.timeouts.tns_test;
                rt.state_chg(id, ST_UNBLOCKED, Some(timeout), 3, now).ok();
            }
            (ST_BLOCKED, EV_UNBLOCK_RX) => {
                priv_mut(rt, id).send(&Pdu::UnblockAck);
            }
            (ST_BLOCKED, EV_BLOCK_RX) => {
                let p = priv_mut(rt, id);
                p.send(&Pdu::BlockAck);
                p.raise(NsSignal::Block);
            }
            (ST_UNBLOCKED, EV_UNITDATA_TX) => {
                if let Some(NsvcEventData::Send { bvci, payload }) = payload {
                    priv_mut(rt, id).send(&Pdu::UnitData { bvci, payload });
                }
            }
            (ST_UNBLOCKED, EV_UNITDATA_RX) => {
                if let Some(NsvcEventData::UnitData { bvci, payload }) = payload {
                    let p = priv_mut(rt, id);
                    p.ctrs.inc(NsvcCtr::PacketsIn);
                    p.ctrs.add(NsvcCtr::BytesIn, payload.len() as u64);
                    p.mailboxes.deliveries.borrow_mut().push_back(Delivery { nsvc: id, bvci, payload });
                }
            }
            (ST_UNBLOCKED, EV_BLOCK_RX) => {
                priv_mut(rt, id).send(&Pdu::BlockAck);
            }
            (ST_UNBLOCKED, EV_ALIVE_RX) => {
                priv_mut(rt, id).send(&Pdu::AliveAck);
            }
            (ST_UNBLOCKED, EV_ALIVE_ACK_RX) => {
                let p = priv_mut(rt, id);
                p.retries = 0;
                p.timer_mode = TimerMode::Test;
                let timeout = p.timeouts.tns_test;
                rt.state_chg(id, ST_UNBLOCKED, Some(timeout), 3, now).ok();
            }
            _ => {
                debug!("ns-vc action reached unhandled (state, event) pair";
                    "state" => STATES[state as usize].name, "event" => self.event_name(event));
            }
        }
    }

    fn cleanup(&self, rt: &mut FsmRuntime, id: InstanceId, cause: fsm::TermCause) {
        let p = priv_mut(rt, id);
        info!("ns-vc terminated"; "nsei" => p.nsei, "nsvci" => p.nsvci, "cause" => ?cause);
    }

    fn timer_expired(&self, rt: &mut FsmRuntime, id: InstanceId) -> bool {
        let now = Instant::now();
        let mode = priv_mut(rt, id).timer_mode;
        match mode {
            TimerMode::Reset => {
                let p = priv_mut(rt, id);
                p.retries += 1;
                if p.retries < p.timeouts.tns_reset_retries {
                    let (cause, nsvci, nsei) = (Cause::NetworkServiceUnavailable as u8, p.nsvci, p.nsei);
                    p.send(&Pdu::Reset { cause, nsvci, nsei });
                    let timeout = p.timeouts.tns_reset;
                    rt.state_chg(id, ST_RESETTING, Some(timeout), 1, now).ok();
                } else {
                    let persistent = p.persistent;
                    p.retries = 0;
                    rt.state_chg(id, ST_DEAD, None, 0, now).ok();
                    if persistent {
                        rt.dispatch(id, EV_START, &mut NsvcEventData::None);
                    }
                }
            }
            TimerMode::Block => {
                let p = priv_mut(rt, id);
                p.retries += 1;
                if p.retries < p.timeouts.tns_block_retries {
                    p.send(&Pdu::Unblock);
                    let timeout = p.timeouts.tns_block;
                    rt.state_chg(id, ST_BLOCKED, Some(timeout), 2, now).ok();
                } else {
                    p.retries = 0;
                    p.timer_mode = TimerMode::Reset;
                    let (cause, nsvci, nsei) = (Cause::NetworkServiceUnavailable as u8, p.nsvci, p.nsei);
                    p.send(&Pdu::Reset { cause, nsvci, nsei });
                    let timeout = p.timeouts.tns_reset;
                    rt.state_chg(id, ST_RESETTING, Some(timeout), 1, now).ok();
                }
            }
            TimerMode::Test => {
                let p = priv_mut(rt, id);
                p.timer_mode = TimerMode::Alive;
                p.retries = 0;
                p.send(&Pdu::Alive);
                let timeout = p.timeouts.tns_alive;
                rt.state_chg(id, ST_UNBLOCKED, Some(timeout), 4, now).ok();
            }
            TimerMode::Alive => {
                let p = priv_mut(rt, id);
                p.retries += 1;
                if p.retries < p.timeouts.tns_alive_retries {
                    p.send(&Pdu::Alive);
                    let timeout = p.timeouts.tns_alive;
                    rt.state_chg(id, ST_UNBLOCKED, Some(timeout), 4, now).ok();
                } else {
                    let persistent = p.persistent;
                    p.retries = 0;
                    p.timer_mode = TimerMode::Reset;
                    p.raise(NsSignal::AliveExpired);
                    rt.state_chg(id, ST_DEAD, None, 0, now).ok();
                    if persistent {
                        rt.dispatch(id, EV_START, &mut NsvcEventData::None);
                    }
                }
            }
        }
        false
    }
}

impl Default for NsvcEventData {
    fn default() -> Self {
        NsvcEventData::None
    }
}
