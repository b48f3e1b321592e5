// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! `NsInstance`: one local NS endpoint owning a set of [`Nsvc`]s, grounded on
//! `original_source/include/osmocom/gprs/gprs_ns.h`'s `struct gprs_ns_inst`.
//!
//! This is the "process-wide runtime handle" spec.md §9 asks for: it wraps
//! one [`FsmRuntime`], the NSEI/NSVCI indices, the sentinel used to answer
//! packets from an unrecognized NS-VC, and the three mailboxes NS-VC actions
//! write into (see `mailbox`). Every public method that dispatches into the
//! FSM drains those mailboxes before returning, so callers never observe a
//! half-flushed instance.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use collections::HashMap;
use fsm::{FsmRuntime, InstanceId};
use util::logger::warn;
use util::time::Instant;

use crate::error::NsError;
use crate::mailbox::{Delivery, Mailboxes, NsSignal, OutboundFrame, SignalEvent};
use crate::nsvc::{
    LinkLayer, NsvcEventData, NsvcFsm, NsvcPriv, CLASS_NAME, EV_ALIVE_ACK_RX, EV_ALIVE_RX, EV_BLOCK_RX,
    EV_RESET_ACK_RX, EV_RESET_RX, EV_START, EV_UNBLOCK_ACK_RX, EV_UNBLOCK_RX, EV_UNITDATA_RX, EV_UNITDATA_TX,
};
use crate::pdu::{Cause, Pdu};
use crate::timeouts::NsTimeouts;

/// `event ∈ {UNIT_DATA}` delivered to the upper (BSSGP) layer, per spec.md §6.
pub struct UnitDataInd {
    pub nsei: u16,
    pub bvci: u16,
    pub payload: Vec<u8>,
}

pub struct NsInstance {
    fsm: FsmRuntime,
    by_nsvci: HashMap<u16, InstanceId>,
    by_nsei: HashMap<u16, InstanceId>,
    timeouts: NsTimeouts,
    mailboxes: Mailboxes,
    pending_indications: VecDeque<UnitDataInd>,
    pending_signals: VecDeque<SignalEvent>,
}

impl NsInstance {
    pub fn new(timeouts: NsTimeouts) -> NsInstance {
        let mut fsm = FsmRuntime::new();
        fsm.register_class(Arc::new(NsvcFsm)).expect("fresh FsmRuntime has no classes registered yet");
        NsInstance {
            fsm,
            by_nsvci: HashMap::default(),
            by_nsei: HashMap::default(),
            timeouts,
            mailboxes: Mailboxes::new(),
            pending_indications: VecDeque::new(),
            pending_signals: VecDeque::new(),
        }
    }

    /// Creates a new NS-VC and immediately starts its RESET procedure
    /// (`EV_START`), matching `gprs_nsvc_create` + `gprs_nsvc_reset` in the
    /// original.
    pub fn nsvc_create(
        &mut self,
        nsei: u16,
        nsvci: u16,
        remote_addr: SocketAddr,
        ll: LinkLayer,
        persistent: bool,
        remote_is_sgsn: bool,
    ) -> InstanceId {
        let priv_data = NsvcPriv::new(
            nsei,
            nsvci,
            remote_addr,
            ll,
            persistent,
            remote_is_sgsn,
            self.timeouts,
            self.mailboxes.clone(),
        );
        let id = self
            .fsm
            .inst_alloc(CLASS_NAME, format!("nsvc-{nsvci}"), Box::new(priv_data))
            .expect("ns-vc class is always registered");
        self.by_nsvci.insert(nsvci, id);
        self.by_nsei.insert(nsei, id);
        self.fsm.dispatch(id, EV_START, &mut NsvcEventData::None);
        self.drain_mailboxes();
        id
    }

    /// Destroys a non-persistent NS-VC, e.g. once it is reapable after
    /// exhausting alive retries. Equivalent to `gprs_nsvc_delete`.
    pub fn nsvc_destroy(&mut self, id: InstanceId) {
        if let Some(inst) = self.fsm.instance(id) {
            if let Some(p) = inst.priv_ref::<NsvcPriv>() {
                self.by_nsvci.remove(&p.nsvci);
                self.by_nsei.remove(&p.nsei);
            }
        }
        self.fsm.inst_free(id);
    }

    pub fn nsvc_by_nsvci(&self, nsvci: u16) -> Option<InstanceId> {
        self.by_nsvci.get(&nsvci).copied()
    }

    pub fn nsvc_by_nsei(&self, nsei: u16) -> Option<InstanceId> {
        self.by_nsei.get(&nsei).copied()
    }

    pub fn is_unblocked(&self, id: InstanceId) -> bool {
        self.fsm.instance(id).map(|i| i.state == crate::nsvc::ST_UNBLOCKED).unwrap_or(false)
    }

    /// `ns_sendmsg`: rejects with [`NsError::NotAlive`] unless the target
    /// NS-VC is UNBLOCKED, otherwise frames and queues a UNITDATA PDU for the
    /// transport to flush.
    pub fn sendmsg(&mut self, nsei: u16, bvci: u16, payload: Vec<u8>) -> Result<(), NsError> {
        let id = self.by_nsei.get(&nsei).copied().ok_or(NsError::UnknownNsvc)?;
        if !self.is_unblocked(id) {
            return Err(NsError::NotAlive);
        }
        self.fsm.dispatch(id, EV_UNITDATA_TX, &mut NsvcEventData::Send { bvci, payload });
        self.drain_mailboxes();
        Ok(())
    }

    /// `ns_rcvmsg`: decodes one datagram and drives the matching NS-VC's FSM,
    /// per spec.md §4.3's receive path. Malformed PDUs are counted and
    /// dropped rather than propagated, per spec.md §7.
    pub fn rcvmsg(&mut self, data: &[u8], from: SocketAddr, ll: LinkLayer) {
        let pdu = match Pdu::decode(data) {
            Ok(pdu) => pdu,
            Err(e) => {
                warn!("dropping malformed NS PDU"; "from" => %from, "error" => %e, "pdu" => log_wrappers::Hex(data));
                return;
            }
        };

        match pdu {
            Pdu::Reset { cause, nsvci, nsei } => {
                if let Some(id) = self.by_nsvci.get(&nsvci).copied() {
                    self.fsm.dispatch(id, EV_RESET_RX, &mut NsvcEventData::Reset { cause, nsvci, nsei });
                } else {
                    // Unknown NS-VC resetting in: create it reactively, mirroring
                    // the BSS side of `gprs_ns_rcvmsg`'s RESET handling.
                    let id = self.nsvc_create(nsei, nsvci, from, ll, false, true);
                    self.fsm.dispatch(id, EV_RESET_RX, &mut NsvcEventData::Reset { cause, nsvci, nsei });
                }
            }
            Pdu::ResetAck { nsvci, .. } => self.dispatch_known(nsvci, from, EV_RESET_ACK_RX),
            Pdu::Block { .. } => self.dispatch_known_by_addr(from, EV_BLOCK_RX),
            Pdu::BlockAck => { /* local side never awaits BLOCK-ACK in this direction */ }
            Pdu::Unblock => self.dispatch_known_by_addr(from, EV_UNBLOCK_RX),
            Pdu::UnblockAck => self.dispatch_known_by_addr(from, EV_UNBLOCK_ACK_RX),
            Pdu::Alive => self.dispatch_known_by_addr(from, EV_ALIVE_RX),
            Pdu::AliveAck => self.dispatch_known_by_addr(from, EV_ALIVE_ACK_RX),
            Pdu::UnitData { bvci, payload } => {
                match self.find_by_addr(from) {
                    Some(id) if self.is_unblocked(id) => {
                        self.fsm.dispatch(id, EV_UNITDATA_RX, &mut NsvcEventData::UnitData { bvci, payload });
                    }
                    // spec.md §8: UNITDATA arriving on a BLOCKED Nsvc is
                    // dropped with a STATUS reply, not silently (the FSM
                    // table itself has no EV_UNITDATA_RX transition outside
                    // UNBLOCKED, so this has to be handled here).
                    Some(id) => {
                        let nsvci = self.fsm.instance(id).and_then(|i| i.priv_ref::<NsvcPriv>()).map(|p| p.nsvci);
                        self.reply_unknown(from, ll, Cause::PduNotCompatibleWithProtocolState, nsvci);
                    }
                    None => self.reply_unknown(from, ll, Cause::UnknownNsVci, None),
                }
            }
            Pdu::Status { .. } => { /* informational; nothing to drive here */ }
        }
        self.drain_mailboxes();
    }

    fn find_by_addr(&self, addr: SocketAddr) -> Option<InstanceId> {
        self.by_nsvci.values().copied().find(|&id| {
            self.fsm.instance(id).and_then(|i| i.priv_ref::<NsvcPriv>()).map(|p| p.remote_addr == addr).unwrap_or(false)
        })
    }

    fn dispatch_known(&mut self, nsvci: u16, from: SocketAddr, event: u8) {
        match self.by_nsvci.get(&nsvci).copied() {
            Some(id) => self.fsm.dispatch(id, event, &mut NsvcEventData::None),
            None => self.reply_unknown(from, LinkLayer::Udp, Cause::UnknownNsVci, Some(nsvci)),
        }
    }

    fn dispatch_known_by_addr(&mut self, from: SocketAddr, event: u8) {
        match self.find_by_addr(from) {
            Some(id) => self.fsm.dispatch(id, event, &mut NsvcEventData::None),
            None => self.reply_unknown(from, LinkLayer::Udp, Cause::UnknownNsVci, None),
        }
    }

    /// Replies via the sentinel `unknown_nsvc` path: a STATUS PDU, never a
    /// full NS-VC instance (spec.md §3's `unknown_nsvc` invariant).
    fn reply_unknown(&mut self, to: SocketAddr, ll: LinkLayer, cause: Cause, nsvci: Option<u16>) {
        let status = Pdu::Status { cause: cause as u8, nsvci, offending_pdu: Vec::new() };
        if let Ok(msg) = status.encode() {
            self.mailboxes.outbox.borrow_mut().push_back(OutboundFrame { ll, remote: to, bytes: msg.as_slice().to_vec() });
        }
    }

    fn drain_mailboxes(&mut self) {
        while let Some(sig) = self.mailboxes.signals.borrow_mut().pop_front() {
            self.pending_signals.push_back(sig);
        }
        while let Some(delivery) = self.mailboxes.deliveries.borrow_mut().pop_front() {
            let Delivery { nsvc, bvci, payload } = delivery;
            if let Some(p) = self.fsm.instance(nsvc).and_then(|i| i.priv_ref::<NsvcPriv>()) {
                self.pending_indications.push_back(UnitDataInd { nsei: p.nsei, bvci, payload });
            }
        }
    }

    /// Drains the outbound PDU frames queued by FSM actions since the last
    /// call; the caller's transport layer is responsible for actually
    /// writing these to a socket.
    pub fn take_outbound(&mut self) -> Vec<OutboundFrame> {
        self.mailboxes.outbox.borrow_mut().drain(..).collect()
    }

    /// Drains `UNIT_DATA` indications ready for delivery to the BSSGP layer.
    pub fn take_indications(&mut self) -> Vec<UnitDataInd> {
        self.pending_indications.drain(..).collect()
    }

    /// Drains `S_NS_*` signal events raised since the last call.
    pub fn take_signals(&mut self) -> Vec<SignalEvent> {
        self.pending_signals.drain(..).collect()
    }

    pub fn timers_nearest(&self, now: Instant) -> Option<std::time::Duration> {
        self.fsm.timers_nearest(now)
    }

    /// Fires due NS-VC timers; the retry/alive/reset machinery lives in
    /// `NsvcFsm::timer_expired`, invoked transitively here.
    pub fn expire_timers(&mut self, now: Instant) {
        self.fsm.expire_timers(now);
        self.drain_mailboxes();
    }

    /// Every non-persistent NS-VC currently parked in DEAD after exhausting
    /// its retries — eligible for the caller to [`NsInstance::nsvc_destroy`],
    /// per spec.md §4.3's "non-persistent ones raise `S_NS_ALIVE_EXP` and
    /// become eligible for user destruction".
    pub fn reapable(&self) -> Vec<InstanceId> {
        self.by_nsvci
            .values()
            .copied()
            .filter(|&id| {
                self.fsm
                    .instance(id)
                    .map(|i| i.state == crate::nsvc::ST_DEAD && !i.priv_ref::<NsvcPriv>().map(|p| p.persistent).unwrap_or(true))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn ctr_snapshot(&self, id: InstanceId) -> Option<Vec<(&'static str, u64)>> {
        self.fsm.instance(id).and_then(|i| i.priv_ref::<NsvcPriv>()).map(|p| p.ctrs.snapshot())
    }
}

impl Default for NsInstance {
    fn default() -> Self {
        NsInstance::new(NsTimeouts::default())
    }
}
