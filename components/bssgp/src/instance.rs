// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! `BssgpInstance`: the registry of [`BvcContext`]s and per-MS buckets above
//! one [`gsm_ns::NsInstance`], grounded on
//! `original_source/openbsc/src/gprs/gprs_bssgp.c`'s `bssgp_bvc_ctx` lookup
//! (`btsctx_by_bvci_nsei` / `btsctx_by_raid_cid`) and spec.md §3's invariant
//! that the two lookup keys must always agree — enforced here by construction:
//! both indexes are populated from the one [`BssgpInstance::create_bvc`] call.
//!
//! Composition follows spec.md §4.4 literally: a downlink PDU is first
//! offered to its MS bucket; whatever that bucket admits is immediately
//! offered to the owning BVC's bucket; whatever the BVC bucket admits is
//! handed to [`gsm_ns::NsInstance::sendmsg`]. Either bucket may instead queue
//! the PDU against its own timer, which is why `expire_timers` below re-drives
//! the same admit-then-forward chain for whatever a timer releases.

use collections::HashMap;
use gsm_ns::NsInstance;
use util::logger::{info, warn};
use util::time::Instant;

use crate::bvc::{BvcContext, BvcState, MsContext, RoutingAreaId};
use crate::ctrs::FcCtr;
use crate::error::BssgpError;
use crate::fc::PendingPdu;

/// `(nsei, bvci)`: the primary key every BVC is stored under. spec.md §3
/// requires lookups by either this pair or `(ra_id, cell_id)` to agree; the
/// second is just an index onto the same key.
pub type BvcKey = (u16, u16);

pub struct BssgpInstance {
    bvcs: HashMap<BvcKey, BvcContext>,
    ra_index: HashMap<(RoutingAreaId, u16), BvcKey>,
    ms: HashMap<(BvcKey, u32), MsContext>,
    ns: NsInstance,
}

impl BssgpInstance {
    pub fn new(ns: NsInstance) -> BssgpInstance {
        BssgpInstance {
            bvcs: HashMap::default(),
            ra_index: HashMap::default(),
            ms: HashMap::default(),
            ns,
        }
    }

    pub fn ns(&self) -> &NsInstance {
        &self.ns
    }

    pub fn ns_mut(&mut self) -> &mut NsInstance {
        &mut self.ns
    }

    /// Registers a new BVC (cell), populating both lookup indexes from one
    /// call so they can never disagree.
    pub fn create_bvc(
        &mut self,
        ra_id: RoutingAreaId,
        cell_id: u16,
        bvci: u16,
        nsei: u16,
        bucket_size_max: u32,
        leak_rate: u32,
        max_queue_depth: u32,
    ) {
        let key = (nsei, bvci);
        self.ra_index.insert((ra_id, cell_id), key);
        self.bvcs.insert(
            key,
            BvcContext::new(ra_id, cell_id, bvci, nsei, bucket_size_max, leak_rate, max_queue_depth),
        );
        info!("BVC registered"; "nsei" => nsei, "bvci" => bvci, "cell_id" => cell_id);
    }

    pub fn bvc_by_bvci_nsei(&self, bvci: u16, nsei: u16) -> Option<&BvcContext> {
        self.bvcs.get(&(nsei, bvci))
    }

    pub fn bvc_by_ra_cell(&self, ra_id: RoutingAreaId, cell_id: u16) -> Option<&BvcContext> {
        self.ra_index.get(&(ra_id, cell_id)).and_then(|key| self.bvcs.get(key))
    }

    pub fn block_bvc(&mut self, bvci: u16, nsei: u16) {
        if let Some(bvc) = self.bvcs.get_mut(&(nsei, bvci)) {
            bvc.state = BvcState::Blocked;
        }
    }

    pub fn unblock_bvc(&mut self, bvci: u16, nsei: u16) {
        if let Some(bvc) = self.bvcs.get_mut(&(nsei, bvci)) {
            bvc.state = BvcState::Unblocked;
        }
    }

    /// Downlink entry point: one LLC PDU destined for `tlli` on `bvci`,
    /// offered first to its per-MS bucket and, for whatever that bucket
    /// admits, chained into the owning BVC's bucket (spec.md §4.4's
    /// composition). A PDU that clears both buckets is forwarded immediately
    /// via `ns_sendmsg`; one that is queued at either stage is released later
    /// by [`BssgpInstance::expire_timers`].
    pub fn downlink(&mut self, bvci: u16, nsei: u16, tlli: u32, payload: Vec<u8>) -> Result<(), BssgpError> {
        let key = (nsei, bvci);
        let bucket_params = {
            let bvc = self.bvcs.get(&key).ok_or(BssgpError::UnknownBvc)?;
            if bvc.state == BvcState::Blocked {
                return Err(BssgpError::BvcBlocked);
            }
            (bvc.fc.bucket_size_max, bvc.fc.leak_rate, bvc.fc.max_queue_depth)
        };

        let now = Instant::now();
        let llc_len = payload.len() as u32;
        let ms_ctx = self
            .ms
            .entry((key, tlli))
            .or_insert_with(|| MsContext::new(tlli, bvci, nsei, bucket_params.0, bucket_params.1, bucket_params.2));

        if let Some(released) = ms_ctx.fc.offer(now, PendingPdu { payload, llc_len }) {
            self.forward_to_bvc(key, now, released);
        }
        Ok(())
    }

    /// Offers a PDU already released by an MS bucket to the BVC bucket;
    /// whatever the BVC bucket in turn admits goes straight to NS.
    fn forward_to_bvc(&mut self, key: BvcKey, now: Instant, pdu: PendingPdu) {
        let Some(bvc) = self.bvcs.get_mut(&key) else { return };
        if let Some(admitted) = bvc.fc.offer(now, pdu) {
            self.send_via_ns(key, admitted);
        }
    }

    fn send_via_ns(&mut self, key: BvcKey, pdu: PendingPdu) {
        let (nsei, bvci) = key;
        if let Err(e) = self.ns.sendmsg(nsei, bvci, pdu.payload) {
            warn!("bssgp: downstream ns_sendmsg failed, dropping"; "nsei" => nsei, "bvci" => bvci, "error" => %e);
            if let Some(bvc) = self.bvcs.get_mut(&key) {
                bvc.fc.ctrs.inc(FcCtr::Discarded);
            }
        }
    }

    /// The soonest of any MS or BVC bucket's dequeue timer, for the main
    /// loop's `nearest()` computation (spec.md §5).
    pub fn timers_nearest(&self, now: Instant) -> Option<std::time::Duration> {
        let bvc_min = self.bvcs.values().filter_map(|b| b.fc.nearest(now)).min();
        let ms_min = self.ms.values().filter_map(|m| m.fc.nearest(now)).min();
        match (bvc_min, ms_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Drains every bucket whose timer is due at `now`. MS buckets are
    /// drained first and whatever they release is chained into their BVC;
    /// BVC buckets are then drained directly into NS. This two-pass order
    /// matches spec.md §4.4's dequeue description ("pop from the head while
    /// the bucket can admit") applied once per bucket in the chain.
    pub fn expire_timers(&mut self, now: Instant) {
        let due_ms: Vec<BvcKey> = self
            .ms
            .iter()
            .filter(|(_, ctx)| ctx.fc.nearest(now).map(|d| d.is_zero()).unwrap_or(false))
            .map(|((key, _), _)| *key)
            .collect();
        for key in due_ms {
            let released: Vec<PendingPdu> = self
                .ms
                .iter_mut()
                .filter(|((k, _), _)| *k == key)
                .flat_map(|(_, ctx)| ctx.fc.expire(now))
                .collect();
            for pdu in released {
                self.forward_to_bvc(key, now, pdu);
            }
        }

        let due_bvc: Vec<BvcKey> = self
            .bvcs
            .iter()
            .filter(|(_, bvc)| bvc.fc.nearest(now).map(|d| d.is_zero()).unwrap_or(false))
            .map(|(key, _)| *key)
            .collect();
        for key in due_bvc {
            let released = self.bvcs.get_mut(&key).map(|bvc| bvc.fc.expire(now)).unwrap_or_default();
            for pdu in released {
                self.send_via_ns(key, pdu);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsm_ns::pdu::Pdu;
    use gsm_ns::NsTimeouts;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn ra() -> RoutingAreaId {
        RoutingAreaId { mcc: 262, mnc: 1, lac: 1, rac: 0 }
    }

    fn new_instance() -> BssgpInstance {
        BssgpInstance::new(NsInstance::new(NsTimeouts::default()))
    }

    fn unblock(inst: &mut BssgpInstance, nsei: u16, nsvci: u16) {
        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9100 + nsvci);
        inst.ns_mut().nsvc_create(nsei, nsvci, remote, gsm_ns::LinkLayer::Udp, true, true);
        inst.ns_mut().take_outbound();
        let ack = Pdu::ResetAck { nsvci, nsei }.encode().unwrap();
        inst.ns_mut().rcvmsg(ack.as_slice(), remote, gsm_ns::LinkLayer::Udp);
        inst.ns_mut().take_outbound();
        let unblock_ack = Pdu::UnblockAck.encode().unwrap();
        inst.ns_mut().rcvmsg(unblock_ack.as_slice(), remote, gsm_ns::LinkLayer::Udp);
        inst.ns_mut().take_outbound();
    }

    #[test]
    fn unknown_bvc_is_rejected() {
        let mut inst = new_instance();
        let err = inst.downlink(1, 1, 42, vec![1, 2, 3]).unwrap_err();
        assert_eq!(err, BssgpError::UnknownBvc);
    }

    #[test]
    fn blocked_bvc_rejects_downlink() {
        let mut inst = new_instance();
        inst.create_bvc(ra(), 1, 10, 0x0100, 1000, 500, 4);
        let err = inst.downlink(10, 0x0100, 42, vec![1, 2, 3]).unwrap_err();
        assert_eq!(err, BssgpError::BvcBlocked);
    }

    #[test]
    fn unblocked_bvc_forwards_small_pdu_straight_through_to_ns() {
        let mut inst = new_instance();
        inst.create_bvc(ra(), 1, 10, 0x0100, 1000, 500, 4);
        inst.unblock_bvc(10, 0x0100);
        unblock(&mut inst, 0x0100, 1);

        inst.downlink(10, 0x0100, 42, vec![0xAA; 50]).unwrap();
        let outbound = inst.ns_mut().take_outbound();
        assert_eq!(outbound.len(), 1);
    }

    #[test]
    fn bvc_lookup_by_ra_cell_agrees_with_bvci_nsei() {
        let mut inst = new_instance();
        inst.create_bvc(ra(), 7, 10, 0x0100, 1000, 500, 4);
        let a = inst.bvc_by_bvci_nsei(10, 0x0100).unwrap();
        let b = inst.bvc_by_ra_cell(ra(), 7).unwrap();
        assert_eq!(a.bvci, b.bvci);
        assert_eq!(a.nsei, b.nsei);
    }
}
