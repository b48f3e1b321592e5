// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! The GSM Network Service layer (3GPP TS 48.016): PDU codec, per-NS-VC
//! procedure FSM, and the UDP / FR-over-GRE transports beneath it.

pub mod ctrs;
pub mod error;
pub mod instance;
pub mod mailbox;
pub mod nsvc;
pub mod pdu;
pub mod timeouts;
pub mod transport;

pub use error::NsError;
pub use instance::{NsInstance, UnitDataInd};
pub use mailbox::{NsSignal, SignalEvent};
pub use nsvc::LinkLayer;
pub use timeouts::NsTimeouts;

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;
    use crate::nsvc::ST_UNBLOCKED;
    use crate::pdu::{Cause, Pdu};

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    /// End-to-end scenario 1 (spec.md §8): reset handshake drives
    /// DEAD → RESETTING → BLOCKED and the outbound RESET is answered with a
    /// structurally equivalent RESET-ACK.
    #[test]
    fn reset_handshake_advances_to_blocked_and_sends_unblock() {
        let mut inst = NsInstance::new(NsTimeouts::default());
        let remote = peer(9000);
        let id = inst.nsvc_create(0x0100, 1, remote, LinkLayer::Udp, true, true);

        let outbound = inst.take_outbound();
        assert_eq!(outbound.len(), 1);
        let sent = Pdu::decode(&outbound[0].bytes).unwrap();
        assert_eq!(sent, Pdu::Reset { cause: Cause::NetworkServiceUnavailable as u8, nsvci: 1, nsei: 0x0100 });

        // SGSN replies with RESET-ACK.
        let ack = Pdu::ResetAck { nsvci: 1, nsei: 0x0100 }.encode().unwrap();
        inst.rcvmsg(ack.as_slice(), remote, LinkLayer::Udp);

        let outbound = inst.take_outbound();
        assert_eq!(outbound.len(), 1);
        assert_eq!(Pdu::decode(&outbound[0].bytes).unwrap(), Pdu::Unblock);
        assert!(!inst.is_unblocked(id));
    }

    /// Scenario 2: from BLOCKED, UNBLOCK-ACK moves the NS-VC to UNBLOCKED.
    #[test]
    fn unblock_ack_completes_the_handshake() {
        let mut inst = NsInstance::new(NsTimeouts::default());
        let remote = peer(9001);
        let id = inst.nsvc_create(0x0100, 1, remote, LinkLayer::Udp, true, true);
        inst.take_outbound();
        let ack = Pdu::ResetAck { nsvci: 1, nsei: 0x0100 }.encode().unwrap();
        inst.rcvmsg(ack.as_slice(), remote, LinkLayer::Udp);
        inst.take_outbound();

        let unblock_ack = Pdu::UnblockAck.encode().unwrap();
        inst.rcvmsg(unblock_ack.as_slice(), remote, LinkLayer::Udp);

        assert!(inst.is_unblocked(id));
    }

    #[test]
    fn sendmsg_rejected_before_unblocked() {
        let mut inst = NsInstance::new(NsTimeouts::default());
        let remote = peer(9002);
        inst.nsvc_create(0x0100, 1, remote, LinkLayer::Udp, true, true);
        inst.take_outbound();
        let err = inst.sendmsg(0x0100, 0x2342, vec![1, 2, 3]).unwrap_err();
        assert_eq!(err, NsError::NotAlive);
    }

    #[test]
    fn unitdata_delivered_once_unblocked() {
        let mut inst = NsInstance::new(NsTimeouts::default());
        let remote = peer(9003);
        let id = inst.nsvc_create(0x0100, 1, remote, LinkLayer::Udp, true, true);
        inst.take_outbound();
        inst.rcvmsg(Pdu::ResetAck { nsvci: 1, nsei: 0x0100 }.encode().unwrap().as_slice(), remote, LinkLayer::Udp);
        inst.take_outbound();
        inst.rcvmsg(Pdu::UnblockAck.encode().unwrap().as_slice(), remote, LinkLayer::Udp);
        assert!(inst.is_unblocked(id));

        let data = Pdu::UnitData { bvci: 7, payload: vec![9, 9, 9] }.encode().unwrap();
        inst.rcvmsg(data.as_slice(), remote, LinkLayer::Udp);
        let indications = inst.take_indications();
        assert_eq!(indications.len(), 1);
        assert_eq!(indications[0].bvci, 7);
        assert_eq!(indications[0].payload, vec![9, 9, 9]);
        assert_eq!(indications[0].nsei, 0x0100);
    }

    /// Idempotence (spec.md §8): a duplicate RESET while RESETTING produces
    /// exactly one RESET-ACK and does not perturb state.
    #[test]
    fn duplicate_reset_while_resetting_is_idempotent() {
        let mut inst = NsInstance::new(NsTimeouts::default());
        let remote = peer(9004);
        let nsei = 0x0100;
        let nsvci = 1;
        // Reactive creation, as if we are answering an inbound RESET cold.
        let reset = Pdu::Reset { cause: Cause::NetworkServiceUnavailable as u8, nsvci, nsei }.encode().unwrap();
        inst.rcvmsg(reset.as_slice(), remote, LinkLayer::Udp);
        let first = inst.take_outbound();
        assert_eq!(first.len(), 1);

        inst.rcvmsg(reset.as_slice(), remote, LinkLayer::Udp);
        let second = inst.take_outbound();
        assert_eq!(second.len(), 1);
        assert_eq!(Pdu::decode(&second[0].bytes).unwrap(), Pdu::ResetAck { nsvci, nsei });
        assert_ne!(inst.nsvc_by_nsvci(nsvci), None);
    }

    /// Boundary behavior (spec.md §8): UNITDATA arriving on a BLOCKED Nsvc is
    /// dropped with a STATUS reply, not silently.
    #[test]
    fn unitdata_on_blocked_nsvc_gets_status_reply_and_no_indication() {
        let mut inst = NsInstance::new(NsTimeouts::default());
        let remote = peer(9007);
        inst.nsvc_create(0x0100, 1, remote, LinkLayer::Udp, true, true);
        inst.take_outbound();
        inst.rcvmsg(Pdu::ResetAck { nsvci: 1, nsei: 0x0100 }.encode().unwrap().as_slice(), remote, LinkLayer::Udp);
        inst.take_outbound(); // now BLOCKED, awaiting UNBLOCK-ACK

        let data = Pdu::UnitData { bvci: 7, payload: vec![1, 2, 3] }.encode().unwrap();
        inst.rcvmsg(data.as_slice(), remote, LinkLayer::Udp);

        assert!(inst.take_indications().is_empty());
        let outbound = inst.take_outbound();
        assert_eq!(outbound.len(), 1);
        match Pdu::decode(&outbound[0].bytes).unwrap() {
            Pdu::Status { cause, nsvci, .. } => {
                assert_eq!(cause, Cause::PduNotCompatibleWithProtocolState as u8);
                assert_eq!(nsvci, Some(1));
            }
            other => panic!("expected STATUS, got {other:?}"),
        }
    }

    #[test]
    fn unknown_nsvci_gets_status_reply() {
        let mut inst = NsInstance::new(NsTimeouts::default());
        let remote = peer(9005);
        let ack = Pdu::ResetAck { nsvci: 99, nsei: 1 }.encode().unwrap();
        inst.rcvmsg(ack.as_slice(), remote, LinkLayer::Udp);
        let outbound = inst.take_outbound();
        assert_eq!(outbound.len(), 1);
        match Pdu::decode(&outbound[0].bytes).unwrap() {
            Pdu::Status { cause, .. } => assert_eq!(cause, Cause::UnknownNsVci as u8),
            other => panic!("expected STATUS, got {other:?}"),
        }
    }

    #[test]
    fn alive_retries_exhausted_raises_signal_and_resets() {
        let mut timeouts = NsTimeouts::default();
        timeouts.tns_test = std::time::Duration::from_millis(1);
        timeouts.tns_alive = std::time::Duration::from_millis(1);
        timeouts.tns_alive_retries = 3;
        let mut inst = NsInstance::new(timeouts);
        let remote = peer(9006);
        let id = inst.nsvc_create(0x0100, 1, remote, LinkLayer::Udp, true, true);
        inst.take_outbound();
        inst.rcvmsg(Pdu::ResetAck { nsvci: 1, nsei: 0x0100 }.encode().unwrap().as_slice(), remote, LinkLayer::Udp);
        inst.take_outbound();
        inst.rcvmsg(Pdu::UnblockAck.encode().unwrap().as_slice(), remote, LinkLayer::Udp);
        inst.take_outbound();
        assert!(inst.is_unblocked(id));

        let mut now = util::time::Instant::now();
        // Tns-test fires: ALIVE goes out, Tns-alive starts.
        now = now.checked_add(std::time::Duration::from_millis(5)).unwrap();
        inst.expire_timers(now);
        inst.take_outbound();

        // Three consecutive Tns-alive expiries without an ALIVE-ACK.
        for _ in 0..3 {
            now = now.checked_add(std::time::Duration::from_millis(5)).unwrap();
            inst.expire_timers(now);
        }

        let signals = inst.take_signals();
        assert!(signals.iter().any(|s| s.signal == NsSignal::AliveExpired));
        // Persistent NS-VC auto-restarts the RESET procedure per spec.md §4.3.
        let outbound = inst.take_outbound();
        assert!(!outbound.is_empty());
        assert!(matches!(Pdu::decode(&outbound[0].bytes).unwrap(), Pdu::Reset { .. }));
        let _ = ST_UNBLOCKED;
    }
}
