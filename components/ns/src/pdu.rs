// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! NS PDU wire codec, grounded on `original_source/include/osmocom/gprs/gprs_ns.h`
//! (PDU type values, IE tags) and spec.md §6 ("Wire format — NS PDUs").
//!
//! IEs are plain tag(1)+len(1)+value(len) TLVs; UNITDATA is the one PDU that
//! is not IE-framed at all (1 reserved byte, 2-byte BVCI, raw payload), exactly
//! as spec.md §6 describes it.

use msgb::Msgb;

use crate::error::NsError;

pub const PDU_UNITDATA: u8 = 0x00;
pub const PDU_RESET: u8 = 0x02;
pub const PDU_RESET_ACK: u8 = 0x03;
pub const PDU_BLOCK: u8 = 0x04;
pub const PDU_BLOCK_ACK: u8 = 0x05;
pub const PDU_UNBLOCK: u8 = 0x06;
pub const PDU_UNBLOCK_ACK: u8 = 0x07;
pub const PDU_STATUS: u8 = 0x08;
pub const PDU_ALIVE: u8 = 0x0A;
pub const PDU_ALIVE_ACK: u8 = 0x0B;

const IE_CAUSE: u8 = 0x00;
const IE_NSVCI: u8 = 0x01;
const IE_NSEI: u8 = 0x04;
#[allow(dead_code)]
const IE_BVCI: u8 = 0x05;
const IE_NS_PDU: u8 = 0x06;

/// NS Cause values used in this stack (TS 48.016 §10.3.2, trimmed to the
/// subset spec.md's scenarios exercise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cause {
    NetworkServiceUnavailable = 0x00,
    UnknownNsVci = 0x05,
    PduNotCompatibleWithProtocolState = 0x0C,
    ProtocolError = 0x0B,
}

impl Cause {
    pub fn from_u8(v: u8) -> Cause {
        match v {
            0x05 => Cause::UnknownNsVci,
            0x0C => Cause::PduNotCompatibleWithProtocolState,
            0x0B => Cause::ProtocolError,
            _ => Cause::NetworkServiceUnavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Reset { cause: u8, nsvci: u16, nsei: u16 },
    ResetAck { nsvci: u16, nsei: u16 },
    Block { cause: u8 },
    BlockAck,
    Unblock,
    UnblockAck,
    Alive,
    AliveAck,
    /// `nsvci` is absent when the sentinel `unknown_nsvc` replies to a PDU
    /// that carried no identifiable NSVCI at all.
    Status { cause: u8, nsvci: Option<u16>, offending_pdu: Vec<u8> },
    UnitData { bvci: u16, payload: Vec<u8> },
}

/// NS IEs are osmocom TvLV (`TLV_TYPE_TvLV` in
/// `examples/original_source/src/gsm/tlv_parser.c`): the length octet's top
/// bit is always set (`len | 0x80`), distinguishing it from the TL16V form
/// the same tag space also supports. Spec.md §8 scenario 1's literal RESET
/// bytes (`02 00 81 00 01 81 04 00 05 81 01 00`) carry exactly these `0x81`
/// markers.
fn put_tlv(msg: &mut Msgb, tag: u8, value: &[u8]) -> Result<(), NsError> {
    msg.append(&[tag, value.len() as u8 | 0x80])?;
    msg.append(value)?;
    Ok(())
}

fn put_tlv_u16(msg: &mut Msgb, tag: u8, value: u16) -> Result<(), NsError> {
    put_tlv(msg, tag, &value.to_be_bytes())
}

impl Pdu {
    pub fn encode(&self) -> Result<Msgb, NsError> {
        let mut msg = Msgb::alloc_ns();
        match self {
            Pdu::Reset { cause, nsvci, nsei } => {
                msg.append(&[PDU_RESET])?;
                put_tlv(&mut msg, IE_CAUSE, &[*cause])?;
                put_tlv_u16(&mut msg, IE_NSVCI, *nsvci)?;
                put_tlv_u16(&mut msg, IE_NSEI, *nsei)?;
            }
            Pdu::ResetAck { nsvci, nsei } => {
                msg.append(&[PDU_RESET_ACK])?;
                put_tlv_u16(&mut msg, IE_NSVCI, *nsvci)?;
                put_tlv_u16(&mut msg, IE_NSEI, *nsei)?;
            }
            Pdu::Block { cause } => {
                msg.append(&[PDU_BLOCK])?;
                put_tlv(&mut msg, IE_CAUSE, &[*cause])?;
            }
            Pdu::BlockAck => msg.append(&[PDU_BLOCK_ACK])?,
            Pdu::Unblock => msg.append(&[PDU_UNBLOCK])?,
            Pdu::UnblockAck => msg.append(&[PDU_UNBLOCK_ACK])?,
            Pdu::Alive => msg.append(&[PDU_ALIVE])?,
            Pdu::AliveAck => msg.append(&[PDU_ALIVE_ACK])?,
            Pdu::Status { cause, nsvci, offending_pdu } => {
                msg.append(&[PDU_STATUS])?;
                put_tlv(&mut msg, IE_CAUSE, &[*cause])?;
                if let Some(nsvci) = nsvci {
                    put_tlv_u16(&mut msg, IE_NSVCI, *nsvci)?;
                }
                put_tlv(&mut msg, IE_NS_PDU, offending_pdu)?;
            }
            Pdu::UnitData { bvci, payload } => {
                msg.append(&[PDU_UNITDATA, 0x00])?;
                msg.append(&bvci.to_be_bytes())?;
                msg.append(payload)?;
            }
        }
        Ok(msg)
    }

    pub fn decode(data: &[u8]) -> Result<Pdu, NsError> {
        let mut msg = Msgb::from_received(data);
        let pdu_type = *msg.pull(1)?.first().ok_or(NsError::MalformedPdu)?;

        match pdu_type {
            PDU_UNITDATA => {
                let rest = msg.pull(3)?;
                if rest.len() < 3 {
                    return Err(NsError::MalformedPdu);
                }
                let bvci = u16::from_be_bytes([rest[1], rest[2]]);
                let payload = msg.as_slice().to_vec();
                Ok(Pdu::UnitData { bvci, payload })
            }
            PDU_RESET => {
                let ies = decode_tlvs(&mut msg)?;
                let cause = require_u8(&ies, IE_CAUSE)?;
                let nsvci = require_u16(&ies, IE_NSVCI)?;
                let nsei = require_u16(&ies, IE_NSEI)?;
                Ok(Pdu::Reset { cause, nsvci, nsei })
            }
            PDU_RESET_ACK => {
                let ies = decode_tlvs(&mut msg)?;
                let nsvci = require_u16(&ies, IE_NSVCI)?;
                let nsei = require_u16(&ies, IE_NSEI)?;
                Ok(Pdu::ResetAck { nsvci, nsei })
            }
            PDU_BLOCK => {
                let ies = decode_tlvs(&mut msg)?;
                let cause = require_u8(&ies, IE_CAUSE)?;
                Ok(Pdu::Block { cause })
            }
            PDU_BLOCK_ACK => Ok(Pdu::BlockAck),
            PDU_UNBLOCK => Ok(Pdu::Unblock),
            PDU_UNBLOCK_ACK => Ok(Pdu::UnblockAck),
            PDU_ALIVE => Ok(Pdu::Alive),
            PDU_ALIVE_ACK => Ok(Pdu::AliveAck),
            PDU_STATUS => {
                let ies = decode_tlvs(&mut msg)?;
                let cause = require_u8(&ies, IE_CAUSE)?;
                let nsvci = find_u16(&ies, IE_NSVCI);
                let offending_pdu = find_raw(&ies, IE_NS_PDU).unwrap_or_default();
                Ok(Pdu::Status { cause, nsvci, offending_pdu })
            }
            _ => Err(NsError::MalformedPdu),
        }
    }
}

/// Inverse of [`put_tlv`]: masks off the TvLV length octet's `0x80` marker
/// bit rather than treating it as part of the length.
fn decode_tlvs(msg: &mut Msgb) -> Result<Vec<(u8, Vec<u8>)>, NsError> {
    let mut ies = Vec::new();
    while !msg.is_empty() {
        let header = msg.pull(2)?;
        let (tag, len) = (header[0], (header[1] & 0x7f) as usize);
        let value = msg.pull(len)?;
        ies.push((tag, value));
    }
    Ok(ies)
}

fn find_raw(ies: &[(u8, Vec<u8>)], tag: u8) -> Option<Vec<u8>> {
    ies.iter().find(|(t, _)| *t == tag).map(|(_, v)| v.clone())
}

fn require_u8(ies: &[(u8, Vec<u8>)], tag: u8) -> Result<u8, NsError> {
    find_raw(ies, tag)
        .and_then(|v| v.first().copied())
        .ok_or(NsError::MalformedPdu)
}

fn require_u16(ies: &[(u8, Vec<u8>)], tag: u8) -> Result<u16, NsError> {
    find_u16(ies, tag).ok_or(NsError::MalformedPdu)
}

fn find_u16(ies: &[(u8, Vec<u8>)], tag: u8) -> Option<u16> {
    find_raw(ies, tag).and_then(|v| {
        if v.len() == 2 {
            Some(u16::from_be_bytes([v[0], v[1]]))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(pdu: Pdu) {
        let encoded = pdu.encode().unwrap();
        let decoded = Pdu::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn reset_round_trips() {
        roundtrip(Pdu::Reset { cause: Cause::NetworkServiceUnavailable as u8, nsvci: 1, nsei: 0x0100 });
    }

    #[test]
    fn reset_ack_round_trips() {
        roundtrip(Pdu::ResetAck { nsvci: 1, nsei: 0x0100 });
    }

    #[test]
    fn bare_signalling_pdus_round_trip() {
        roundtrip(Pdu::BlockAck);
        roundtrip(Pdu::Unblock);
        roundtrip(Pdu::UnblockAck);
        roundtrip(Pdu::Alive);
        roundtrip(Pdu::AliveAck);
    }

    #[test]
    fn unblock_encodes_as_bare_type_byte() {
        let encoded = Pdu::Unblock.encode().unwrap();
        assert_eq!(encoded.as_slice(), &[PDU_UNBLOCK]);
        let acked = Pdu::UnblockAck.encode().unwrap();
        assert_eq!(acked.as_slice(), &[PDU_UNBLOCK_ACK]);
    }

    #[test]
    fn unitdata_round_trips_with_payload() {
        roundtrip(Pdu::UnitData { bvci: 0x2342, payload: vec![0xde, 0xad, 0xbe, 0xef] });
    }

    #[test]
    fn status_round_trips_with_and_without_nsvci() {
        roundtrip(Pdu::Status {
            cause: Cause::UnknownNsVci as u8,
            nsvci: Some(7),
            offending_pdu: vec![PDU_BLOCK],
        });
        roundtrip(Pdu::Status { cause: Cause::ProtocolError as u8, nsvci: None, offending_pdu: vec![] });
    }

    /// spec.md §8 scenario 1's literal RESET opens with the Cause IE
    /// `00 81 00` (tag=Cause, TvLV length octet `0x81` = len 1, value `00`):
    /// under the old bare-length reading this `0x81` was taken as length 129
    /// and the pull underflowed before the PDU was ever examined. The fixed
    /// `decode_tlvs` masks the marker bit and parses the IE correctly.
    ///
    /// The scenario string's remaining bytes don't decode to a second,
    /// self-consistent 2-byte NSVCI/NSEI pair under this same TvLV rule (the
    /// length octets there read as 1 rather than 2, and the NSEI tag as 0x05
    /// rather than spec.md §6's 0x04) — a transcription slip in the scenario
    /// illustration, not a wire-format rule this codec should reproduce. So
    /// this checks the literal prefix directly, and separately checks that
    /// the codec emits exactly that prefix for the scenario's own field
    /// values and round-trips them correctly end to end.
    #[test]
    fn reset_decodes_spec_literal_cause_prefix() {
        let mut msg = Msgb::from_received(&[0x00, 0x81, 0x00]);
        let ies = decode_tlvs(&mut msg).unwrap();
        assert_eq!(ies, vec![(IE_CAUSE, vec![0x00])]);
    }

    #[test]
    fn reset_scenario_one_fields_round_trip_with_literal_cause_prefix() {
        let pdu = Pdu::Reset { cause: Cause::NetworkServiceUnavailable as u8, nsvci: 1, nsei: 0x0100 };
        let encoded = pdu.encode().unwrap();
        assert_eq!(&encoded.as_slice()[..4], &[PDU_RESET, 0x00, 0x81, 0x00]);
        assert_eq!(Pdu::decode(encoded.as_slice()).unwrap(), pdu);
    }

    #[test]
    fn truncated_pdu_is_malformed_not_panicking() {
        assert_eq!(Pdu::decode(&[PDU_RESET, IE_CAUSE]), Err(NsError::MalformedPdu));
        assert_eq!(Pdu::decode(&[]), Err(NsError::MalformedPdu));
    }

    #[test]
    fn unknown_pdu_type_is_malformed() {
        assert_eq!(Pdu::decode(&[0xff]), Err(NsError::MalformedPdu));
    }
}
