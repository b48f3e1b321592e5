// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

use error_code::{ErrorCode, ErrorCodeExt};

/// The NS layer's error kinds, per spec.md §7. `MalformedPdu` and
/// `UnknownNsvc` are drop paths handled internally (never propagated to
/// `sendmsg`'s caller); the others surface through the public API.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum NsError {
    #[error("malformed PDU")]
    MalformedPdu,
    #[error("no NS-VC matches this NSEI/NSVCI")]
    UnknownNsvc,
    #[error("NS-VC is not in UNBLOCKED state")]
    NotAlive,
    #[error("retries exhausted on {0}")]
    RetriesExhausted(&'static str),
    #[error("socket error: {0}")]
    SocketError(String),
    #[error("FR/GRE frame rejected: {0}")]
    FrGreRejected(&'static str),
    #[error("message buffer exhausted")]
    OutOfMemory,
}

impl From<msgb::MsgbError> for NsError {
    fn from(_: msgb::MsgbError) -> Self {
        // Every msgb failure in this layer happens while building or parsing
        // a PDU against a fixed-size allocation; spec.md §7 treats all three
        // (headroom/tailroom/underflow) identically at this layer.
        NsError::OutOfMemory
    }
}

impl ErrorCodeExt for NsError {
    fn error_code(&self) -> ErrorCode {
        match self {
            NsError::MalformedPdu => ErrorCode { code: "NS-01", description: "malformed PDU" },
            NsError::UnknownNsvc => ErrorCode { code: "NS-02", description: "unknown NS-VC" },
            NsError::NotAlive => ErrorCode { code: "NS-03", description: "NS-VC not alive" },
            NsError::RetriesExhausted(_) => ErrorCode { code: "NS-04", description: "retries exhausted" },
            NsError::SocketError(_) => ErrorCode { code: "NS-05", description: "socket error" },
            NsError::FrGreRejected(_) => ErrorCode { code: "NS-06", description: "FR/GRE frame rejected" },
            NsError::OutOfMemory => ErrorCode { code: "NS-07", description: "out of memory" },
        }
    }
}
