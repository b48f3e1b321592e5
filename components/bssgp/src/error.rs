// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

use error_code::{ErrorCode, ErrorCodeExt};

/// BSSGP-layer error kinds, per spec.md §7.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BssgpError {
    #[error("no BVC matches this BVCI/NSEI")]
    UnknownBvc,
    #[error("BVC is administratively blocked")]
    BvcBlocked,
    #[error("PDU discarded: FC queue full")]
    QueueOverflow,
}

impl ErrorCodeExt for BssgpError {
    fn error_code(&self) -> ErrorCode {
        match self {
            BssgpError::UnknownBvc => ErrorCode { code: "BSSGP-01", description: "unknown BVC" },
            BssgpError::BvcBlocked => ErrorCode { code: "BSSGP-02", description: "BVC blocked" },
            BssgpError::QueueOverflow => ErrorCode { code: "BSSGP-03", description: "FC queue overflow" },
        }
    }
}
