// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! A small error-code registry, modelled on TiKV's `error_code` crate: every
//! fallible operation in the stack maps onto a stable, greppable string code
//! instead of (or in addition to) a free-form message, so operators can
//! correlate a logged code with the table below without parsing prose.

use std::fmt;

/// A stable identifier for one class of error, with a human description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: &'static str,
    pub description: &'static str,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.description)
    }
}

/// Implemented by every crate-local `Error` enum so callers can retrieve a
/// stable code regardless of which crate raised the error.
pub trait ErrorCodeExt {
    fn error_code(&self) -> ErrorCode;
}

/// Declares a set of [`ErrorCode`] constants and, optionally, a `match`-style
/// `impl ErrorCodeExt for $ty` body. Used by `gsm_ns` and `gsm_bssgp` so the
/// mapping from variant to code lives next to the variant itself.
#[macro_export]
macro_rules! define_error_codes {
    ($($name:ident = ($code:expr, $description:expr)),+ $(,)?) => {
        $(
            pub const $name: $crate::ErrorCode = $crate::ErrorCode {
                code: $code,
                description: $description,
            };
        )+
    };
}

define_error_codes! {
    UNKNOWN = ("COM-01", "unclassified error"),
}
