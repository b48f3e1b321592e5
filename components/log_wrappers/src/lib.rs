// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! Thin `slog::Value` wrappers for values that are awkward to log directly:
//! raw PDU bytes get hex-encoded rather than dumped as a `Debug` list.

use slog::{Key, Record, Result as SlogResult, Serializer, Value};

/// Wraps a byte slice so it renders as a hex string in structured log
/// fields, e.g. `"pdu" => Hex(&bytes)`.
pub struct Hex<'a>(pub &'a [u8]);

impl<'a> Value for Hex<'a> {
    fn serialize(&self, _record: &Record<'_>, key: Key, serializer: &mut dyn Serializer) -> SlogResult {
        serializer.emit_str(key, &hex::encode(self.0))
    }
}
