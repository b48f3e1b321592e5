// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

pub mod frgre;
pub mod udp;

pub use frgre::FrGreTransport;
pub use udp::UdpTransport;
