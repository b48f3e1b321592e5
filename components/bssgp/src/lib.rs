// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! BSSGP (3GPP TS 48.018) downlink flow control: a leaky-bucket admission
//! core per cell (BVC) and per mobile station (MS), sitting above
//! [`gsm_ns`] and exposing a `downlink`/timer-driven API toward the BSSGP
//! user (spec.md §2 item 4, §4.4).

pub mod bvc;
pub mod ctrs;
pub mod error;
pub mod fc;
pub mod instance;

pub use bvc::{BvcContext, BvcState, MsContext, RoutingAreaId};
pub use error::BssgpError;
pub use fc::{FlowControl, PendingPdu};
pub use instance::{BssgpInstance, BvcKey};
