// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! Shared outboxes an [`crate::nsvc::NsvcFsm`] action writes into and the
//! owning [`crate::instance::NsInstance`] drains after a `dispatch()` call
//! returns.
//!
//! `fsm::FsmClass` methods only ever see `&mut FsmRuntime`, never the outer
//! structure that owns the runtime — by design, per `gsm_timer::TimerWheel`'s
//! own doc comment, so a dispatch can never re-borrow its owner. An NS-VC
//! action still needs to hand a PDU to a socket and a signal or delivered
//! UNITDATA to the instance's caller, so those three outcomes are queued into
//! `Rc<RefCell<VecDeque<_>>>` mailboxes that both the FSM instance's private
//! data and the `NsInstance` hold a clone of, and drained synchronously right
//! after dispatch — there is no cross-thread hazard since everything here
//! runs on the single cooperative main thread.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;

use fsm::InstanceId;

use crate::nsvc::LinkLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsSignal {
    Reset,
    Block,
    Unblock,
    AliveExpired,
}

#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub ll: LinkLayer,
    pub remote: SocketAddr,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub nsvc: InstanceId,
    pub bvci: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct SignalEvent {
    pub signal: NsSignal,
    pub nsei: u16,
    pub nsvci: u16,
}

pub type Outbox = Rc<RefCell<VecDeque<OutboundFrame>>>;
pub type DeliveryBox = Rc<RefCell<VecDeque<Delivery>>>;
pub type SignalBox = Rc<RefCell<VecDeque<SignalEvent>>>;

#[derive(Clone)]
pub struct Mailboxes {
    pub outbox: Outbox,
    pub deliveries: DeliveryBox,
    pub signals: SignalBox,
}

impl Mailboxes {
    pub fn new() -> Mailboxes {
        Mailboxes {
            outbox: Rc::new(RefCell::new(VecDeque::new())),
            deliveries: Rc::new(RefCell::new(VecDeque::new())),
            signals: Rc::new(RefCell::new(VecDeque::new())),
        }
    }
}

impl Default for Mailboxes {
    fn default() -> Self {
        Self::new()
    }
}
