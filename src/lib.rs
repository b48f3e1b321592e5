// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! Top-level glue crate tying the timer service, FSM runtime, NS layer and
//! BSSGP flow control into one `GsmMobileStack` a thin binary (`cmd/gsm-mobile`)
//! can drive from a single `poll`/`select`-style main loop, per spec.md §2's
//! "upper boundary is a sendmsg/recv-callback pair toward the BSSGP user; the
//! lower boundary is datagram socket I/O" and §5's single-threaded cooperative
//! model.
//!
//! This mirrors, at far smaller scale, the role `server`/`tikv-server` play in
//! the teacher repo: the crates below (`fsm`, `gsm_ns`, `gsm_bssgp`,
//! `gsm_timer`, `msgb`, `util`) are the engineering, and this crate is the
//! thin composition that owns a socket and drives them.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use gsm_bssgp::BssgpInstance;
use gsm_ns::transport::{FrGreTransport, UdpTransport};
use gsm_ns::{LinkLayer, NsInstance};
use util::logger::{info, warn};
use util::time::Instant;

pub use fsm;
pub use gsm_bssgp as bssgp;
pub use gsm_config as config;
pub use gsm_ns as ns;
pub use gsm_timer as timer;
pub use msgb;

/// Owns the UDP and (optionally) FR/GRE transports and the BSSGP/NS/FSM
/// stack above them. One instance per local NS endpoint (spec.md §3 "NS
/// instance").
pub struct GsmMobileStack {
    udp: UdpTransport,
    frgre: Option<FrGreTransport>,
    bssgp: BssgpInstance,
}

impl GsmMobileStack {
    pub fn bind(cfg: &gsm_config::StackConfig) -> std::io::Result<GsmMobileStack> {
        let udp = UdpTransport::bind(cfg.udp_bind_addr)?;
        info!("gsm-mobile-stack: UDP transport bound"; "addr" => %cfg.udp_bind_addr);
        let frgre = match cfg.fr_gre_local_ip {
            Some(ip) => {
                let t = FrGreTransport::bind(ip)?;
                info!("gsm-mobile-stack: FR/GRE transport bound"; "local_ip" => %ip);
                Some(t)
            }
            None => None,
        };
        let ns = NsInstance::new(cfg.ns_timeouts());
        Ok(GsmMobileStack { udp, frgre, bssgp: BssgpInstance::new(ns) })
    }

    pub fn bssgp(&mut self) -> &mut BssgpInstance {
        &mut self.bssgp
    }

    /// Creates (and immediately starts resetting) a persistent NS-VC toward
    /// `remote`, the usual way a mobile-side stack establishes its one link
    /// to the SGSN/BSS at startup.
    pub fn create_nsvc(&mut self, nsei: u16, nsvci: u16, remote: SocketAddr) {
        self.bssgp.ns_mut().nsvc_create(nsei, nsvci, remote, LinkLayer::Udp, true, true);
        self.flush_outbound();
    }

    /// Creates a persistent NS-VC over the FR/GRE transport toward
    /// `remote_ip`, identified by `dlci`. Per spec.md §4.3's documented
    /// pragmatic re-use, the DLCI is carried in the port field of the
    /// [`Nsvc`](gsm_ns::nsvc)'s `remote_addr` — there is no port in a raw
    /// GRE/IP datagram, so this is the same field the original overloads,
    /// just explicit about it at the one call site that encodes/decodes it.
    pub fn create_nsvc_frgre(&mut self, nsei: u16, nsvci: u16, remote_ip: IpAddr, dlci: u16) {
        let remote = SocketAddr::new(remote_ip, dlci);
        self.bssgp.ns_mut().nsvc_create(nsei, nsvci, remote, LinkLayer::FrGre, true, true);
        self.flush_outbound();
    }

    /// The duration until the next timer (NS-VC procedure timer or BSSGP
    /// bucket dequeue timer) is due — feeds a `poll`/`select` timeout
    /// directly, per spec.md §4.1's `nearest()` contract.
    pub fn nearest_timeout(&self, now: Instant) -> Option<Duration> {
        let ns_nearest = self.bssgp.ns().timers_nearest(now);
        let bssgp_nearest = self.bssgp.timers_nearest(now);
        match (ns_nearest, bssgp_nearest) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Fires every timer due at `now` across both layers, then flushes
    /// whatever PDUs that released onto the socket.
    pub fn expire_timers(&mut self, now: Instant) {
        self.bssgp.ns_mut().expire_timers(now);
        self.bssgp.expire_timers(now);
        self.flush_outbound();
    }

    /// Drains one pending datagram from either transport, if any is ready
    /// (non-blocking), and drives it through the NS receive path. Returns
    /// the indications ready for the BSSGP user as a side effect of
    /// `rcvmsg`'s internal dispatch; callers interested in delivered
    /// UNITDATA should call [`GsmMobileStack::take_indications`] afterwards.
    pub fn poll_socket(&mut self) -> std::io::Result<bool> {
        let mut buf = [0u8; 2048];
        if let Some((n, from)) = self.udp.recv_from(&mut buf).map_err(to_io_error)? {
            self.bssgp.ns_mut().rcvmsg(&buf[..n], from, LinkLayer::Udp);
            self.flush_outbound();
            return Ok(true);
        }
        if let Some(frgre) = &self.frgre {
            if let Some((dlci, payload, remote)) = frgre.recv_from().map_err(to_io_error)? {
                let from = SocketAddr::new(remote.ip(), dlci);
                self.bssgp.ns_mut().rcvmsg(&payload, from, LinkLayer::FrGre);
                self.flush_outbound();
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn take_indications(&mut self) -> Vec<gsm_ns::UnitDataInd> {
        self.bssgp.ns_mut().take_indications()
    }

    pub fn take_signals(&mut self) -> Vec<gsm_ns::SignalEvent> {
        self.bssgp.ns_mut().take_signals()
    }

    /// Destroys every non-persistent NS-VC that has exhausted its retries
    /// (spec.md §4.3's "non-persistent ones ... become eligible for user
    /// destruction"). A persistent NS-VC restarts RESET on its own and is
    /// never reaped.
    pub fn reap_dead_nsvcs(&mut self) {
        for id in self.bssgp.ns().reapable() {
            self.bssgp.ns_mut().nsvc_destroy(id);
        }
    }

    fn flush_outbound(&mut self) {
        for frame in self.bssgp.ns_mut().take_outbound() {
            match frame.ll {
                LinkLayer::Udp => {
                    if let Err(e) = self.udp.send_to(&frame.bytes, frame.remote) {
                        warn!("gsm-mobile-stack: udp send failed"; "remote" => %frame.remote, "error" => %e);
                    }
                }
                LinkLayer::FrGre => match &self.frgre {
                    Some(frgre) => {
                        let dlci = frame.remote.port();
                        let remote = SocketAddr::new(frame.remote.ip(), 0);
                        if let Err(e) = frgre.send_to(dlci, &frame.bytes, remote) {
                            warn!("gsm-mobile-stack: fr/gre send failed"; "remote" => %frame.remote, "error" => %e);
                        }
                    }
                    None => {
                        warn!("gsm-mobile-stack: FR/GRE transport not bound, dropping frame"; "remote" => %frame.remote);
                    }
                },
            }
        }
    }
}

fn to_io_error(e: gsm_ns::NsError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn bind_on_ephemeral_port_succeeds() {
        let mut cfg = gsm_config::StackConfig::default();
        cfg.udp_bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let stack = GsmMobileStack::bind(&cfg);
        assert!(stack.is_ok());
    }

    #[test]
    fn nearest_timeout_is_none_with_no_nsvc_and_no_buckets() {
        let mut cfg = gsm_config::StackConfig::default();
        cfg.udp_bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let stack = GsmMobileStack::bind(&cfg).unwrap();
        assert_eq!(stack.nearest_timeout(Instant::now()), None);
    }
}
