// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! The NS/UDP/IP transport: one bound, non-blocking socket per [`crate::NsInstance`],
//! peers disambiguated purely by source address+port (spec.md §4.3).

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::error::NsError;

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> io::Result<UdpTransport> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(UdpTransport { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn send_to(&self, bytes: &[u8], remote: SocketAddr) -> Result<usize, NsError> {
        self.socket.send_to(bytes, remote).map_err(|e| NsError::SocketError(e.to_string()))
    }

    /// Non-blocking receive: `Ok(None)` means no datagram is currently
    /// pending (`WouldBlock`), matching the non-blocking select-loop socket
    /// this stack is built around (spec.md §5).
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, NsError> {
        match self.socket.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(NsError::SocketError(e.to_string())),
        }
    }
}
