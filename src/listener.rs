// ******************************************************************
// forward-ssdp
//    Relays SSDP multicast between network segments, forging the
//    sender address.
//
// Copyright (c) 2026 forward-ssdp contributors
//
// This program is free software; you can redistribute it and/or
// modify it under the terms of the GNU General Public License
// as published by the Free Software Foundation; either version 2
// of the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// ******************************************************************
//

//! Per-interface SSDP multicast listeners.

use std::fmt;
use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::netutil::NetInterface;

pub const SSDP_PORT: u16 = 1900;
pub const SSDP_V4_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
/// Link-local scope SSDP group.
pub const SSDP_V6_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);

// Largest possible UDP datagram; a received payload can never exceed it.
const RECV_BUFFER_SIZE: usize = 65535;

/// The two address families are fully segregated: every listener and
/// sender carries exactly one, and messages never cross between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Family::V4 => "IPv4",
            Family::V6 => "IPv6",
        })
    }
}

/// One received datagram, tagged with where it came from. The payload is
/// an owned exact-length copy; nothing is shared with the receive buffer
/// once the message crosses the channel.
#[derive(Debug, Clone)]
pub struct Message {
    pub family: Family,
    pub ingress: String,
    pub source: SocketAddr,
    pub payload: Vec<u8>,
}

/// Multicast listener for one (interface, family) pair. The group is
/// joined at construction; dropping the listener closes the socket.
pub struct Listener {
    family: Family,
    ifi: NetInterface,
    socket: Socket,
}

impl Listener {
    pub fn new(ifi: &NetInterface, family: Family) -> io::Result<Listener> {
        let socket = match family {
            Family::V4 => {
                let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
                socket.set_reuse_address(true)?;
                socket.set_reuse_port(true)?;
                socket.bind(&SockAddr::from(SocketAddrV4::new(
                    Ipv4Addr::UNSPECIFIED,
                    SSDP_PORT,
                )))?;
                let local = ifi.ipv4_addr().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        format!("{} has no IPv4 address", ifi.name),
                    )
                })?;
                socket.join_multicast_v4(&SSDP_V4_GROUP, &local)?;
                socket.set_multicast_loop_v4(false)?;
                socket
            }
            Family::V6 => {
                let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
                socket.set_only_v6(true)?;
                socket.set_reuse_address(true)?;
                socket.set_reuse_port(true)?;
                socket.bind(&SockAddr::from(SocketAddrV6::new(
                    Ipv6Addr::UNSPECIFIED,
                    SSDP_PORT,
                    0,
                    0,
                )))?;
                socket.join_multicast_v6(&SSDP_V6_GROUP, ifi.index)?;
                socket.set_multicast_loop_v6(false)?;
                socket
            }
        };

        Ok(Listener {
            family,
            ifi: ifi.clone(),
            socket,
        })
    }

    /// Duplicate handle onto the listener socket. Shutting it down wakes
    /// the receive loop, which then exits through its error path.
    pub fn shutdown_handle(&self) -> io::Result<Socket> {
        self.socket.try_clone()
    }

    /// Receive loop; one thread per listener. Terminates on the first
    /// read error (published on `errors`) or once the dispatcher side of
    /// `messages` is gone.
    pub fn run(
        self,
        messages: &crossbeam_channel::Sender<Message>,
        errors: &crossbeam_channel::Sender<io::Error>,
    ) {
        let mut buf = [MaybeUninit::<u8>::uninit(); RECV_BUFFER_SIZE];

        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf) {
                // A zero-length read is the shutdown wakeup; real SSDP
                // datagrams always carry a start line.
                Ok((0, _)) => {
                    let _ = errors.send(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        format!("{} listener on {} closed", self.family, self.ifi.name),
                    ));
                    return;
                }
                Ok(received) => received,
                Err(e) => {
                    let _ = errors.send(e);
                    return;
                }
            };

            let Some(source) = peer.as_socket() else {
                log::error!(
                    "dropping datagram with non-IP source on {}",
                    self.ifi.name
                );
                continue;
            };

            // SAFETY: `recv_from` initialized the first `len` bytes.
            let received = unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), len) };

            log::debug!(
                "<- [ {source} -> {}:{SSDP_PORT} (iface={} len={len})",
                match self.family {
                    Family::V4 => SSDP_V4_GROUP.to_string(),
                    Family::V6 => SSDP_V6_GROUP.to_string(),
                },
                self.ifi.name,
            );

            let msg = Message {
                family: self.family,
                ingress: self.ifi.name.clone(),
                source,
                payload: received.to_vec(),
            };
            if messages.send(msg).is_err() {
                // Dispatcher is gone; nothing left to feed.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_constants_match_the_ssdp_wire_addresses() {
        assert_eq!(SSDP_V4_GROUP, "239.255.255.250".parse::<Ipv4Addr>().unwrap());
        assert_eq!(SSDP_V6_GROUP, "ff02::c".parse::<Ipv6Addr>().unwrap());
        assert!(SSDP_V4_GROUP.is_multicast());
        assert!(SSDP_V6_GROUP.is_multicast());
        assert_eq!(SSDP_PORT, 1900);
    }

    #[test]
    fn family_display_names() {
        assert_eq!(Family::V4.to_string(), "IPv4");
        assert_eq!(Family::V6.to_string(), "IPv6");
    }
}
