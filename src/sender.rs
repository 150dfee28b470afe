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

//! Per-interface raw multicast senders.

use std::io::{self, IoSlice};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
use std::os::fd::AsRawFd;

use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags, SockaddrIn6};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;

use crate::listener::{Family, SSDP_PORT, SSDP_V4_GROUP, SSDP_V6_GROUP};
use crate::netutil::NetInterface;
use crate::packet;

/// Per-packet send failures. None of these terminate the relay; the
/// dispatcher logs them and moves on.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("source address {0} does not match the sender family")]
    UnsupportedFamily(IpAddr),
    #[error("opening raw socket (requires CAP_NET_RAW or equivalent): {0}")]
    Privilege(#[source] io::Error),
    #[error("egress interface {0} has no usable address")]
    BadAddress(String),
    #[error("configuring raw socket: {0}")]
    SocketOption(#[source] io::Error),
    #[error(transparent)]
    Oversize(#[from] packet::OversizedPayload),
    #[error("writing packet: {0}")]
    Io(#[from] io::Error),
}

/// Raw multicast sender for one (interface, family) pair. Holds no
/// persistent socket; each send opens a short-lived raw socket pinned to
/// the egress interface.
pub struct Sender {
    family: Family,
    ifi: NetInterface,
}

impl Sender {
    pub fn new(ifi: &NetInterface, family: Family) -> Sender {
        Sender {
            family,
            ifi: ifi.clone(),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn interface_name(&self) -> &str {
        &self.ifi.name
    }

    /// Emits `payload` to the SSDP group on this sender's interface with
    /// the wire-level source forged to `src_ip`:`src_port`. Returns the
    /// payload length on success.
    pub fn send(&self, payload: &[u8], src_ip: IpAddr, src_port: u16) -> Result<usize, SendError> {
        match (self.family, src_ip) {
            (Family::V4, IpAddr::V4(src)) => self.send_v4(payload, src, src_port),
            (Family::V6, IpAddr::V6(src)) => self.send_v6(payload, src, src_port),
            (_, mismatched) => Err(SendError::UnsupportedFamily(mismatched)),
        }
    }

    fn open_raw(&self, domain: Domain) -> Result<Socket, SendError> {
        Socket::new(domain, Type::RAW, Some(Protocol::UDP)).map_err(|e| {
            match e.raw_os_error() {
                Some(libc::EPERM) | Some(libc::EACCES) => SendError::Privilege(e),
                _ => SendError::Io(e),
            }
        })
    }

    // The IPv4 header is handed to the kernel whole (IP_HDRINCL), so the
    // spoofed source lands in the header bytes themselves.
    fn send_v4(&self, payload: &[u8], src: Ipv4Addr, src_port: u16) -> Result<usize, SendError> {
        let local = self
            .ifi
            .ipv4_addr()
            .ok_or_else(|| SendError::BadAddress(self.ifi.name.clone()))?;
        let image = packet::build_ipv4(src, src_port, payload)?;

        let socket = self.open_raw(Domain::IPV4)?;
        socket.set_header_included(true).map_err(SendError::SocketOption)?;
        socket.set_multicast_if_v4(&local).map_err(SendError::SocketOption)?;
        socket.set_multicast_loop_v4(false).map_err(SendError::SocketOption)?;
        socket.set_multicast_ttl_v4(1).map_err(SendError::SocketOption)?;
        #[cfg(target_os = "linux")]
        // bind socket to dedicated NIC (override routing table)
        socket
            .bind_device(Some(self.ifi.name.as_bytes()))
            .map_err(SendError::SocketOption)?;

        let dst = SockAddr::from(SocketAddrV4::new(SSDP_V4_GROUP, SSDP_PORT));
        socket.send_to(&image, &dst)?;
        Ok(payload.len())
    }

    // For v6 the kernel builds the IP header; the spoofed source travels
    // as an IPV6_PKTINFO control message and must already be folded into
    // the UDP checksum.
    fn send_v6(&self, payload: &[u8], src: Ipv6Addr, src_port: u16) -> Result<usize, SendError> {
        let segment = packet::build_udp_v6(src, src_port, payload)?;

        let socket = self.open_raw(Domain::IPV6)?;
        socket
            .set_multicast_if_v6(self.ifi.index)
            .map_err(SendError::SocketOption)?;
        socket
            .set_multicast_loop_v6(false)
            .map_err(SendError::SocketOption)?;
        socket
            .set_multicast_hops_v6(1)
            .map_err(SendError::SocketOption)?;

        let info = libc::in6_pktinfo {
            ipi6_addr: libc::in6_addr {
                s6_addr: src.octets(),
            },
            ipi6_ifindex: self.ifi.index as _,
        };
        let dst = SockaddrIn6::from(SocketAddrV6::new(
            SSDP_V6_GROUP,
            SSDP_PORT,
            0,
            self.ifi.index,
        ));
        let iov = [IoSlice::new(&segment)];
        let cmsgs = [ControlMessage::Ipv6PacketInfo(&info)];
        let sent = sendmsg(
            socket.as_raw_fd(),
            &iov,
            &cmsgs,
            MsgFlags::empty(),
            Some(&dst),
        )
        .map_err(io::Error::from)?;
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netutil::IfAddr;
    use nix::net::if_::InterfaceFlags;

    fn test_interface(name: &str, addrs: &[IpAddr]) -> NetInterface {
        NetInterface {
            name: name.to_string(),
            index: 1,
            hardware_addr: None,
            flags: InterfaceFlags::IFF_UP | InterfaceFlags::IFF_MULTICAST,
            addrs: addrs.iter().map(|&ip| IfAddr { ip, prefix_len: 24 }).collect(),
        }
    }

    #[test]
    fn mismatched_source_family_is_rejected() {
        let ifi = test_interface("eth0", &[IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2))]);

        let v4 = Sender::new(&ifi, Family::V4);
        let err = v4.send(b"X", "fe80::1".parse().unwrap(), 1900).unwrap_err();
        assert!(matches!(err, SendError::UnsupportedFamily(_)));

        let v6 = Sender::new(&ifi, Family::V6);
        let err = v6.send(b"X", "192.168.1.5".parse().unwrap(), 1900).unwrap_err();
        assert!(matches!(err, SendError::UnsupportedFamily(_)));
    }

    #[test]
    fn v4_send_needs_an_interface_address() {
        let ifi = test_interface("tun0", &[]);
        let sender = Sender::new(&ifi, Family::V4);

        let err = sender
            .send(b"X", "192.168.1.5".parse().unwrap(), 54321)
            .unwrap_err();
        assert!(matches!(err, SendError::BadAddress(name) if name == "tun0"));
    }

    #[test]
    #[ignore] // requires CAP_NET_RAW and a configured interface
    fn v4_send_over_loopback() {
        let ifi = test_interface("lo", &[IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        let sender = Sender::new(&ifi, Family::V4);

        match sender.send(b"X", "192.168.1.5".parse().unwrap(), 54321) {
            Ok(n) => assert_eq!(n, 1),
            Err(SendError::Privilege(_)) => {
                println!("test skipped: requires raw socket privileges");
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
