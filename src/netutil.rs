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

//! Network interface enumeration and filtering.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::Context;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::{if_nametoindex, InterfaceFlags};
use socket2::{Domain, Protocol, Socket, Type};

use crate::listener::SSDP_V6_GROUP;

/// One unicast address assigned to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfAddr {
    pub ip: IpAddr,
    pub prefix_len: u8,
}

/// Snapshot of a network interface. Read-only to the relay core.
#[derive(Debug, Clone)]
pub struct NetInterface {
    pub name: String,
    pub index: u32,
    pub hardware_addr: Option<[u8; 6]>,
    pub flags: InterfaceFlags,
    pub addrs: Vec<IfAddr>,
}

// The name is the routing key: listeners tag messages with it and senders
// are skipped by it, so two descriptors are the same interface iff their
// names match.
impl PartialEq for NetInterface {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl NetInterface {
    pub fn is_up(&self) -> bool {
        self.flags.contains(InterfaceFlags::IFF_UP)
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags.contains(InterfaceFlags::IFF_BROADCAST)
    }

    pub fn is_loopback(&self) -> bool {
        self.flags.contains(InterfaceFlags::IFF_LOOPBACK)
    }

    pub fn is_point_to_point(&self) -> bool {
        self.flags.contains(InterfaceFlags::IFF_POINTOPOINT)
    }

    pub fn is_multicast(&self) -> bool {
        self.flags.contains(InterfaceFlags::IFF_MULTICAST)
    }

    /// First IPv4 address, used to pin multicast membership and egress.
    pub fn ipv4_addr(&self) -> Option<Ipv4Addr> {
        self.addrs.iter().find_map(|a| match a.ip {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
    }

    pub fn has_ipv4(&self) -> bool {
        self.addrs.iter().any(|a| a.ip.is_ipv4())
    }

    pub fn has_public_ipv4(&self) -> bool {
        self.addrs.iter().any(|a| match a.ip {
            IpAddr::V4(ip) => !is_private_ipv4(ip),
            IpAddr::V6(_) => false,
        })
    }

    pub fn has_ipv6(&self) -> bool {
        self.addrs.iter().any(|a| a.ip.is_ipv6())
    }

    pub fn has_public_ipv6(&self) -> bool {
        self.addrs.iter().any(|a| match a.ip {
            IpAddr::V4(_) => false,
            IpAddr::V6(ip) => !is_private_ipv6(ip),
        })
    }

    /// Multi-line human-readable description for startup debugging.
    pub fn describe(&self) -> String {
        const FLAG_NAMES: [(InterfaceFlags, &str); 5] = [
            (InterfaceFlags::IFF_UP, "up"),
            (InterfaceFlags::IFF_BROADCAST, "broadcast"),
            (InterfaceFlags::IFF_LOOPBACK, "loopback"),
            (InterfaceFlags::IFF_POINTOPOINT, "pointtopoint"),
            (InterfaceFlags::IFF_MULTICAST, "multicast"),
        ];

        let flags: Vec<&str> = FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.flags.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        let addrs: Vec<String> = self
            .addrs
            .iter()
            .map(|a| format!("{}/{}", a.ip, a.prefix_len))
            .collect();

        format!(
            "{} ({})\n  Flags: {}\n  Unicast addresses:\n    {}",
            self.name,
            self.hardware_addr.as_ref().map(format_mac).unwrap_or_default(),
            flags.join(", "),
            addrs.join("\n    "),
        )
    }
}

/// Enumerates the host's interfaces, one descriptor per name.
pub fn interfaces() -> anyhow::Result<Vec<NetInterface>> {
    let mut out: Vec<NetInterface> = Vec::new();

    for ifaddr in getifaddrs().context("listing interfaces")? {
        let pos = match out.iter().position(|i| i.name == ifaddr.interface_name) {
            Some(pos) => pos,
            None => {
                let index = if_nametoindex(ifaddr.interface_name.as_str())
                    .with_context(|| format!("looking up index of {}", ifaddr.interface_name))?;
                out.push(NetInterface {
                    name: ifaddr.interface_name.clone(),
                    index,
                    hardware_addr: None,
                    flags: ifaddr.flags,
                    addrs: Vec::new(),
                });
                out.len() - 1
            }
        };
        let entry = &mut out[pos];

        let Some(address) = ifaddr.address else {
            continue;
        };

        if let Some(link) = address.as_link_addr() {
            if let Some(mac) = link.addr() {
                if mac != [0u8; 6] {
                    entry.hardware_addr = Some(mac);
                }
            }
        } else if let Some(sin) = address.as_sockaddr_in() {
            let prefix_len = ifaddr
                .netmask
                .as_ref()
                .and_then(|m| m.as_sockaddr_in())
                .map(|m| u32::from(m.ip()).count_ones() as u8)
                .unwrap_or(32);
            entry.addrs.push(IfAddr {
                ip: IpAddr::V4(sin.ip()),
                prefix_len,
            });
        } else if let Some(sin6) = address.as_sockaddr_in6() {
            let prefix_len = ifaddr
                .netmask
                .as_ref()
                .and_then(|m| m.as_sockaddr_in6())
                .map(|m| u128::from(m.ip()).count_ones() as u8)
                .unwrap_or(128);
            entry.addrs.push(IfAddr {
                ip: IpAddr::V6(sin6.ip()),
                prefix_len,
            });
        }
    }

    Ok(out)
}

/// RFC 1918 plus loopback and link-local: 10/8, 127/8, 169.254/16,
/// 172.16/12, 192.168/16.
pub fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 10
        || o[0] == 127
        || (o[0] == 169 && o[1] == 254)
        || (o[0] == 172 && (o[1] & 0xf0) == 16)
        || (o[0] == 192 && o[1] == 168)
}

/// ::1/128, fe80::/10, fc00::/7.
pub fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip == Ipv6Addr::LOCALHOST || (first & 0xffc0) == 0xfe80 || (first & 0xfe00) == 0xfc00
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

#[allow(dead_code)]
pub fn parse_mac(s: &str) -> anyhow::Result<[u8; 6]> {
    let parts: Vec<&str> = s.split([':', '-']).collect();
    anyhow::ensure!(parts.len() == 6, "invalid hardware address: {s}");
    let mut mac = [0u8; 6];
    for (byte, part) in mac.iter_mut().zip(&parts) {
        *byte = u8::from_str_radix(part, 16)
            .with_context(|| format!("invalid hardware address: {s}"))?;
    }
    Ok(mac)
}

/// Conjunction of interface predicates. Every constraint left unset
/// matches everything; `has_ipv4` and `has_public_ipv4` are independent,
/// as are their v6 counterparts.
#[derive(Debug, Clone, Default)]
pub struct InterfaceQuery {
    names: Vec<String>,
    macs: Vec<[u8; 6]>,
    ips: Vec<IpAddr>,
    is_up: Option<bool>,
    is_broadcast: Option<bool>,
    is_loopback: Option<bool>,
    is_point_to_point: Option<bool>,
    is_multicast: Option<bool>,
    has_ipv4: Option<bool>,
    has_public_ipv4: Option<bool>,
    has_ipv6: Option<bool>,
    has_public_ipv6: Option<bool>,
}

#[allow(dead_code)]
impl InterfaceQuery {
    pub fn new() -> InterfaceQuery {
        InterfaceQuery::default()
    }

    pub fn names<I, S>(mut self, names: I) -> InterfaceQuery
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn mac(mut self, mac: [u8; 6]) -> InterfaceQuery {
        self.macs.push(mac);
        self
    }

    pub fn ip(mut self, ip: IpAddr) -> InterfaceQuery {
        self.ips.push(ip);
        self
    }

    pub fn up(mut self, up: bool) -> InterfaceQuery {
        self.is_up = Some(up);
        self
    }

    pub fn broadcast(mut self, broadcast: bool) -> InterfaceQuery {
        self.is_broadcast = Some(broadcast);
        self
    }

    pub fn loopback(mut self, loopback: bool) -> InterfaceQuery {
        self.is_loopback = Some(loopback);
        self
    }

    pub fn point_to_point(mut self, ptp: bool) -> InterfaceQuery {
        self.is_point_to_point = Some(ptp);
        self
    }

    pub fn multicast(mut self, multicast: bool) -> InterfaceQuery {
        self.is_multicast = Some(multicast);
        self
    }

    pub fn has_ipv4(mut self, v: bool) -> InterfaceQuery {
        self.has_ipv4 = Some(v);
        self
    }

    pub fn has_public_ipv4(mut self, v: bool) -> InterfaceQuery {
        self.has_public_ipv4 = Some(v);
        self
    }

    pub fn has_ipv6(mut self, v: bool) -> InterfaceQuery {
        self.has_ipv6 = Some(v);
        self
    }

    pub fn has_public_ipv6(mut self, v: bool) -> InterfaceQuery {
        self.has_public_ipv6 = Some(v);
        self
    }

    pub fn matches(&self, ifi: &NetInterface) -> bool {
        fn constraint(want: Option<bool>, have: bool) -> bool {
            want.map_or(true, |want| want == have)
        }

        constraint(self.is_up, ifi.is_up())
            && constraint(self.is_broadcast, ifi.is_broadcast())
            && constraint(self.is_loopback, ifi.is_loopback())
            && constraint(self.is_point_to_point, ifi.is_point_to_point())
            && constraint(self.is_multicast, ifi.is_multicast())
            && (self.names.is_empty() || self.names.iter().any(|n| *n == ifi.name))
            && (self.macs.is_empty()
                || ifi.hardware_addr.is_some_and(|mac| self.macs.contains(&mac)))
            && (self.ips.is_empty() || ifi.addrs.iter().any(|a| self.ips.contains(&a.ip)))
            && constraint(self.has_ipv4, ifi.has_ipv4())
            && constraint(self.has_public_ipv4, ifi.has_public_ipv4())
            && constraint(self.has_ipv6, ifi.has_ipv6())
            && constraint(self.has_public_ipv6, ifi.has_public_ipv6())
    }
}

pub fn filter_interfaces(ifs: Vec<NetInterface>, query: &InterfaceQuery) -> Vec<NetInterface> {
    ifs.into_iter().filter(|ifi| query.matches(ifi)).collect()
}

/// Enumerates and filters in one step.
pub fn get_interfaces(query: &InterfaceQuery) -> anyhow::Result<Vec<NetInterface>> {
    Ok(filter_interfaces(interfaces()?, query))
}

/// Probes whether this interface can receive IPv6 multicast at all by
/// joining the SSDP group on a throwaway socket. Interfaces (and hosts)
/// that fail the probe run v4-only; a failure past the probe is still
/// treated as fatal.
pub fn ipv6_multicast_supported(ifi: &NetInterface) -> bool {
    let probe = || -> std::io::Result<()> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        socket.join_multicast_v6(&SSDP_V6_GROUP, ifi.index)
    };

    match probe() {
        Ok(()) => true,
        Err(e) => {
            log::debug!("no IPv6 multicast on {}: {e}", ifi.name);
            false
        }
    }
}
