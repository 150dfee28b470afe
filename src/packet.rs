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

//! Hand-built datagram images for the raw senders.
//!
//! A regular UDP socket stamps the kernel's idea of the source address
//! onto outgoing packets; the relay must instead carry the *original*
//! sender's address so that SSDP clients can reply to it. These builders
//! produce the byte image handed to a raw socket: a full IPv4+UDP packet
//! for v4 (`IP_HDRINCL`), and a UDP segment for v6 (the kernel builds the
//! v6 header around it).

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::listener::{SSDP_PORT, SSDP_V4_GROUP, SSDP_V6_GROUP};

pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

const UDP_PROTOCOL: u8 = 17;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("payload of {0} bytes does not fit in a UDP datagram")]
pub struct OversizedPayload(pub usize);

/// Internet checksum (RFC 1071): ones-complement sum of 16-bit words,
/// folded and inverted.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// UDP header and payload with the checksum field zeroed.
fn udp_segment(src_port: u16, payload: &[u8]) -> Vec<u8> {
    let len = (UDP_HEADER_LEN + payload.len()) as u16;
    let mut segment = Vec::with_capacity(usize::from(len));
    segment.extend_from_slice(&src_port.to_be_bytes());
    segment.extend_from_slice(&SSDP_PORT.to_be_bytes());
    segment.extend_from_slice(&len.to_be_bytes());
    segment.extend_from_slice(&[0, 0]);
    segment.extend_from_slice(payload);
    segment
}

/// Checksums `segment` against the IPv4 pseudo-header (RFC 768).
fn udp_checksum_v4(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut data = Vec::with_capacity(12 + segment.len());
    data.extend_from_slice(&src.octets());
    data.extend_from_slice(&dst.octets());
    data.push(0);
    data.push(UDP_PROTOCOL);
    data.extend_from_slice(&(segment.len() as u16).to_be_bytes());
    data.extend_from_slice(segment);
    transmit_checksum(internet_checksum(&data))
}

/// Checksums `segment` against the IPv6 pseudo-header (RFC 2460 §8.1).
/// Mandatory for UDP over IPv6.
fn udp_checksum_v6(src: Ipv6Addr, dst: Ipv6Addr, segment: &[u8]) -> u16 {
    let mut data = Vec::with_capacity(40 + segment.len());
    data.extend_from_slice(&src.octets());
    data.extend_from_slice(&dst.octets());
    data.extend_from_slice(&(segment.len() as u32).to_be_bytes());
    data.extend_from_slice(&[0, 0, 0]);
    data.push(UDP_PROTOCOL);
    data.extend_from_slice(segment);
    transmit_checksum(internet_checksum(&data))
}

// A computed checksum of zero is transmitted as all-ones; zero on the
// wire means "no checksum" (RFC 768).
fn transmit_checksum(sum: u16) -> u16 {
    if sum == 0 {
        0xFFFF
    } else {
        sum
    }
}

/// Builds the full `[IPv4 header | UDP header | payload]` image for an
/// `IP_HDRINCL` raw socket. Source fields are the spoofed originals; the
/// destination is the SSDP group. The IP header checksum and
/// identification are left zero for the kernel to fill in.
pub fn build_ipv4(src: Ipv4Addr, src_port: u16, payload: &[u8]) -> Result<Vec<u8>, OversizedPayload> {
    let total_len = IPV4_HEADER_LEN + UDP_HEADER_LEN + payload.len();
    if total_len > usize::from(u16::MAX) {
        return Err(OversizedPayload(payload.len()));
    }

    let mut packet = Vec::with_capacity(total_len);
    packet.push(0x45); // version 4, header length 20
    packet.push(0); // DSCP/ECN
    // macOS raw sockets want the total length in host order, everything
    // else takes network order.
    if cfg!(target_os = "macos") {
        packet.extend_from_slice(&(total_len as u16).to_ne_bytes());
    } else {
        packet.extend_from_slice(&(total_len as u16).to_be_bytes());
    }
    packet.extend_from_slice(&[0, 0]); // identification, kernel fills
    packet.extend_from_slice(&[0, 0]); // flags, fragment offset
    packet.push(1); // TTL, keeps relayed packets link-local
    packet.push(UDP_PROTOCOL);
    packet.extend_from_slice(&[0, 0]); // header checksum, kernel fills
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&SSDP_V4_GROUP.octets());

    let mut segment = udp_segment(src_port, payload);
    let sum = udp_checksum_v4(src, SSDP_V4_GROUP, &segment);
    segment[6..8].copy_from_slice(&sum.to_be_bytes());
    packet.extend_from_slice(&segment);

    Ok(packet)
}

/// Builds the `[UDP header | payload]` image for a v6 raw socket. The
/// kernel constructs the IPv6 header; the spoofed source still has to be
/// folded into the checksum here since it rides in via `IPV6_PKTINFO`.
pub fn build_udp_v6(
    src: Ipv6Addr,
    src_port: u16,
    payload: &[u8],
) -> Result<Vec<u8>, OversizedPayload> {
    if UDP_HEADER_LEN + payload.len() > usize::from(u16::MAX) {
        return Err(OversizedPayload(payload.len()));
    }

    let mut segment = udp_segment(src_port, payload);
    let sum = udp_checksum_v6(src, SSDP_V6_GROUP, &segment);
    segment[6..8].copy_from_slice(&sum.to_be_bytes());
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC_V4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 5);
    const SRC_V6: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);

    #[test]
    fn ipv4_header_fields() {
        let packet = build_ipv4(SRC_V4, 54321, b"X").unwrap();

        assert_eq!(packet.len(), IPV4_HEADER_LEN + UDP_HEADER_LEN + 1);
        assert_eq!(packet[0], 0x45);
        assert_eq!(packet[8], 1, "TTL must be 1");
        assert_eq!(packet[9], 17, "protocol must be UDP");
        assert_eq!(&packet[12..16], &SRC_V4.octets());
        assert_eq!(&packet[16..20], &Ipv4Addr::new(239, 255, 255, 250).octets());
    }

    #[test]
    fn ipv4_udp_fields_carry_the_original_source_port() {
        let packet = build_ipv4(SRC_V4, 54321, b"X").unwrap();
        let udp = &packet[IPV4_HEADER_LEN..];

        assert_eq!(u16::from_be_bytes([udp[0], udp[1]]), 54321);
        assert_eq!(u16::from_be_bytes([udp[2], udp[3]]), 1900);
        assert_eq!(u16::from_be_bytes([udp[4], udp[5]]), 9, "UDP length covers header + payload");
        assert_eq!(&udp[8..], b"X");
    }

    // A receiver verifies by summing pseudo-header and segment with the
    // checksum field in place; the fold must come out as zero.
    #[test]
    fn ipv4_udp_checksum_verifies() {
        let packet = build_ipv4(SRC_V4, 54321, b"NOTIFY * HTTP/1.1\r\n\r\n").unwrap();
        let segment = &packet[IPV4_HEADER_LEN..];

        let mut data = Vec::new();
        data.extend_from_slice(&SRC_V4.octets());
        data.extend_from_slice(&SSDP_V4_GROUP.octets());
        data.push(0);
        data.push(17);
        data.extend_from_slice(&(segment.len() as u16).to_be_bytes());
        data.extend_from_slice(segment);

        assert_eq!(internet_checksum(&data), 0);
    }

    #[test]
    fn ipv6_udp_checksum_verifies() {
        let segment = build_udp_v6(SRC_V6, 1900, b"M-SEARCH * HTTP/1.1\r\n\r\n").unwrap();

        let mut data = Vec::new();
        data.extend_from_slice(&SRC_V6.octets());
        data.extend_from_slice(&SSDP_V6_GROUP.octets());
        data.extend_from_slice(&(segment.len() as u32).to_be_bytes());
        data.extend_from_slice(&[0, 0, 0]);
        data.push(17);
        data.extend_from_slice(&segment);

        assert_eq!(internet_checksum(&data), 0);
    }

    #[test]
    fn checksum_handles_odd_length_payloads() {
        let packet = build_ipv4(SRC_V4, 1900, b"odd").unwrap();
        assert_eq!(packet.len(), IPV4_HEADER_LEN + UDP_HEADER_LEN + 3);
    }

    // RFC 768: zero means "no checksum", so a computed zero goes out as
    // all-ones. Sweeping one 16-bit payload word necessarily crosses the
    // input whose sum would otherwise be zero.
    #[test]
    fn checksum_field_is_never_zero_on_the_wire() {
        for word in 0..=u16::MAX {
            let segment = build_udp_v6(SRC_V6, 1900, &word.to_be_bytes()).unwrap();
            assert_ne!(
                u16::from_be_bytes([segment[6], segment[7]]),
                0,
                "payload word {word:#06x} produced a zero checksum field"
            );
        }
    }

    #[test]
    fn oversized_payloads_are_rejected() {
        let payload = vec![0u8; usize::from(u16::MAX)];
        assert_eq!(build_ipv4(SRC_V4, 1900, &payload), Err(OversizedPayload(payload.len())));
        assert_eq!(build_udp_v6(SRC_V6, 1900, &payload), Err(OversizedPayload(payload.len())));

        let max_v6 = vec![0u8; usize::from(u16::MAX) - UDP_HEADER_LEN];
        assert!(build_udp_v6(SRC_V6, 1900, &max_v6).is_ok());
    }
}
