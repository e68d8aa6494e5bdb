//! ICMP echo framing
//!
//! Echo requests carry a fixed 10-byte payload. Replies read from a raw
//! IPv4 socket start with the IP header; raw ICMPv6 sockets deliver the
//! ICMPv6 message alone.

use super::{IcmpReply, ReplyKind};
use crate::error::ProbeError;
use crate::probe::EchoIds;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::icmpv6::{Icmpv6Packet, Icmpv6Types};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use pnet::util::checksum as pnet_checksum;

/// Payload carried by every echo request
pub const ECHO_PAYLOAD: &[u8; 10] = b"PinGoTrace";
/// ICMP header length in bytes
const ICMP_HEADER_LEN_BYTES: usize = 8;
/// IPv4 header minimum length in bytes
const IPV4_HEADER_MIN_LEN_BYTES: usize = 20;
/// IPv6 fixed header length in bytes
const IPV6_HEADER_LEN_BYTES: usize = 40;
/// ICMPv6 echo request type
const ICMPV6_ECHO_REQUEST: u8 = 128;

/// Build an ICMPv4 echo request with a valid checksum
pub fn build_echo_request_v4(ids: EchoIds) -> Result<Vec<u8>, ProbeError> {
    let mut buf = vec![0u8; MutableEchoRequestPacket::minimum_packet_size() + ECHO_PAYLOAD.len()];
    let mut packet = MutableEchoRequestPacket::new(&mut buf)
        .ok_or_else(|| ProbeError::MarshalError("buffer too small".to_string()))?;

    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode(0));
    packet.set_identifier(ids.identifier);
    packet.set_sequence_number(ids.sequence);
    packet.set_payload(ECHO_PAYLOAD);

    let checksum = pnet_checksum(packet.packet(), 1);
    packet.set_checksum(checksum);

    Ok(buf)
}

/// Build an ICMPv6 echo request
///
/// The checksum is left zero: the kernel computes ICMPv6 checksums for raw
/// sockets since it covers the IPv6 pseudo-header.
pub fn build_echo_request_v6(ids: EchoIds) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ICMP_HEADER_LEN_BYTES + ECHO_PAYLOAD.len());
    buf.extend_from_slice(&[ICMPV6_ECHO_REQUEST, 0, 0, 0]);
    buf.extend_from_slice(&ids.identifier.to_be_bytes());
    buf.extend_from_slice(&ids.sequence.to_be_bytes());
    buf.extend_from_slice(ECHO_PAYLOAD);
    buf
}

/// Read identifier and sequence from the first 8 bytes of an echo message
fn echo_ids(header: &[u8]) -> Option<EchoIds> {
    if header.len() < ICMP_HEADER_LEN_BYTES {
        return None;
    }
    Some(EchoIds {
        identifier: u16::from_be_bytes([header[4], header[5]]),
        sequence: u16::from_be_bytes([header[6], header[7]]),
    })
}

/// Slice the IPv4 payload using the header length field
fn ipv4_payload(data: &[u8]) -> Option<&[u8]> {
    if data.len() < IPV4_HEADER_MIN_LEN_BYTES {
        return None;
    }
    let header = Ipv4Packet::new(data)?;
    let header_len = usize::from(header.get_header_length()) * 4;
    if header_len < IPV4_HEADER_MIN_LEN_BYTES || data.len() < header_len {
        return None;
    }
    Some(&data[header_len..])
}

/// Identify the echo request quoted inside an IPv4 ICMP error message
fn quoted_ids_v4(icmp_data: &[u8]) -> Option<EchoIds> {
    let original = icmp_data.get(ICMP_HEADER_LEN_BYTES..)?;
    let original_icmp = ipv4_payload(original)?;
    if original_icmp.first() != Some(&IcmpTypes::EchoRequest.0) {
        return None;
    }
    echo_ids(original_icmp)
}

/// Parse a datagram read from a raw IPv4 ICMP socket
///
/// Returns `None` when the datagram is not a well-formed ICMP message.
pub fn parse_reply_v4(data: &[u8]) -> Option<IcmpReply> {
    let icmp_data = ipv4_payload(data)?;
    let icmp_packet = IcmpPacket::new(icmp_data)?;

    let reply = match icmp_packet.get_icmp_type() {
        IcmpTypes::EchoReply => {
            let echo = EchoReplyPacket::new(icmp_data)?;
            IcmpReply {
                kind: ReplyKind::EchoReply,
                ids: Some(EchoIds {
                    identifier: echo.get_identifier(),
                    sequence: echo.get_sequence_number(),
                }),
            }
        }
        IcmpTypes::EchoRequest => IcmpReply {
            kind: ReplyKind::EchoRequest,
            ids: echo_ids(icmp_data),
        },
        IcmpTypes::TimeExceeded => IcmpReply {
            kind: ReplyKind::TimeExceeded,
            ids: quoted_ids_v4(icmp_data),
        },
        IcmpTypes::DestinationUnreachable => IcmpReply {
            kind: ReplyKind::DestinationUnreachable(icmp_packet.get_icmp_code().0),
            ids: quoted_ids_v4(icmp_data),
        },
        other => IcmpReply {
            kind: ReplyKind::Other(other.0),
            ids: None,
        },
    };
    Some(reply)
}

/// Parse a message read from a raw ICMPv6 socket
pub fn parse_reply_v6(data: &[u8]) -> Option<IcmpReply> {
    let packet = Icmpv6Packet::new(data)?;
    let quoted = || {
        let original = data.get(ICMP_HEADER_LEN_BYTES + IPV6_HEADER_LEN_BYTES..)?;
        if original.first() != Some(&ICMPV6_ECHO_REQUEST) {
            return None;
        }
        echo_ids(original)
    };

    let reply = match packet.get_icmpv6_type() {
        Icmpv6Types::EchoReply => IcmpReply {
            kind: ReplyKind::EchoReply,
            ids: echo_ids(data),
        },
        Icmpv6Types::EchoRequest => IcmpReply {
            kind: ReplyKind::EchoRequest,
            ids: echo_ids(data),
        },
        Icmpv6Types::TimeExceeded => IcmpReply {
            kind: ReplyKind::TimeExceeded,
            ids: quoted(),
        },
        Icmpv6Types::DestinationUnreachable => IcmpReply {
            kind: ReplyKind::DestinationUnreachable(packet.get_icmpv6_code().0),
            ids: quoted(),
        },
        other => IcmpReply {
            kind: ReplyKind::Other(other.0),
            ids: None,
        },
    };
    Some(reply)
}
