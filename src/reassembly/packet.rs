//! Link, IPv4 and TCP header decoding.
//!
//! Only what the reassembler needs is decoded: addresses, ports, sequence
//! numbers, flags and the TCP payload. Checksums are not verified. IPv6,
//! non-TCP traffic and IP fragments are skipped.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error_handling::types::EngineError;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const IPPROTO_TCP: u8 = 6;
const AF_INET: u32 = 2;

/// Link layers the decoder understands, from pcap link-type numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    /// BSD loopback: 4-byte address family in the capturing host's byte order.
    Null,
    Ethernet,
    /// Bare IP packets (LINKTYPE_RAW and LINKTYPE_IPV4).
    Raw,
    /// Linux cooked capture v1 (16-byte header).
    LinuxSll,
    /// Linux cooked capture v2 (20-byte header).
    LinuxSll2,
}

impl LinkLayer {
    pub fn from_linktype(linktype: i32) -> Result<Self, EngineError> {
        match linktype {
            0 => Ok(LinkLayer::Null),
            1 => Ok(LinkLayer::Ethernet),
            101 | 228 => Ok(LinkLayer::Raw),
            113 => Ok(LinkLayer::LinuxSll),
            276 => Ok(LinkLayer::LinuxSll2),
            other => Err(EngineError::UnsupportedLinktype(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;

    pub fn fin(&self) -> bool {
        self.0 & Self::FIN != 0
    }

    pub fn syn(&self) -> bool {
        self.0 & Self::SYN != 0
    }

    pub fn rst(&self) -> bool {
        self.0 & Self::RST != 0
    }

    pub fn ack(&self) -> bool {
        self.0 & Self::ACK != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    pub source: SocketAddrV4,
    pub dest: SocketAddrV4,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    /// Captured payload; shorter than `wire_len` when the snapshot length
    /// cut the frame.
    pub payload: &'a [u8],
    /// Payload length the IPv4 total length declares.
    pub wire_len: usize,
}

impl TcpSegment<'_> {
    pub fn is_truncated(&self) -> bool {
        self.payload.len() < self.wire_len
    }
}

fn be16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

fn be32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Strips the link header, returning the IPv4 packet if the frame carries one.
fn network_layer(link: LinkLayer, frame: &[u8]) -> Option<&[u8]> {
    match link {
        LinkLayer::Null => {
            if frame.len() < 4 {
                return None;
            }
            let family = [frame[0], frame[1], frame[2], frame[3]];
            if u32::from_le_bytes(family) == AF_INET || u32::from_be_bytes(family) == AF_INET {
                Some(&frame[4..])
            } else {
                None
            }
        }
        LinkLayer::Ethernet => {
            let mut off = 12;
            loop {
                if frame.len() < off + 2 {
                    return None;
                }
                match be16(frame, off) {
                    ETHERTYPE_VLAN | ETHERTYPE_QINQ => off += 4,
                    ETHERTYPE_IPV4 => return Some(&frame[off + 2..]),
                    _ => return None,
                }
            }
        }
        LinkLayer::Raw => Some(frame),
        LinkLayer::LinuxSll => {
            if frame.len() < 16 || be16(frame, 14) != ETHERTYPE_IPV4 {
                return None;
            }
            Some(&frame[16..])
        }
        LinkLayer::LinuxSll2 => {
            if frame.len() < 20 || be16(frame, 0) != ETHERTYPE_IPV4 {
                return None;
            }
            Some(&frame[20..])
        }
    }
}

/// Decodes a captured frame into a TCP segment, or `None` if it is not an
/// unfragmented IPv4 TCP packet.
pub fn decode(link: LinkLayer, frame: &[u8]) -> Option<TcpSegment<'_>> {
    let ip = network_layer(link, frame)?;
    if ip.len() < 20 || ip[0] >> 4 != 4 {
        return None;
    }
    let ihl = usize::from(ip[0] & 0x0f) * 4;
    let total_len = usize::from(be16(ip, 2));
    if ihl < 20 || total_len < ihl || ip.len() < ihl {
        return None;
    }
    // more-fragments flag or a non-zero fragment offset
    if be16(ip, 6) & 0x3fff != 0 || ip[9] != IPPROTO_TCP {
        return None;
    }
    // link-layer padding follows the IP packet; a truncated capture ends early
    let ip = &ip[..std::cmp::min(total_len, ip.len())];
    let src = Ipv4Addr::from(be32(ip, 12));
    let dst = Ipv4Addr::from(be32(ip, 16));

    let tcp = &ip[ihl..];
    if tcp.len() < 20 {
        return None;
    }
    let data_off = usize::from(tcp[12] >> 4) * 4;
    if data_off < 20 || tcp.len() < data_off {
        return None;
    }

    Some(TcpSegment {
        source: SocketAddrV4::new(src, be16(tcp, 0)),
        dest: SocketAddrV4::new(dst, be16(tcp, 2)),
        seq: be32(tcp, 4),
        ack: be32(tcp, 8),
        flags: TcpFlags(tcp[13]),
        payload: &tcp[data_off..],
        wire_len: total_len.saturating_sub(ihl + data_off),
    })
}
