//! IPv4 header inspection
//!
//! Reads the fields the traffic classifier needs (DSCP, protocol, ports)
//! straight from the datagram bytes. The buffer is never modified.

use crate::flow::{FlowKey, PROTO_TCP, PROTO_UDP};
use std::net::Ipv4Addr;

/// EtherType for IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;

const IPV4_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;
const TCP_MIN_HEADER: usize = 20;

/// Transport layer found after the IPv4 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// UDP with a complete header
    Udp {
        /// Source port
        src_port: u16,
        /// Destination port
        dst_port: u16,
    },
    /// TCP with a complete header
    Tcp {
        /// Source port
        src_port: u16,
        /// Destination port
        dst_port: u16,
    },
    /// UDP or TCP whose header does not fit in the datagram
    Truncated(u8),
    /// Any other protocol
    Other(u8),
}

impl Transport {
    /// Ports for classification. Truncated UDP/TCP headers yield zero ports,
    /// other protocols yield `None`.
    pub fn ports(&self) -> Option<(u16, u16)> {
        match *self {
            Self::Udp { src_port, dst_port } | Self::Tcp { src_port, dst_port } => {
                Some((src_port, dst_port))
            }
            Self::Truncated(_) => Some((0, 0)),
            Self::Other(_) => None,
        }
    }
}

/// Parsed view of an IPv4 datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Summary {
    /// Source address
    pub src_ip: Ipv4Addr,
    /// Destination address
    pub dst_ip: Ipv4Addr,
    /// Differentiated services code point (TOS >> 2)
    pub dscp: u8,
    /// Protocol number
    pub protocol: u8,
    /// Transport header
    pub transport: Transport,
}

impl Ipv4Summary {
    /// Parse from a datagram starting at the IPv4 header
    #[inline]
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < IPV4_MIN_HEADER || data[0] >> 4 != 4 {
            return None;
        }

        let ihl = ((data[0] & 0x0f) as usize) * 4;
        if ihl < IPV4_MIN_HEADER || data.len() < ihl {
            return None;
        }

        let dscp = data[1] >> 2;
        let protocol = data[9];
        let src_ip = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let dst_ip = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

        let l4 = &data[ihl..];
        let transport = match protocol {
            PROTO_UDP if l4.len() >= UDP_HEADER => Transport::Udp {
                src_port: u16::from_be_bytes([l4[0], l4[1]]),
                dst_port: u16::from_be_bytes([l4[2], l4[3]]),
            },
            PROTO_TCP if l4.len() >= TCP_MIN_HEADER => Transport::Tcp {
                src_port: u16::from_be_bytes([l4[0], l4[1]]),
                dst_port: u16::from_be_bytes([l4[2], l4[3]]),
            },
            PROTO_UDP | PROTO_TCP => Transport::Truncated(protocol),
            other => Transport::Other(other),
        };

        Some(Self {
            src_ip,
            dst_ip,
            dscp,
            protocol,
            transport,
        })
    }
}

/// Build a minimal IPv4 + UDP/TCP datagram for `key` carrying `payload_len`
/// zero bytes. Used by traffic sources that feed the classifier.
pub fn encode_ipv4(key: &FlowKey, dscp: u8, payload_len: usize) -> Vec<u8> {
    let l4_len = match key.protocol {
        PROTO_UDP => UDP_HEADER,
        PROTO_TCP => TCP_MIN_HEADER,
        _ => 0,
    };
    let total = IPV4_MIN_HEADER + l4_len + payload_len;
    let mut buf = vec![0u8; total];

    buf[0] = 0x45;
    buf[1] = dscp << 2;
    let total_len = u16::try_from(total).unwrap_or(u16::MAX);
    buf[2..4].copy_from_slice(&total_len.to_be_bytes());
    buf[8] = 64;
    buf[9] = key.protocol;
    buf[12..16].copy_from_slice(&key.src_ip.octets());
    buf[16..20].copy_from_slice(&key.dst_ip.octets());

    if l4_len > 0 {
        let l4 = &mut buf[IPV4_MIN_HEADER..];
        l4[0..2].copy_from_slice(&key.src_port.to_be_bytes());
        l4[2..4].copy_from_slice(&key.dst_port.to_be_bytes());
        if key.protocol == PROTO_TCP {
            l4[12] = 0x50; // data offset: 5 words
        }
    }

    buf
}
