//! Frame decoding and encoding.
//!
//! The bridge only needs a handful of header fields: both MACs and the
//! ether-type from the Ethernet II header, addresses and protocol from IPv4,
//! and ports and flags from TCP. Each layer is decoded independently so a
//! frame whose upper layers are truncated or unknown is still usable for
//! MAC learning.

use bridge_types::{Ipv4Address, MacAddress};
use etherparse::{Ethernet2HeaderSlice, Ipv4HeaderSlice, PacketBuilder, TcpHeaderSlice};

use crate::error::{BridgeError, Result};

/// Ether-type of IPv4 payloads.
pub const ETHER_TYPE_IPV4: u16 = 0x0800;
/// Ether-type of ARP payloads.
pub const ETHER_TYPE_ARP: u16 = 0x0806;
/// IP protocol number of TCP.
pub const IP_PROTO_TCP: u8 = 6;

const ETHERNET2_HEADER_LEN: usize = 14;

/// Fields of the IPv4 header the bridge cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Fields {
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub protocol: u8,
}

/// TCP control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

/// Fields of the TCP header the bridge cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpFields {
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: TcpFlags,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
    pub ether_type: u16,
    pub ipv4: Option<Ipv4Fields>,
    pub tcp: Option<TcpFields>,
}

impl ParsedFrame {
    /// Decodes a raw Ethernet II frame.
    ///
    /// Only a missing or truncated Ethernet header is an error. Upper layers
    /// that fail to decode are reported as absent.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let eth = Ethernet2HeaderSlice::from_slice(data)
            .map_err(|e| BridgeError::MalformedFrame(format!("{:?}", e)))?;

        let src_mac = MacAddress::new(eth.source());
        let dst_mac = MacAddress::new(eth.destination());
        let ether_type = eth.ether_type();

        let mut frame = ParsedFrame {
            src_mac,
            dst_mac,
            ether_type,
            ipv4: None,
            tcp: None,
        };

        if ether_type != ETHER_TYPE_IPV4 {
            return Ok(frame);
        }

        let ip_bytes = &data[ETHERNET2_HEADER_LEN..];
        let ip = match Ipv4HeaderSlice::from_slice(ip_bytes) {
            Ok(ip) => ip,
            Err(_) => return Ok(frame),
        };

        let ip_fields = Ipv4Fields {
            src: Ipv4Address::from(ip.source_addr()),
            dst: Ipv4Address::from(ip.destination_addr()),
            protocol: ip.protocol(),
        };
        let ip_header_len = ip.slice().len();
        frame.ipv4 = Some(ip_fields);

        // Only the first fragment carries the TCP header.
        if ip_fields.protocol != IP_PROTO_TCP || ip.fragments_offset() != 0 {
            return Ok(frame);
        }

        if let Ok(tcp) = TcpHeaderSlice::from_slice(&ip_bytes[ip_header_len..]) {
            frame.tcp = Some(TcpFields {
                src_port: tcp.source_port(),
                dst_port: tcp.destination_port(),
                flags: TcpFlags {
                    syn: tcp.syn(),
                    ack: tcp.ack(),
                    fin: tcp.fin(),
                    rst: tcp.rst(),
                },
            });
        }

        Ok(frame)
    }

    /// Returns the IPv4 and TCP headers when this frame is TCP over IPv4.
    pub fn tcp_over_ipv4(&self) -> Option<(Ipv4Fields, TcpFields)> {
        match (self.ipv4, self.tcp) {
            (Some(ip), Some(tcp)) if ip.protocol == IP_PROTO_TCP => Some((ip, tcp)),
            _ => None,
        }
    }

    pub fn is_tcp(&self) -> bool {
        self.tcp_over_ipv4().is_some()
    }
}

/// Encodes a bare Ethernet II frame with an opaque payload.
pub fn encode_ethernet_frame(
    src: MacAddress,
    dst: MacAddress,
    ether_type: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(ETHERNET2_HEADER_LEN + payload.len());
    out.extend_from_slice(dst.as_bytes());
    out.extend_from_slice(src.as_bytes());
    out.extend_from_slice(&ether_type.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encodes an Ethernet/IPv4/TCP frame.
#[allow(clippy::too_many_arguments)]
pub fn encode_tcp_frame(
    src_mac: MacAddress,
    dst_mac: MacAddress,
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    src_port: u16,
    dst_port: u16,
    flags: TcpFlags,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let mut builder = PacketBuilder::ethernet2(*src_mac.as_bytes(), *dst_mac.as_bytes())
        .ipv4(src_ip.octets(), dst_ip.octets(), 64)
        .tcp(src_port, dst_port, 0, 65535);

    if flags.syn {
        builder = builder.syn();
    }
    if flags.ack {
        builder = builder.ack(0);
    }
    if flags.fin {
        builder = builder.fin();
    }
    if flags.rst {
        builder = builder.rst();
    }

    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder
        .write(&mut out, payload)
        .map_err(|e| BridgeError::MalformedFrame(format!("{:?}", e)))?;
    Ok(out)
}
