//! Frame decoding and ARP synthesis.
//!
//! Ethernet and IPv4/TCP/UDP headers are read with `etherparse`. ARP bodies
//! are fixed 28-byte Ethernet/IPv4 records and are read and written directly.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use etherparse::{Ethernet2HeaderSlice, NetSlice, SlicedPacket, TransportSlice};

use honeyflow_core::types::{
    ETHERTYPE_ARP, ETHERTYPE_IPV4, ETHERTYPE_LLDP, FiveTuple, MacAddr,
};

use crate::error::FlowEngineError;

const ETHERNET_HEADER_LEN: usize = 14;
const ARP_BODY_LEN: usize = 28;
const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_OP_REQUEST: u16 = 1;
const ARP_OP_REPLY: u16 = 2;

/// ARP opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOperation {
    Request,
    Reply,
    Other(u16),
}

impl ArpOperation {
    fn code(self) -> u16 {
        match self {
            Self::Request => ARP_OP_REQUEST,
            Self::Reply => ARP_OP_REPLY,
            Self::Other(code) => code,
        }
    }
}

impl From<u16> for ArpOperation {
    fn from(code: u16) -> Self {
        match code {
            ARP_OP_REQUEST => Self::Request,
            ARP_OP_REPLY => Self::Reply,
            other => Self::Other(other),
        }
    }
}

/// Ethernet/IPv4 ARP record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOperation,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Reply to this request claiming `target_ip` is at `answer_mac`.
    pub fn reply_with(&self, answer_mac: MacAddr) -> Self {
        Self {
            operation: ArpOperation::Reply,
            sender_mac: answer_mac,
            sender_ip: self.target_ip,
            target_mac: self.sender_mac,
            target_ip: self.sender_ip,
        }
    }
}

/// Network layer content of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Arp(ArpPacket),
    /// IPv4 with its 5-tuple. Ports are zero when absent.
    Ipv4(FiveTuple),
    Lldp,
    Other(u16),
}

/// A decoded Ethernet frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    pub ether_type: u16,
    pub payload: FramePayload,
}

/// Decode an Ethernet frame as punted by a switch.
pub fn parse_frame(data: &[u8]) -> Result<ParsedFrame, FlowEngineError> {
    let eth = Ethernet2HeaderSlice::from_slice(data).map_err(|e| FlowEngineError::Frame {
        offset: 0,
        reason: e.to_string(),
    })?;
    let eth_src = MacAddr::new(eth.source());
    let eth_dst = MacAddr::new(eth.destination());
    let ether_type = eth.ether_type().0;

    let payload = match ether_type {
        ETHERTYPE_ARP => FramePayload::Arp(parse_arp_body(&data[ETHERNET_HEADER_LEN..])?),
        ETHERTYPE_IPV4 => FramePayload::Ipv4(parse_ipv4(data)?),
        ETHERTYPE_LLDP => FramePayload::Lldp,
        other => FramePayload::Other(other),
    };

    Ok(ParsedFrame {
        eth_src,
        eth_dst,
        ether_type,
        payload,
    })
}

fn parse_ipv4(data: &[u8]) -> Result<FiveTuple, FlowEngineError> {
    let sliced = SlicedPacket::from_ethernet(data).map_err(|e| FlowEngineError::Frame {
        offset: ETHERNET_HEADER_LEN,
        reason: e.to_string(),
    })?;

    let (src_ip, dst_ip, protocol) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                header.source_addr(),
                header.destination_addr(),
                header.protocol().0,
            )
        }
        _ => {
            return Err(FlowEngineError::Frame {
                offset: ETHERNET_HEADER_LEN,
                reason: "ethertype is IPv4 but no IPv4 header was found".to_owned(),
            });
        }
    };

    // Non-first fragments carry no transport header.
    let (src_port, dst_port) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (tcp.source_port(), tcp.destination_port()),
        Some(TransportSlice::Udp(udp)) => (udp.source_port(), udp.destination_port()),
        _ => (0, 0),
    };

    Ok(FiveTuple {
        src_ip,
        dst_ip,
        protocol,
        src_port,
        dst_port,
    })
}

fn parse_arp_body(body: &[u8]) -> Result<ArpPacket, FlowEngineError> {
    if body.len() < ARP_BODY_LEN {
        return Err(FlowEngineError::Frame {
            offset: ETHERNET_HEADER_LEN,
            reason: format!(
                "ARP body is {} bytes, need {ARP_BODY_LEN}",
                body.len()
            ),
        });
    }

    let htype = u16::from_be_bytes([body[0], body[1]]);
    let ptype = u16::from_be_bytes([body[2], body[3]]);
    if htype != ARP_HTYPE_ETHERNET || ptype != ETHERTYPE_IPV4 || body[4] != 6 || body[5] != 4 {
        return Err(FlowEngineError::Frame {
            offset: ETHERNET_HEADER_LEN,
            reason: format!("unsupported ARP hardware/protocol pair {htype:#06x}/{ptype:#06x}"),
        });
    }

    let mac_at = |i: usize| {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&body[i..i + 6]);
        MacAddr::new(mac)
    };
    let ip_at = |i: usize| Ipv4Addr::new(body[i], body[i + 1], body[i + 2], body[i + 3]);

    Ok(ArpPacket {
        operation: ArpOperation::from(u16::from_be_bytes([body[6], body[7]])),
        sender_mac: mac_at(8),
        sender_ip: ip_at(14),
        target_mac: mac_at(18),
        target_ip: ip_at(24),
    })
}

/// Encode an ARP record inside an Ethernet frame.
pub fn encode_arp(eth_dst: MacAddr, arp: &ArpPacket) -> Bytes {
    let mut buf = BytesMut::with_capacity(ETHERNET_HEADER_LEN + ARP_BODY_LEN);
    buf.put_slice(&eth_dst.octets());
    buf.put_slice(&arp.sender_mac.octets());
    buf.put_u16(ETHERTYPE_ARP);

    buf.put_u16(ARP_HTYPE_ETHERNET);
    buf.put_u16(ETHERTYPE_IPV4);
    buf.put_u8(6);
    buf.put_u8(4);
    buf.put_u16(arp.operation.code());
    buf.put_slice(&arp.sender_mac.octets());
    buf.put_slice(&arp.sender_ip.octets());
    buf.put_slice(&arp.target_mac.octets());
    buf.put_slice(&arp.target_ip.octets());
    buf.freeze()
}

/// Broadcast ARP request asking who has `target_ip`.
pub fn arp_probe(probe_mac: MacAddr, probe_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Bytes {
    let request = ArpPacket {
        operation: ArpOperation::Request,
        sender_mac: probe_mac,
        sender_ip: probe_ip,
        target_mac: MacAddr::ZERO,
        target_ip,
    };
    encode_arp(MacAddr::BROADCAST, &request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;
    use honeyflow_core::types::{IP_PROTO_TCP, IP_PROTO_UDP};

    const CLIENT_MAC: [u8; 6] = [0, 0, 0, 0, 0, 6];
    const SERVER_MAC: [u8; 6] = [0, 0, 0, 0, 0, 1];

    fn tcp_frame(src_port: u16, dst_port: u16) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC)
            .ipv4([10, 0, 0, 6], [10, 0, 0, 1], 64)
            .tcp(src_port, dst_port, 1, 64240);
        let mut buf = Vec::with_capacity(builder.size(0));
        builder.write(&mut buf, &[]).unwrap();
        buf
    }

    #[test]
    fn parses_tcp_five_tuple() {
        let frame = parse_frame(&tcp_frame(40000, 8080)).unwrap();
        assert_eq!(frame.eth_src, MacAddr::new(CLIENT_MAC));
        assert_eq!(frame.eth_dst, MacAddr::new(SERVER_MAC));
        assert_eq!(frame.ether_type, ETHERTYPE_IPV4);
        assert_eq!(
            frame.payload,
            FramePayload::Ipv4(FiveTuple {
                src_ip: Ipv4Addr::new(10, 0, 0, 6),
                dst_ip: Ipv4Addr::new(10, 0, 0, 1),
                protocol: IP_PROTO_TCP,
                src_port: 40000,
                dst_port: 8080,
            })
        );
    }

    #[test]
    fn parses_udp_ports() {
        let builder = PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC)
            .ipv4([10, 0, 0, 6], [10, 0, 0, 1], 64)
            .udp(5353, 53);
        let payload = [1u8, 2, 3, 4];
        let mut buf = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut buf, &payload).unwrap();

        match parse_frame(&buf).unwrap().payload {
            FramePayload::Ipv4(t) => {
                assert_eq!(t.protocol, IP_PROTO_UDP);
                assert_eq!((t.src_port, t.dst_port), (5353, 53));
            }
            other => panic!("expected IPv4, got {other:?}"),
        }
    }

    #[test]
    fn arp_roundtrip_through_encoder() {
        let request = ArpPacket {
            operation: ArpOperation::Request,
            sender_mac: MacAddr::new(CLIENT_MAC),
            sender_ip: Ipv4Addr::new(10, 0, 0, 6),
            target_mac: MacAddr::ZERO,
            target_ip: Ipv4Addr::new(10, 0, 0, 100),
        };
        let bytes = encode_arp(MacAddr::BROADCAST, &request);
        assert_eq!(bytes.len(), 42);

        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.eth_dst, MacAddr::BROADCAST);
        assert_eq!(frame.payload, FramePayload::Arp(request));
    }

    #[test]
    fn reply_swaps_roles() {
        let request = ArpPacket {
            operation: ArpOperation::Request,
            sender_mac: MacAddr::new(CLIENT_MAC),
            sender_ip: Ipv4Addr::new(10, 0, 0, 6),
            target_mac: MacAddr::ZERO,
            target_ip: Ipv4Addr::new(10, 0, 0, 100),
        };
        let answer = MacAddr::new([2, 0, 0, 0, 0, 0x64]);
        let reply = request.reply_with(answer);
        assert_eq!(reply.operation, ArpOperation::Reply);
        assert_eq!(reply.sender_mac, answer);
        assert_eq!(reply.sender_ip, request.target_ip);
        assert_eq!(reply.target_mac, request.sender_mac);
        assert_eq!(reply.target_ip, request.sender_ip);
    }

    #[test]
    fn probe_is_broadcast_request() {
        let probe = arp_probe(
            MacAddr::new([2, 0, 0, 0, 0, 0xfe]),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(10, 0, 0, 5),
        );
        let frame = parse_frame(&probe).unwrap();
        assert!(frame.eth_dst.is_broadcast());
        match frame.payload {
            FramePayload::Arp(arp) => {
                assert_eq!(arp.operation, ArpOperation::Request);
                assert_eq!(arp.target_ip, Ipv4Addr::new(10, 0, 0, 5));
            }
            other => panic!("expected ARP, got {other:?}"),
        }
    }

    #[test]
    fn lldp_and_unknown_ethertypes() {
        let mut frame = vec![0u8; 60];
        frame[12] = 0x88;
        frame[13] = 0xcc;
        assert_eq!(parse_frame(&frame).unwrap().payload, FramePayload::Lldp);

        frame[12] = 0x86;
        frame[13] = 0xdd;
        assert_eq!(
            parse_frame(&frame).unwrap().payload,
            FramePayload::Other(0x86dd)
        );
    }

    #[test]
    fn truncated_frames_are_errors() {
        assert!(parse_frame(&[0u8; 10]).is_err());

        let mut arp = vec![0u8; 20];
        arp[12] = 0x08;
        arp[13] = 0x06;
        assert!(parse_frame(&arp).is_err());

        let tcp = tcp_frame(1, 2);
        assert!(parse_frame(&tcp[..20]).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parse_arbitrary_bytes_does_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..200)) {
            let _ = parse_frame(&bytes);
        }

        #[test]
        fn truncated_arp_is_an_error(cut in 0usize..42) {
            let frame = arp_probe(
                MacAddr::new([2, 0, 0, 0, 0, 0xfe]),
                Ipv4Addr::UNSPECIFIED,
                Ipv4Addr::new(10, 0, 0, 4),
            );
            prop_assert!(parse_frame(&frame[..cut]).is_err());
        }
    }
}
