use pnet::packet::Packet;
use pnet::packet::icmp::IcmpCode;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmp::IcmpType;
use pnet::packet::icmp::echo_request::EchoRequestPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::MutableTcpPacket;
use pnet::packet::tcp::TcpPacket;
use serde::Deserialize;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::panic::Location;

use crate::checksum::checksum;
use crate::checksum::checksum_with;
use crate::checksum::pseudo_header_sum;
use crate::error::PktforgeError;

pub const IPV4_HEADER_SIZE: usize = 20;
pub const ICMP_HEADER_SIZE: usize = 8;
pub const ICMP_TIMESTAMP_SIZE: usize = 20;
pub const TCP_HEADER_SIZE: usize = 20;
pub const IPV4_MAX_DATAGRAM_SIZE: usize = 65535;

const IPV4_CHECKSUM_OFFSET: usize = 10;
const ICMP_CHECKSUM_OFFSET: usize = 2;
const TCP_CHECKSUM_OFFSET: usize = 16;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_TIMESTAMP_REQUEST: u8 = 13;
pub const ICMP_TIMESTAMP_REPLY: u8 = 14;

pub const IP_PROTOCOL_ICMP: u8 = 1;
pub const IP_PROTOCOL_TCP: u8 = 6;
pub const IP_PROTOCOL_UDP: u8 = 17;

pub const TCP_FIN: u8 = 0b0000_0001;
pub const TCP_SYN: u8 = 0b0000_0010;
pub const TCP_RST: u8 = 0b0000_0100;
pub const TCP_PSH: u8 = 0b0000_1000;
pub const TCP_ACK: u8 = 0b0001_0000;
pub const TCP_URG: u8 = 0b0010_0000;

fn truncated(layer: &'static str, need: usize, got: usize) -> PktforgeError {
    PktforgeError::TruncatedHeader { layer, need, got }
}

#[track_caller]
pub(crate) fn build_error() -> PktforgeError {
    PktforgeError::BuildPacketError {
        location: format!("{}", Location::caller()),
    }
}

/// Owned packet buffer with a capacity fixed at creation.
/// Multi-byte fields placed in it are always in network byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBuffer {
    buff: Vec<u8>,
    capacity: usize,
}

impl RawBuffer {
    pub fn new(capacity: usize) -> RawBuffer {
        RawBuffer {
            buff: Vec::with_capacity(capacity),
            capacity,
        }
    }
    pub fn len(&self) -> usize {
        self.buff.len()
    }
    pub fn is_empty(&self) -> bool {
        self.buff.is_empty()
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    /// Appends `data`, refusing to grow past the capacity.
    pub fn push(&mut self, data: &[u8]) -> Result<(), PktforgeError> {
        if self.buff.len() + data.len() > self.capacity {
            return Err(build_error());
        }
        self.buff.extend_from_slice(data);
        Ok(())
    }
    pub fn as_slice(&self) -> &[u8] {
        &self.buff
    }
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buff
    }
}

impl From<Vec<u8>> for RawBuffer {
    fn from(buff: Vec<u8>) -> RawBuffer {
        let capacity = buff.len();
        RawBuffer { buff, capacity }
    }
}

impl AsRef<[u8]> for RawBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buff
    }
}

/* IPv4 */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Header {
    /// In 32-bit words.
    pub header_length: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    /// The 3 flag bits (reserved, DF, MF).
    pub flags: u8,
    /// 13 bits, in 8-byte units.
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    /// Ignored on encode, the encoder always writes the computed value.
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    /// Option-less header for a datagram carrying `payload_len` bytes.
    pub fn new(
        protocol: u8,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        payload_len: usize,
    ) -> Ipv4Header {
        Ipv4Header {
            header_length: 5,
            tos: 0,
            total_length: (IPV4_HEADER_SIZE + payload_len) as u16,
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl: 64,
            protocol,
            checksum: 0,
            source,
            destination,
        }
    }
}

/// Zero the header checksum, compute it over the header span and write it back.
pub fn finalize_ipv4(buff: &mut [u8]) -> Result<u16, PktforgeError> {
    if buff.len() < IPV4_HEADER_SIZE {
        return Err(truncated("ipv4", IPV4_HEADER_SIZE, buff.len()));
    }
    let header_len = (buff[0] & 0x0f) as usize * 4;
    if header_len < IPV4_HEADER_SIZE {
        return Err(PktforgeError::MalformedFrame {
            reason: format!("ipv4 header length {} below minimum", header_len),
        });
    }
    if header_len > buff.len() {
        return Err(truncated("ipv4", header_len, buff.len()));
    }
    buff[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2].fill(0);
    let c = checksum(buff, header_len);
    buff[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2].copy_from_slice(&c.to_be_bytes());
    Ok(c)
}

/// Encode an option-less IPv4 header with its checksum finalized.
pub fn encode_ipv4(header: &Ipv4Header) -> Result<[u8; IPV4_HEADER_SIZE], PktforgeError> {
    if header.header_length != 5 {
        return Err(PktforgeError::InvalidConfiguration {
            reason: format!(
                "ipv4 header length {} words, only option-less headers (5) are encoded",
                header.header_length
            ),
        });
    }
    if header.flags > 0b111 || header.fragment_offset > 0x1fff {
        return Err(PktforgeError::InvalidConfiguration {
            reason: format!(
                "ipv4 flags {:#x} or fragment offset {:#x} out of range",
                header.flags, header.fragment_offset
            ),
        });
    }
    if (header.total_length as usize) < IPV4_HEADER_SIZE {
        return Err(PktforgeError::InvalidConfiguration {
            reason: format!("ipv4 total length {} below header size", header.total_length),
        });
    }

    let mut ip_buff = [0u8; IPV4_HEADER_SIZE];
    let mut ip_header = match MutableIpv4Packet::new(&mut ip_buff) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    ip_header.set_version(4);
    ip_header.set_header_length(header.header_length);
    ip_header.set_dscp(header.tos >> 2);
    ip_header.set_ecn(header.tos & 0b11);
    ip_header.set_total_length(header.total_length);
    ip_header.set_identification(header.identification);
    ip_header.set_flags(header.flags);
    ip_header.set_fragment_offset(header.fragment_offset);
    ip_header.set_ttl(header.ttl);
    ip_header.set_next_level_protocol(IpNextHeaderProtocol(header.protocol));
    ip_header.set_source(header.source);
    ip_header.set_destination(header.destination);
    finalize_ipv4(&mut ip_buff)?;
    Ok(ip_buff)
}

/// Decode an IPv4 header. The reported header length is only trusted after it
/// has been checked against the buffer.
pub fn decode_ipv4(buff: &[u8]) -> Result<Ipv4Header, PktforgeError> {
    let ip_packet = match Ipv4Packet::new(buff) {
        Some(p) => p,
        None => return Err(truncated("ipv4", IPV4_HEADER_SIZE, buff.len())),
    };
    let version = ip_packet.get_version();
    if version != 4 {
        return Err(PktforgeError::MalformedFrame {
            reason: format!("ip version {} is not 4", version),
        });
    }
    let header_length = ip_packet.get_header_length();
    let header_len = header_length as usize * 4;
    if header_len < IPV4_HEADER_SIZE {
        return Err(PktforgeError::MalformedFrame {
            reason: format!("ipv4 header length {} below minimum", header_len),
        });
    }
    if header_len > buff.len() {
        return Err(truncated("ipv4", header_len, buff.len()));
    }
    Ok(Ipv4Header {
        header_length,
        tos: (ip_packet.get_dscp() << 2) | ip_packet.get_ecn(),
        total_length: ip_packet.get_total_length(),
        identification: ip_packet.get_identification(),
        flags: ip_packet.get_flags(),
        fragment_offset: ip_packet.get_fragment_offset(),
        ttl: ip_packet.get_ttl(),
        protocol: ip_packet.get_next_level_protocol().0,
        checksum: ip_packet.get_checksum(),
        source: ip_packet.get_source(),
        destination: ip_packet.get_destination(),
    })
}

/// The bytes carried after the IPv4 header, bounded by the total length
/// when that is consistent with the buffer.
pub fn ipv4_payload(buff: &[u8]) -> Result<&[u8], PktforgeError> {
    let header = decode_ipv4(buff)?;
    let start = header.header_length as usize * 4;
    let total = header.total_length as usize;
    let end = if total >= start && total <= buff.len() {
        total
    } else {
        buff.len()
    };
    Ok(&buff[start..end])
}

/* ICMP */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpEchoHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl IcmpEchoHeader {
    pub fn request(identifier: u16, sequence: u16) -> IcmpEchoHeader {
        IcmpEchoHeader {
            icmp_type: ICMP_ECHO_REQUEST,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpTimestamp {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    /// Milliseconds since midnight UT.
    pub originate: u32,
    pub receive: u32,
    pub transmit: u32,
}

impl IcmpTimestamp {
    /// A request only originates, so receive and transmit stay zero.
    pub fn request(identifier: u16, sequence: u16, originate: u32) -> IcmpTimestamp {
        IcmpTimestamp {
            icmp_type: ICMP_TIMESTAMP_REQUEST,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            originate,
            receive: 0,
            transmit: 0,
        }
    }
}

/// Zero the ICMP checksum, compute it over the whole message and write it back.
pub fn finalize_icmp(buff: &mut [u8]) -> Result<u16, PktforgeError> {
    if buff.len() < ICMP_HEADER_SIZE {
        return Err(truncated("icmp", ICMP_HEADER_SIZE, buff.len()));
    }
    buff[ICMP_CHECKSUM_OFFSET..ICMP_CHECKSUM_OFFSET + 2].fill(0);
    let c = checksum(buff, buff.len());
    buff[ICMP_CHECKSUM_OFFSET..ICMP_CHECKSUM_OFFSET + 2].copy_from_slice(&c.to_be_bytes());
    Ok(c)
}

fn write_echo_layout(
    icmp_buff: &mut [u8],
    icmp_type: u8,
    code: u8,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Result<(), PktforgeError> {
    let mut icmp_header = match MutableEchoRequestPacket::new(icmp_buff) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    icmp_header.set_icmp_type(IcmpType(icmp_type));
    icmp_header.set_icmp_code(IcmpCode(code));
    icmp_header.set_identifier(identifier);
    icmp_header.set_sequence_number(sequence);
    icmp_header.set_payload(payload);
    Ok(())
}

/// Encode an Echo Request/Reply with its opaque payload, checksum finalized.
pub fn encode_icmp_echo(header: &IcmpEchoHeader, payload: &[u8]) -> Result<Vec<u8>, PktforgeError> {
    if header.icmp_type != ICMP_ECHO_REQUEST && header.icmp_type != ICMP_ECHO_REPLY {
        return Err(PktforgeError::InvalidConfiguration {
            reason: format!("icmp type {} is not an echo type", header.icmp_type),
        });
    }
    if ICMP_HEADER_SIZE + payload.len() > IPV4_MAX_DATAGRAM_SIZE - IPV4_HEADER_SIZE {
        return Err(PktforgeError::InvalidConfiguration {
            reason: format!("icmp echo payload of {} bytes does not fit a datagram", payload.len()),
        });
    }
    let mut icmp_buff = vec![0u8; ICMP_HEADER_SIZE + payload.len()];
    write_echo_layout(
        &mut icmp_buff,
        header.icmp_type,
        header.code,
        header.identifier,
        header.sequence,
        payload,
    )?;
    finalize_icmp(&mut icmp_buff)?;
    Ok(icmp_buff)
}

pub fn decode_icmp_echo(buff: &[u8]) -> Result<(IcmpEchoHeader, Vec<u8>), PktforgeError> {
    let echo = match EchoRequestPacket::new(buff) {
        Some(p) => p,
        None => return Err(truncated("icmp echo", ICMP_HEADER_SIZE, buff.len())),
    };
    let icmp_type = echo.get_icmp_type().0;
    if icmp_type != ICMP_ECHO_REQUEST && icmp_type != ICMP_ECHO_REPLY {
        return Err(PktforgeError::MalformedFrame {
            reason: format!("icmp type {} is not an echo type", icmp_type),
        });
    }
    let header = IcmpEchoHeader {
        icmp_type,
        code: echo.get_icmp_code().0,
        checksum: echo.get_checksum(),
        identifier: echo.get_identifier(),
        sequence: echo.get_sequence_number(),
    };
    Ok((header, echo.payload().to_vec()))
}

/// Encode a Timestamp Request/Reply (RFC 792), checksum finalized.
pub fn encode_icmp_timestamp(
    header: &IcmpTimestamp,
) -> Result<[u8; ICMP_TIMESTAMP_SIZE], PktforgeError> {
    if header.icmp_type != ICMP_TIMESTAMP_REQUEST && header.icmp_type != ICMP_TIMESTAMP_REPLY {
        return Err(PktforgeError::InvalidConfiguration {
            reason: format!("icmp type {} is not a timestamp type", header.icmp_type),
        });
    }
    let mut timestamps = [0u8; ICMP_TIMESTAMP_SIZE - ICMP_HEADER_SIZE];
    timestamps[0..4].copy_from_slice(&header.originate.to_be_bytes());
    timestamps[4..8].copy_from_slice(&header.receive.to_be_bytes());
    timestamps[8..12].copy_from_slice(&header.transmit.to_be_bytes());

    // same leading layout as an echo message
    let mut icmp_buff = [0u8; ICMP_TIMESTAMP_SIZE];
    write_echo_layout(
        &mut icmp_buff,
        header.icmp_type,
        header.code,
        header.identifier,
        header.sequence,
        &timestamps,
    )?;
    finalize_icmp(&mut icmp_buff)?;
    Ok(icmp_buff)
}

pub fn decode_icmp_timestamp(buff: &[u8]) -> Result<IcmpTimestamp, PktforgeError> {
    if buff.len() < ICMP_TIMESTAMP_SIZE {
        return Err(truncated("icmp timestamp", ICMP_TIMESTAMP_SIZE, buff.len()));
    }
    let message = match EchoRequestPacket::new(buff) {
        Some(p) => p,
        None => return Err(truncated("icmp timestamp", ICMP_TIMESTAMP_SIZE, buff.len())),
    };
    let icmp_type = message.get_icmp_type().0;
    if icmp_type != ICMP_TIMESTAMP_REQUEST && icmp_type != ICMP_TIMESTAMP_REPLY {
        return Err(PktforgeError::MalformedFrame {
            reason: format!("icmp type {} is not a timestamp type", icmp_type),
        });
    }
    let ts = message.payload();
    let be32 = |at: usize| u32::from_be_bytes([ts[at], ts[at + 1], ts[at + 2], ts[at + 3]]);
    Ok(IcmpTimestamp {
        icmp_type,
        code: message.get_icmp_code().0,
        checksum: message.get_checksum(),
        identifier: message.get_identifier(),
        sequence: message.get_sequence_number(),
        originate: be32(0),
        receive: be32(4),
        transmit: be32(8),
    })
}

/// Type byte of any ICMP message.
pub fn decode_icmp_type(buff: &[u8]) -> Result<u8, PktforgeError> {
    match IcmpPacket::new(buff) {
        Some(p) => Ok(p.get_icmp_type().0),
        None => Err(truncated("icmp", 4, buff.len())),
    }
}

/* TCP */

/// Construct-only view of a TCP header, no connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgement: u32,
    /// In 32-bit words.
    pub data_offset: u8,
    pub flags: u8,
    pub window: u16,
    /// Ignored on encode.
    pub checksum: u16,
    pub urgent_ptr: u16,
}

impl TcpHeader {
    pub fn syn(source_port: u16, destination_port: u16, sequence: u32) -> TcpHeader {
        TcpHeader {
            source_port,
            destination_port,
            sequence,
            acknowledgement: 0,
            data_offset: 5,
            flags: TCP_SYN,
            window: 1024,
            checksum: 0,
            urgent_ptr: 0,
        }
    }
}

/// Zero the TCP checksum, compute it over pseudo-header + segment and write it back.
pub fn finalize_tcp(
    buff: &mut [u8],
    src_ipv4: Ipv4Addr,
    dst_ipv4: Ipv4Addr,
) -> Result<u16, PktforgeError> {
    if buff.len() < TCP_HEADER_SIZE {
        return Err(truncated("tcp", TCP_HEADER_SIZE, buff.len()));
    }
    if buff.len() > IPV4_MAX_DATAGRAM_SIZE - IPV4_HEADER_SIZE {
        return Err(build_error());
    }
    buff[TCP_CHECKSUM_OFFSET..TCP_CHECKSUM_OFFSET + 2].fill(0);
    let pseudo = pseudo_header_sum(src_ipv4, dst_ipv4, IP_PROTOCOL_TCP, buff.len() as u16);
    let c = checksum_with(pseudo, buff);
    buff[TCP_CHECKSUM_OFFSET..TCP_CHECKSUM_OFFSET + 2].copy_from_slice(&c.to_be_bytes());
    Ok(c)
}

/// Encode an option-less TCP segment, checksum finalized against the
/// pseudo-header of `src_ipv4` and `dst_ipv4`.
pub fn encode_tcp(
    header: &TcpHeader,
    src_ipv4: Ipv4Addr,
    dst_ipv4: Ipv4Addr,
    payload: &[u8],
) -> Result<Vec<u8>, PktforgeError> {
    if header.data_offset != 5 {
        return Err(PktforgeError::InvalidConfiguration {
            reason: format!(
                "tcp data offset {} words, only option-less headers (5) are encoded",
                header.data_offset
            ),
        });
    }
    let mut tcp_buff = vec![0u8; TCP_HEADER_SIZE + payload.len()];
    let mut tcp_header = match MutableTcpPacket::new(&mut tcp_buff) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    tcp_header.set_source(header.source_port);
    tcp_header.set_destination(header.destination_port);
    tcp_header.set_sequence(header.sequence);
    tcp_header.set_acknowledgement(header.acknowledgement);
    tcp_header.set_data_offset(header.data_offset);
    tcp_header.set_reserved(0);
    tcp_header.set_flags(header.flags.into());
    tcp_header.set_window(header.window);
    tcp_header.set_urgent_ptr(header.urgent_ptr);
    tcp_header.set_payload(payload);
    finalize_tcp(&mut tcp_buff, src_ipv4, dst_ipv4)?;
    Ok(tcp_buff)
}

pub fn decode_tcp(buff: &[u8]) -> Result<TcpHeader, PktforgeError> {
    let tcp_packet = match TcpPacket::new(buff) {
        Some(p) => p,
        None => return Err(truncated("tcp", TCP_HEADER_SIZE, buff.len())),
    };
    let data_offset = tcp_packet.get_data_offset();
    let header_len = data_offset as usize * 4;
    if header_len < TCP_HEADER_SIZE {
        return Err(PktforgeError::MalformedFrame {
            reason: format!("tcp data offset {} below minimum", data_offset),
        });
    }
    if header_len > buff.len() {
        return Err(truncated("tcp", header_len, buff.len()));
    }
    Ok(TcpHeader {
        source_port: tcp_packet.get_source(),
        destination_port: tcp_packet.get_destination(),
        sequence: tcp_packet.get_sequence(),
        acknowledgement: tcp_packet.get_acknowledgement(),
        data_offset,
        flags: (tcp_packet.get_flags() & 0xff) as u8,
        window: tcp_packet.get_window(),
        checksum: tcp_packet.get_checksum(),
        urgent_ptr: tcp_packet.get_urgent_ptr(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::icmp;
    use pnet::packet::ipv4;
    use pnet::packet::tcp;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn scenario_header() -> Ipv4Header {
        let mut h = Ipv4Header::new(
            IP_PROTOCOL_ICMP,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            ICMP_HEADER_SIZE,
        );
        h.ttl = 64;
        h
    }

    #[test]
    fn test_encode_ipv4_reference() {
        let h = scenario_header();
        assert_eq!(h.total_length, 28);
        let ip_buff = encode_ipv4(&h).unwrap();
        assert_eq!(
            ip_buff,
            [
                0x45, 0x00, 0x00, 0x1c, 0x00, 0x00, 0x00, 0x00, 0x40, 0x01, 0x66, 0xdf, 0x0a, 0x00,
                0x00, 0x01, 0x0a, 0x00, 0x00, 0x02
            ]
        );
        let d = decode_ipv4(&ip_buff).unwrap();
        assert_eq!(d.checksum, 0x66df);
        assert_eq!(Ipv4Header { checksum: 0, ..d }, h);
        assert_eq!(checksum(&ip_buff, IPV4_HEADER_SIZE), 0);
    }
    #[test]
    fn test_ipv4_checksum_matches_pnet() {
        let ip_buff = encode_ipv4(&scenario_header()).unwrap();
        let packet = Ipv4Packet::new(&ip_buff).unwrap();
        assert_eq!(ipv4::checksum(&packet), 0x66df);
    }
    #[test]
    fn test_ipv4_round_trip() {
        let mut rng = StdRng::seed_from_u64(791);
        for _ in 0..1000 {
            let h = Ipv4Header {
                header_length: 5,
                tos: rng.random(),
                total_length: rng.random_range(20..=u16::MAX),
                identification: rng.random(),
                flags: rng.random_range(0..=7),
                fragment_offset: rng.random_range(0..=0x1fff),
                ttl: rng.random(),
                protocol: rng.random(),
                checksum: 0,
                source: Ipv4Addr::from(rng.random::<u32>()),
                destination: Ipv4Addr::from(rng.random::<u32>()),
            };
            let ip_buff = encode_ipv4(&h).unwrap();
            let d = decode_ipv4(&ip_buff).unwrap();
            assert_eq!(Ipv4Header { checksum: 0, ..d }, h);
            assert_eq!(checksum(&ip_buff, IPV4_HEADER_SIZE), 0);
        }
    }
    #[test]
    fn test_encode_ipv4_rejects_bad_fields() {
        let mut h = scenario_header();
        h.header_length = 6;
        assert!(matches!(
            encode_ipv4(&h),
            Err(PktforgeError::InvalidConfiguration { .. })
        ));
        let mut h = scenario_header();
        h.fragment_offset = 0x2000;
        assert!(encode_ipv4(&h).is_err());
        let mut h = scenario_header();
        h.total_length = 19;
        assert!(encode_ipv4(&h).is_err());
    }
    #[test]
    fn test_decode_ipv4_truncated() {
        let ip_buff = encode_ipv4(&scenario_header()).unwrap();
        match decode_ipv4(&ip_buff[..19]) {
            Err(PktforgeError::TruncatedHeader { need, got, .. }) => {
                assert_eq!(need, 20);
                assert_eq!(got, 19);
            }
            other => panic!("unexpected {:?}", other),
        }
        // header claims 60 bytes of options that are not there
        let mut lying = ip_buff;
        lying[0] = 0x4f;
        assert!(matches!(
            decode_ipv4(&lying),
            Err(PktforgeError::TruncatedHeader { need: 60, got: 20, .. })
        ));
        let mut short_ihl = ip_buff;
        short_ihl[0] = 0x44;
        assert!(matches!(
            decode_ipv4(&short_ihl),
            Err(PktforgeError::MalformedFrame { .. })
        ));
        let mut v6 = ip_buff;
        v6[0] = 0x65;
        assert!(matches!(
            decode_ipv4(&v6),
            Err(PktforgeError::MalformedFrame { .. })
        ));
    }
    #[test]
    fn test_ipv4_payload_bounds() {
        let h = scenario_header();
        let mut datagram = encode_ipv4(&h).unwrap().to_vec();
        datagram.extend_from_slice(&[8, 0, 0, 0, 0, 0, 0, 0]);
        // ethernet padding past the total length
        datagram.extend_from_slice(&[0u8; 6]);
        assert_eq!(ipv4_payload(&datagram).unwrap().len(), 8);
    }
    #[test]
    fn test_finalize_ipv4_recomputes() {
        let mut ip_buff = encode_ipv4(&scenario_header()).unwrap();
        ip_buff[12..16].copy_from_slice(&[10, 0, 0, 9]);
        assert_ne!(checksum(&ip_buff, IPV4_HEADER_SIZE), 0);
        finalize_ipv4(&mut ip_buff).unwrap();
        assert_eq!(checksum(&ip_buff, IPV4_HEADER_SIZE), 0);
        // stale garbage in the checksum field must not leak into the result
        ip_buff[10] = 0xab;
        let c = finalize_ipv4(&mut ip_buff).unwrap();
        assert_eq!(decode_ipv4(&ip_buff).unwrap().checksum, c);
        assert_eq!(checksum(&ip_buff, IPV4_HEADER_SIZE), 0);
    }
    #[test]
    fn test_icmp_echo_empty_payload() {
        let h = IcmpEchoHeader::request(0x1234, 1);
        let icmp_buff = encode_icmp_echo(&h, &[]).unwrap();
        assert_eq!(icmp_buff.len(), ICMP_HEADER_SIZE);
        assert_eq!(checksum(&icmp_buff, icmp_buff.len()), 0);
        let packet = IcmpPacket::new(&icmp_buff).unwrap();
        assert_eq!(icmp::checksum(&packet), u16::from_be_bytes([icmp_buff[2], icmp_buff[3]]));
    }
    #[test]
    fn test_icmp_echo_round_trip() {
        let h = IcmpEchoHeader {
            icmp_type: ICMP_ECHO_REPLY,
            code: 0,
            checksum: 0,
            identifier: 4321,
            sequence: 65535,
        };
        let payload = b"abcdefghi";
        let icmp_buff = encode_icmp_echo(&h, payload).unwrap();
        assert_eq!(checksum(&icmp_buff, icmp_buff.len()), 0);
        let (d, p) = decode_icmp_echo(&icmp_buff).unwrap();
        assert_eq!(IcmpEchoHeader { checksum: 0, ..d }, h);
        assert_eq!(p, payload.to_vec());
        assert!(decode_icmp_echo(&icmp_buff[..7]).is_err());
    }
    #[test]
    fn test_icmp_echo_rejects_other_types() {
        let mut h = IcmpEchoHeader::request(1, 1);
        h.icmp_type = ICMP_TIMESTAMP_REQUEST;
        assert!(encode_icmp_echo(&h, &[]).is_err());
    }
    #[test]
    fn test_icmp_timestamp_layout() {
        let t = IcmpTimestamp::request(0x0102, 1, 0x0a0b0c0d);
        let icmp_buff = encode_icmp_timestamp(&t).unwrap();
        assert_eq!(icmp_buff[0], 13);
        assert_eq!(icmp_buff[1], 0);
        assert_eq!(&icmp_buff[4..8], &[0x01, 0x02, 0x00, 0x01]);
        assert_eq!(&icmp_buff[8..12], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(&icmp_buff[12..20], &[0u8; 8]);
        assert_eq!(checksum(&icmp_buff, ICMP_TIMESTAMP_SIZE), 0);
        let d = decode_icmp_timestamp(&icmp_buff).unwrap();
        assert_eq!(IcmpTimestamp { checksum: 0, ..d }, t);
        assert!(matches!(
            decode_icmp_timestamp(&icmp_buff[..19]),
            Err(PktforgeError::TruncatedHeader { need: 20, got: 19, .. })
        ));
    }
    #[test]
    fn test_tcp_checksum_matches_pnet() {
        let src = Ipv4Addr::new(192, 168, 5, 3);
        let dst = Ipv4Addr::new(192, 168, 5, 5);
        let h = TcpHeader::syn(29450, 8080, 0xdeadbeef);
        let tcp_buff = encode_tcp(&h, src, dst, &[]).unwrap();
        let packet = TcpPacket::new(&tcp_buff).unwrap();
        assert_eq!(tcp::ipv4_checksum(&packet, &src, &dst), packet.get_checksum());
        let d = decode_tcp(&tcp_buff).unwrap();
        assert_eq!(TcpHeader { checksum: 0, ..d }, h);
        assert_eq!(d.flags & TCP_SYN, TCP_SYN);
        assert_eq!(d.flags & (TCP_ACK | TCP_RST | TCP_FIN | TCP_PSH | TCP_URG), 0);
    }
    #[test]
    fn test_decode_tcp_truncated() {
        let tcp_buff = encode_tcp(
            &TcpHeader::syn(1, 2, 3),
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            &[],
        )
        .unwrap();
        assert!(decode_tcp(&tcp_buff[..10]).is_err());
    }
    #[test]
    fn test_raw_buffer_capacity() {
        let mut rb = RawBuffer::new(4);
        rb.push(&[1, 2]).unwrap();
        rb.push(&[3, 4]).unwrap();
        assert!(rb.push(&[5]).is_err());
        assert_eq!(rb.len(), 4);
        assert_eq!(rb.as_slice(), &[1, 2, 3, 4]);
    }
}
