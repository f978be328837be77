use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::ipv4::MutableIpv4Packet;
use rand::Rng;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::PktforgeError;
use crate::flood::FloodTemplate;
use crate::layer::IP_PROTOCOL_ICMP;
use crate::layer::IPV4_HEADER_SIZE;
use crate::layer::IcmpEchoHeader;
use crate::layer::Ipv4Header;
use crate::layer::build_error;
use crate::layer::encode_icmp_echo;
use crate::layer::encode_ipv4;
use crate::layer::finalize_icmp;
use crate::layer::finalize_ipv4;

/// IPv4 + ICMP Echo Request, rewritten in place for every packet.
pub struct IcmpFloodTemplate {
    buff: Vec<u8>,
}

impl IcmpFloodTemplate {
    pub fn new(
        dst_ipv4: Ipv4Addr,
        ttl: u8,
        ip_id: u16,
        identifier: u16,
        payload_len: usize,
    ) -> Result<IcmpFloodTemplate, PktforgeError> {
        let payload = vec![0u8; payload_len];
        let icmp_buff = encode_icmp_echo(&IcmpEchoHeader::request(identifier, 0), &payload)?;

        let mut ip = Ipv4Header::new(
            IP_PROTOCOL_ICMP,
            Ipv4Addr::UNSPECIFIED,
            dst_ipv4,
            icmp_buff.len(),
        );
        ip.ttl = ttl;
        ip.identification = ip_id;
        let ip_buff = encode_ipv4(&ip)?;

        let mut buff = Vec::with_capacity(IPV4_HEADER_SIZE + icmp_buff.len());
        buff.extend_from_slice(&ip_buff);
        buff.extend_from_slice(&icmp_buff);
        debug!(
            "icmp flood template ready, {} bytes, {} payload",
            buff.len(),
            payload_len
        );
        Ok(IcmpFloodTemplate { buff })
    }
}

impl FloodTemplate for IcmpFloodTemplate {
    fn protocol(&self) -> u8 {
        IP_PROTOCOL_ICMP
    }
    fn next_packet<R: Rng + ?Sized>(
        &mut self,
        src_ipv4: Ipv4Addr,
        rng: &mut R,
    ) -> Result<&[u8], PktforgeError> {
        let (ip_buff, icmp_buff) = self.buff.split_at_mut(IPV4_HEADER_SIZE);
        match MutableIpv4Packet::new(ip_buff) {
            Some(mut ip_header) => ip_header.set_source(src_ipv4),
            None => return Err(build_error()),
        }
        match MutableEchoRequestPacket::new(icmp_buff) {
            Some(mut icmp_header) => icmp_header.set_sequence_number(rng.random()),
            None => return Err(build_error()),
        }
        finalize_icmp(icmp_buff)?;
        finalize_ipv4(ip_buff)?;
        Ok(&self.buff)
    }
}
