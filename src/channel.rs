use pnet::packet::Packet;
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::transport::TransportChannelType;
use pnet::transport::TransportChannelType::Layer3;
use pnet::transport::TransportChannelType::Layer4;
use pnet::transport::TransportProtocol;
use pnet::transport::TransportSender;
use pnet::transport::transport_channel;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::PktforgeError;

// big enough to store all data
pub const TRANSPORT_BUFF_SIZE: usize = 4096;

/// Who writes the IP header, chosen once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// The caller supplies the complete IP header (IP_HDRINCL).
    HeaderIncluded,
    /// The kernel builds the IP header, the caller supplies the L4 message.
    KernelHeader,
}

/// Raw datagram sink: `(destination, bytes) -> sent length | transport error`.
pub trait RawSender {
    fn send_to(&mut self, packet: &[u8], dst_ipv4: Ipv4Addr) -> Result<usize, PktforgeError>;
}

/// Already-encoded bytes handed to pnet as is.
struct EncodedPacket<'a>(&'a [u8]);

impl Packet for EncodedPacket<'_> {
    fn packet(&self) -> &[u8] {
        self.0
    }
    fn payload(&self) -> &[u8] {
        self.0
    }
}

fn channel_type(mode: ChannelMode, protocol: u8) -> TransportChannelType {
    let protocol_type = IpNextHeaderProtocol(protocol);
    match mode {
        ChannelMode::HeaderIncluded => Layer3(protocol_type),
        ChannelMode::KernelHeader => Layer4(TransportProtocol::Ipv4(protocol_type)),
    }
}

/// Raw socket owned by one send session. The descriptor is closed when the
/// channel is dropped, so moving it into a session releases it exactly once.
pub struct RawChannel {
    tx: TransportSender,
    mode: ChannelMode,
    protocol: u8,
}

impl RawChannel {
    pub fn open(mode: ChannelMode, protocol: u8) -> Result<RawChannel, PktforgeError> {
        let (tx, _) = match transport_channel(TRANSPORT_BUFF_SIZE, channel_type(mode, protocol)) {
            Ok((tx, rx)) => (tx, rx),
            Err(e) => {
                return Err(PktforgeError::ChannelSetupFailure { e: e.to_string() });
            }
        };
        debug!("raw channel opened, mode: {:?}, protocol: {}", mode, protocol);
        Ok(RawChannel { tx, mode, protocol })
    }
}

impl RawSender for RawChannel {
    fn send_to(&mut self, packet: &[u8], dst_ipv4: Ipv4Addr) -> Result<usize, PktforgeError> {
        match self.tx.send_to(EncodedPacket(packet), dst_ipv4.into()) {
            Ok(n) => Ok(n),
            Err(e) => Err(PktforgeError::TransportFailure {
                dst: dst_ipv4,
                e: e.to_string(),
            }),
        }
    }
}

impl Drop for RawChannel {
    fn drop(&mut self) {
        debug!(
            "raw channel released, mode: {:?}, protocol: {}",
            self.mode, self.protocol
        );
    }
}
