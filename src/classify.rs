use pnet::packet::Packet;
use pnet::packet::ethernet::EtherTypes;
use pnet::packet::ethernet::EthernetPacket;
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ip::IpNextHeaderProtocols;
use serde::Serialize;
use serde::Serializer;
use std::fmt;
use std::iter::FusedIterator;
use tracing::debug;
use tracing::trace;

use crate::capture::FrameSource;
use crate::capture::FrameTimestamp;
use crate::error::PktforgeError;
use crate::layer::ICMP_ECHO_REPLY;
use crate::layer::ICMP_ECHO_REQUEST;
use crate::layer::decode_icmp_type;
use crate::layer::decode_ipv4;
use crate::layer::ipv4_payload;

/// The closed set of labels a frame can get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolLabel {
    Arp,
    IcmpEchoRequest,
    IcmpEchoReply,
    /// Any other ICMP type, by number.
    Icmp(u8),
    Tcp,
    Udp,
    /// Any other IP protocol, by number.
    OtherIp(u8),
    UnknownL2,
}

impl fmt::Display for ProtocolLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolLabel::Arp => write!(f, "ARP Packet"),
            ProtocolLabel::IcmpEchoRequest => write!(f, "ICMP Echo Request (Ping)"),
            ProtocolLabel::IcmpEchoReply => write!(f, "ICMP Echo Reply (Pong)"),
            ProtocolLabel::Icmp(t) => write!(f, "ICMP Type: {}", t),
            ProtocolLabel::Tcp => write!(f, "TCP Segment"),
            ProtocolLabel::Udp => write!(f, "UDP Datagram"),
            ProtocolLabel::OtherIp(p) => write!(f, "Other IP Protocol ({})", p),
            ProtocolLabel::UnknownL2 => write!(f, "Unknown L2 Protocol"),
        }
    }
}

impl Serialize for ProtocolLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationRecord {
    /// Seconds since the first frame of the session.
    pub relative_time: f64,
    pub label: ProtocolLabel,
}

impl fmt::Display for ClassificationRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:.6}] {}", self.relative_time, self.label)
    }
}

fn classify_ipv4(buff: &[u8]) -> Result<ProtocolLabel, PktforgeError> {
    let ip = decode_ipv4(buff)?;
    let label = match IpNextHeaderProtocol(ip.protocol) {
        IpNextHeaderProtocols::Icmp => match decode_icmp_type(ipv4_payload(buff)?)? {
            ICMP_ECHO_REQUEST => ProtocolLabel::IcmpEchoRequest,
            ICMP_ECHO_REPLY => ProtocolLabel::IcmpEchoReply,
            t => ProtocolLabel::Icmp(t),
        },
        IpNextHeaderProtocols::Tcp => ProtocolLabel::Tcp,
        IpNextHeaderProtocols::Udp => ProtocolLabel::Udp,
        _ => ProtocolLabel::OtherIp(ip.protocol),
    };
    Ok(label)
}

/// Label one Ethernet frame. Anything that can not be decoded far enough is
/// reported as an unknown L2 protocol instead of failing.
pub fn classify_frame(frame: &[u8]) -> ProtocolLabel {
    let ethernet = match EthernetPacket::new(frame) {
        Some(p) => p,
        None => {
            trace!("frame of {} bytes shorter than ethernet", frame.len());
            return ProtocolLabel::UnknownL2;
        }
    };
    match ethernet.get_ethertype() {
        EtherTypes::Arp => ProtocolLabel::Arp,
        EtherTypes::Ipv4 => match classify_ipv4(ethernet.payload()) {
            Ok(label) => label,
            Err(e) => {
                debug!("undecodable ipv4 frame: {}", e);
                ProtocolLabel::UnknownL2
            }
        },
        _ => ProtocolLabel::UnknownL2,
    }
}

/// Lazy classification over a frame source, one record per frame in arrival
/// order. The first frame seen becomes the session anchor. A source error is
/// yielded once and ends the sequence.
pub struct Classifier<S: FrameSource> {
    source: S,
    anchor: Option<FrameTimestamp>,
    done: bool,
}

impl<S: FrameSource> Classifier<S> {
    pub fn new(source: S) -> Classifier<S> {
        Classifier {
            source,
            anchor: None,
            done: false,
        }
    }
    pub fn anchor(&self) -> Option<FrameTimestamp> {
        self.anchor
    }
}

impl<S: FrameSource> Iterator for Classifier<S> {
    type Item = Result<ClassificationRecord, PktforgeError>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        let anchor = *self.anchor.get_or_insert(frame.timestamp);
        Some(Ok(ClassificationRecord {
            relative_time: frame.timestamp.relative_to(&anchor),
            label: classify_frame(frame.data.as_slice()),
        }))
    }
}

impl<S: FrameSource> FusedIterator for Classifier<S> {}
