#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("lib.md")]

mod capture;
mod channel;
mod checksum;
mod classify;
mod error;
mod flood;
mod layer;
mod probe;
mod utils;

pub use error::PktforgeError;

/* CHECKSUM */

/// Internet checksum (RFC 1071) over the first `len` bytes of the buffer.
/// Words are read big-endian, an odd trailing byte is the high byte of a zero-padded word,
/// carries are folded back until the sum fits in 16 bits and the result is the one's complement.
/// A buffer that already carries its correct checksum sums to zero.
pub use checksum::checksum;
/// Checksum seeded with a partial sum, such as a pseudo-header.
pub use checksum::checksum_with;
/// Accumulate big-endian 16-bit words onto a running 32-bit sum without folding.
pub use checksum::ones_complement_sum;
/// Partial sum of the 12-byte IPv4 pseudo-header used by TCP and UDP.
pub use checksum::pseudo_header_sum;

/* HEADER CODEC */

pub use layer::ICMP_ECHO_REPLY;
pub use layer::ICMP_ECHO_REQUEST;
pub use layer::ICMP_HEADER_SIZE;
pub use layer::ICMP_TIMESTAMP_REPLY;
pub use layer::ICMP_TIMESTAMP_REQUEST;
pub use layer::ICMP_TIMESTAMP_SIZE;
pub use layer::IP_PROTOCOL_ICMP;
pub use layer::IP_PROTOCOL_TCP;
pub use layer::IP_PROTOCOL_UDP;
pub use layer::IPV4_HEADER_SIZE;
pub use layer::IcmpEchoHeader;
pub use layer::IcmpTimestamp;
pub use layer::Ipv4Header;
pub use layer::RawBuffer;
pub use layer::TCP_ACK;
pub use layer::TCP_FIN;
pub use layer::TCP_HEADER_SIZE;
pub use layer::TCP_PSH;
pub use layer::TCP_RST;
pub use layer::TCP_SYN;
pub use layer::TCP_URG;
pub use layer::TcpHeader;
/// Decode an ICMP Echo Request or Reply, returning the header and the opaque payload.
pub use layer::decode_icmp_echo;
/// Decode a 20-byte ICMP Timestamp or Timestamp Reply message.
pub use layer::decode_icmp_timestamp;
pub use layer::decode_icmp_type;
/// Decode an IPv4 header, rejecting a version other than 4 and a header length the buffer can not hold.
pub use layer::decode_ipv4;
pub use layer::decode_tcp;
/// Encode an Echo Request or Reply followed by its payload, with the checksum finalized.
pub use layer::encode_icmp_echo;
/// Encode the 20-byte ICMP Timestamp message (RFC 792), with the checksum finalized.
pub use layer::encode_icmp_timestamp;
/// Encode a 20-byte option-less IPv4 header, with the checksum finalized.
pub use layer::encode_ipv4;
/// Encode an option-less TCP segment, checksummed over the IPv4 pseudo-header.
pub use layer::encode_tcp;
/// Zero the checksum field, compute it and write it back.
pub use layer::finalize_icmp;
pub use layer::finalize_ipv4;
pub use layer::finalize_tcp;
pub use layer::ipv4_payload;

/* TRANSMITTER */

pub use channel::ChannelMode;
/// Raw socket owned by one send session and released when dropped.
pub use channel::RawChannel;
/// The seam every send session writes through.
/// Implement it to send over something other than a raw socket.
pub use channel::RawSender;

pub use probe::ProbeKind;
pub use probe::ProbeReport;
pub use probe::build_echo_request;
pub use probe::build_timestamp_request;
/// Send one ICMP Echo Request to the target.
pub use probe::icmp_echo_probe;
/// ICMP Timestamp Probe.
/// Sends one ICMP Timestamp Request (type 13) to the target, identifier set to the process identifier,
/// sequence 1 and the originate timestamp set to the milliseconds since midnight UT at send time.
/// The kernel writes the IP header. The receive and transmit timestamps are left zero.
pub use probe::icmp_timestamp_probe;
pub use probe::ms_since_midnight;
pub use probe::send_probe;
pub use utils::process_identifier;

pub use flood::CancelToken;
pub use flood::FloodConfig;
pub use flood::FloodKind;
pub use flood::FloodPackets;
pub use flood::FloodStats;
pub use flood::FloodTemplate;
pub use flood::SourcePolicy;
pub use flood::SpoofPool;
pub use flood::flood;
/// ICMP Echo Flood.
/// Sends header-included IPv4 + ICMP Echo Request packets until the token is cancelled,
/// each with a source drawn from the spoof pool (when one is set) and a random sequence number.
/// Both checksums are recomputed for every packet. A failed send is logged and the flood goes on.
pub use flood::icmp_flood;
/// Run a flood over any sender, returning what was sent.
pub use flood::run_flood;
/// TCP SYN Flood.
/// Same loop as the ICMP flood, sending SYN segments with a random source port and sequence number.
pub use flood::tcp_syn_flood;
pub use flood::icmp::IcmpFloodTemplate;
pub use flood::tcp::SynFloodTemplate;

/* CLASSIFIER */

pub use capture::Frame;
pub use capture::FrameSource;
pub use capture::FrameTimestamp;
/// Frames read from a network interface through a datalink channel.
pub use capture::LiveSource;
pub use capture::MemorySource;
/// Frames read from a legacy pcap or pcapng file.
pub use capture::PcapFileSource;
pub use classify::ClassificationRecord;
/// Lazy iterator of classification records over a frame source.
/// Relative times are measured from the first frame this classifier sees.
pub use classify::Classifier;
pub use classify::ProtocolLabel;
/// Label one Ethernet frame, falling back to `Unknown L2 Protocol` on anything undecodable.
pub use classify::classify_frame;
