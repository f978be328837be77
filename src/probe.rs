use chrono::DateTime;
use chrono::Timelike;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::debug;
use tracing::error;

use crate::channel::ChannelMode;
use crate::channel::RawChannel;
use crate::channel::RawSender;
use crate::error::PktforgeError;
use crate::layer::ICMP_TIMESTAMP_SIZE;
use crate::layer::IP_PROTOCOL_ICMP;
use crate::layer::IcmpEchoHeader;
use crate::layer::IcmpTimestamp;
use crate::layer::encode_icmp_echo;
use crate::layer::encode_icmp_timestamp;
use crate::utils::process_identifier;

const PROBE_SEQUENCE: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeKind {
    Timestamp,
    Echo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub dst_ipv4: Ipv4Addr,
    pub kind: ProbeKind,
    pub identifier: u16,
    pub bytes: usize,
    /// Milliseconds since midnight UT written into the message.
    pub originate: u32,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ProbeKind::Timestamp => "ICMP Timestamp",
            ProbeKind::Echo => "ICMP Echo",
        };
        write!(f, "{} Message sent to {}", kind, self.dst_ipv4)
    }
}

/// Milliseconds elapsed since midnight UT, the RFC 792 timestamp unit.
pub fn ms_since_midnight(now: DateTime<Utc>) -> u32 {
    // a leap second reports up to 1999 ms
    let millis = (now.nanosecond() / 1_000_000).min(999);
    now.num_seconds_from_midnight() * 1000 + millis
}

pub fn build_timestamp_request(
    identifier: u16,
    originate: u32,
) -> Result<[u8; ICMP_TIMESTAMP_SIZE], PktforgeError> {
    let request = IcmpTimestamp::request(identifier, PROBE_SEQUENCE, originate);
    encode_icmp_timestamp(&request)
}

/// Echo Request carrying the send time (ms since the epoch, big-endian) as payload.
pub fn build_echo_request(identifier: u16, now: DateTime<Utc>) -> Result<Vec<u8>, PktforgeError> {
    let request = IcmpEchoHeader::request(identifier, PROBE_SEQUENCE);
    let payload = now.timestamp_millis().to_be_bytes();
    encode_icmp_echo(&request, &payload)
}

/// Build one probe message and send it once. The sender is consumed, so the
/// channel is released when this returns, whatever the outcome.
pub fn send_probe<S: RawSender>(
    mut sender: S,
    dst_ipv4: Ipv4Addr,
    kind: ProbeKind,
    identifier: u16,
    now: DateTime<Utc>,
) -> Result<ProbeReport, PktforgeError> {
    let originate = ms_since_midnight(now);
    let message = match kind {
        ProbeKind::Timestamp => build_timestamp_request(identifier, originate)?.to_vec(),
        ProbeKind::Echo => build_echo_request(identifier, now)?,
    };
    match sender.send_to(&message, dst_ipv4) {
        Ok(bytes) => {
            debug!("probe {:?} sent to {}, {} bytes", kind, dst_ipv4, bytes);
            Ok(ProbeReport {
                dst_ipv4,
                kind,
                identifier,
                bytes,
                originate,
            })
        }
        Err(e) => {
            error!("probe {:?} to {} failed: {}", kind, dst_ipv4, e);
            Err(e)
        }
    }
}

fn icmp_probe(dst_ipv4: Ipv4Addr, kind: ProbeKind) -> Result<ProbeReport, PktforgeError> {
    // the kernel writes the IP header
    let channel = RawChannel::open(ChannelMode::KernelHeader, IP_PROTOCOL_ICMP)?;
    send_probe(channel, dst_ipv4, kind, process_identifier(), Utc::now())
}

pub fn icmp_timestamp_probe(dst_ipv4: Ipv4Addr) -> Result<ProbeReport, PktforgeError> {
    icmp_probe(dst_ipv4, ProbeKind::Timestamp)
}

pub fn icmp_echo_probe(dst_ipv4: Ipv4Addr) -> Result<ProbeReport, PktforgeError> {
    icmp_probe(dst_ipv4, ProbeKind::Echo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::MockSender;
    use crate::checksum::checksum;
    use crate::layer::decode_icmp_echo;
    use crate::layer::decode_icmp_timestamp;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 1, 2, 3).unwrap() + chrono::Duration::milliseconds(456)
    }

    #[test]
    fn test_ms_since_midnight() {
        assert_eq!(ms_since_midnight(fixed_now()), 3_723_456);
        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(ms_since_midnight(midnight), 0);
        let last = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap()
            + chrono::Duration::milliseconds(999);
        assert_eq!(ms_since_midnight(last), 86_399_999);
    }
    #[test]
    fn test_timestamp_probe_message() {
        let sender = MockSender::new();
        let sent = sender.sent.clone();
        let drops = sender.drops.clone();
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let report = send_probe(sender, dst, ProbeKind::Timestamp, 0xbeef, fixed_now()).unwrap();
        assert_eq!(report.bytes, ICMP_TIMESTAMP_SIZE);
        assert_eq!(report.to_string(), "ICMP Timestamp Message sent to 10.0.0.2");
        assert_eq!(drops.get(), 1);

        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        let (to, message) = &sent[0];
        assert_eq!(*to, dst);
        assert_eq!(checksum(message, message.len()), 0);
        let t = decode_icmp_timestamp(message).unwrap();
        assert_eq!(t.icmp_type, 13);
        assert_eq!(t.identifier, 0xbeef);
        assert_eq!(t.sequence, 1);
        assert_eq!(t.originate, 3_723_456);
        assert_eq!(t.receive, 0);
        assert_eq!(t.transmit, 0);
    }
    #[test]
    fn test_echo_probe_message() {
        let sender = MockSender::new();
        let sent = sender.sent.clone();
        let dst = Ipv4Addr::new(10, 0, 0, 3);
        send_probe(sender, dst, ProbeKind::Echo, 7, fixed_now()).unwrap();
        let sent = sent.borrow();
        let (h, payload) = decode_icmp_echo(&sent[0].1).unwrap();
        assert_eq!(h.icmp_type, 8);
        assert_eq!(h.identifier, 7);
        assert_eq!(h.sequence, 1);
        assert_eq!(payload, fixed_now().timestamp_millis().to_be_bytes().to_vec());
    }
    #[test]
    fn test_probe_unreachable() {
        let mut sender = MockSender::new();
        sender.fail_when = |_| true;
        let drops = sender.drops.clone();
        let dst = Ipv4Addr::new(203, 0, 113, 1);
        let ret = send_probe(sender, dst, ProbeKind::Timestamp, 1, fixed_now());
        match ret {
            Err(e @ PktforgeError::TransportFailure { .. }) => assert_eq!(e.exit_code(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(drops.get(), 1);
    }
}
