use pnet::datalink::NetworkInterface;
use pnet::datalink::interfaces;
use rand::Rng;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use tracing::debug;
use tracing::warn;

/// 16-bit value distinguishing this process on the wire, used as the ICMP identifier.
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Returns the random port.
pub fn random_port<R: Rng + ?Sized>(rng: &mut R) -> u16 {
    rng.random_range(1024..=65535)
}

pub fn find_interface_by_name(name: &str) -> Option<NetworkInterface> {
    for interface in interfaces() {
        if interface.name == name {
            return Some(interface);
        }
    }
    debug!("can not found interface by name: {}", name);
    None
}

/// Pick the local address the kernel would most likely use toward `dst_ipv4`:
/// an address on the same network first, then any address of an up, non-loopback interface.
pub fn find_source_addr(dst_ipv4: Ipv4Addr) -> Option<Ipv4Addr> {
    let mut fallback = None;
    for interface in interfaces() {
        if interface.is_loopback() || !interface.is_up() {
            continue;
        }
        for ipnetwork in &interface.ips {
            if let IpAddr::V4(ipv4) = ipnetwork.ip() {
                if ipnetwork.contains(dst_ipv4.into()) {
                    debug!("found source ipv4: {} on {}", ipv4, interface.name);
                    return Some(ipv4);
                }
                if fallback.is_none() {
                    fallback = Some(ipv4);
                }
            }
        }
    }
    if dst_ipv4.is_loopback() {
        return Some(Ipv4Addr::LOCALHOST);
    }
    match fallback {
        Some(ipv4) => debug!("use fallback source ipv4: {}", ipv4),
        None => warn!("can not found source of the dst: {}", dst_ipv4),
    }
    fallback
}
