//! Internet checksum (RFC 1071).
//!
//! Words are accumulated in a `u64` and the carries are folded back into a
//! `u32` before returning, so any input length sums without overflow.
use std::net::Ipv4Addr;

/// Adds `buff` to `sum` as a sequence of big-endian 16-bit words.
/// A trailing odd byte is the high byte of a zero-padded word.
pub fn ones_complement_sum(buff: &[u8], sum: u32) -> u32 {
    let mut acc = sum as u64;
    let mut words = buff.chunks_exact(2);
    for w in &mut words {
        acc += u16::from_be_bytes([w[0], w[1]]) as u64;
    }
    if let [last] = words.remainder() {
        acc += (*last as u64) << 8;
    }
    // end-around carry keeps the value modulo 0xffff
    while acc > u32::MAX as u64 {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    acc as u32
}

/// Folds the carries above bit 16 back into the low half until none remain.
pub fn fold(sum: u32) -> u16 {
    let mut sum = sum;
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Sum of the IPv4 pseudo-header (source, destination, zero, protocol, length)
/// that TCP and UDP prefix to their checksum input.
pub fn pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, l4_len: u16) -> u32 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = protocol;
    pseudo[10..12].copy_from_slice(&l4_len.to_be_bytes());
    ones_complement_sum(&pseudo, 0)
}

/// Internet checksum over the first `len` bytes of `buff`.
/// Never reads beyond `len`, and never beyond the end of `buff`.
pub fn checksum(buff: &[u8], len: usize) -> u16 {
    let len = len.min(buff.len());
    !fold(ones_complement_sum(&buff[..len], 0))
}

/// Checksum of `buff` seeded with an already accumulated sum (a pseudo-header).
pub fn checksum_with(initial: u32, buff: &[u8]) -> u16 {
    !fold(ones_complement_sum(buff, initial))
}
