// src/core/prefix.rs

//! IP address and prefix types used throughout the pipeline. Every address
//! is uniformly represented as a 128-bit value (IPv4 addresses are mapped
//! into the IPv6 space) so that prefix masking and fixed-length key encoding
//! never need to branch on address family.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An address normalized to its 128-bit representation, plus enough
/// information to print it back in its original family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr {
    bits: u128,
    is_v4: bool,
}

impl Addr {
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Addr {
                bits: u128::from(v4.to_bits()),
                is_v4: true,
            },
            IpAddr::V6(v6) => Addr {
                bits: v6.to_bits(),
                is_v4: false,
            },
        }
    }

    pub fn is_v4(self) -> bool {
        self.is_v4
    }

    pub fn is_v6(self) -> bool {
        !self.is_v4
    }

    pub fn to_bits(self) -> u128 {
        self.bits
    }

    /// 16-byte big-endian representation. For IPv4 addresses, the value is
    /// the 32-bit address zero-extended into the high bits of a 128-bit
    /// field — this is an internal fixed-length encoding, not the IPv4-
    /// mapped-IPv6 (`::ffff:a.b.c.d`) convention.
    pub fn to_be_bytes(self) -> [u8; 16] {
        self.bits.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16], is_v4: bool) -> Self {
        Addr {
            bits: u128::from_be_bytes(bytes),
            is_v4,
        }
    }

    pub fn to_ip(self) -> IpAddr {
        if self.is_v4 {
            IpAddr::V4(Ipv4Addr::from_bits(self.bits as u32))
        } else {
            IpAddr::V6(Ipv6Addr::from_bits(self.bits))
        }
    }
}

impl From<IpAddr> for Addr {
    fn from(ip: IpAddr) -> Self {
        Addr::from_ip(ip)
    }
}

impl crate::core::dbkey::KeyObject for Addr {
    fn db_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ip())
    }
}

/// An IP address plus a bit length: all addresses matching the first `bits`
/// bits of `addr` belong to the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prefix {
    addr: Addr,
    bits: u8,
}

impl Prefix {
    pub fn new(addr: Addr, bits: u8) -> Self {
        Prefix { addr, bits }
    }

    pub fn addr(self) -> Addr {
        self.addr
    }

    pub fn bits(self) -> u8 {
        self.bits
    }

    /// Zeroes the host bits so that equal prefixes have equal byte
    /// representations ("masked prefix" in the glossary).
    pub fn masked(self) -> Self {
        let width: u32 = if self.addr.is_v4 { 32 } else { 128 };
        let bits = self.bits.min(width as u8);
        let mask: u128 = if bits == 0 {
            0
        } else if (bits as u32) >= width {
            if self.addr.is_v4 {
                u128::from(u32::MAX)
            } else {
                u128::MAX
            }
        } else {
            // Host bits live in the low bits of the 128-bit field regardless
            // of family, because `Addr` zero-extends IPv4 into the high
            // bits; shift the mask down to the family width first.
            let full_mask: u128 = if (bits as u32) >= width {
                u128::MAX
            } else {
                !((1u128 << (width - bits as u32)) - 1)
            };
            full_mask
        };
        let masked_bits = self.addr.bits & mask;
        Prefix {
            addr: Addr {
                bits: masked_bits,
                is_v4: self.addr.is_v4,
            },
            bits,
        }
    }

    pub fn contains(self, addr: Addr) -> bool {
        if self.addr.is_v4 != addr.is_v4 {
            return false;
        }
        let width: u32 = if self.addr.is_v4 { 32 } else { 128 };
        if self.bits as u32 >= width {
            return addr.bits == self.addr.bits;
        }
        if self.bits == 0 {
            return true;
        }
        let mask: u128 = !((1u128 << (width - self.bits as u32)) - 1);
        (addr.bits & mask) == (self.addr.bits & mask)
    }

    /// Fixed-length 17-byte key encoding: 16 bytes of masked address
    /// followed by 1 byte of prefix length, per spec §4.2.
    pub fn db_key(self) -> [u8; 17] {
        let masked = self.masked();
        let mut out = [0u8; 17];
        out[..16].copy_from_slice(&masked.addr.to_be_bytes());
        out[16] = masked.bits;
        out
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.bits)
    }
}

impl FromStr for Prefix {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, bits_str) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("prefix '{s}' missing '/<bits>'"))?;
        let ip: IpAddr = addr_str.parse()?;
        let bits: u8 = bits_str.parse()?;
        Ok(Prefix::new(Addr::from_ip(ip), bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_v4_prefix() {
        let p: Prefix = "10.0.0.5/24".parse().unwrap();
        assert_eq!(p.masked().to_string(), "10.0.0.0/24");
    }

    #[test]
    fn contains_checks_family_and_bits() {
        let p: Prefix = "192.0.2.0/24".parse().unwrap();
        let inside: IpAddr = "192.0.2.200".parse().unwrap();
        let outside: IpAddr = "192.0.3.1".parse().unwrap();
        assert!(p.contains(Addr::from_ip(inside)));
        assert!(!p.contains(Addr::from_ip(outside)));
    }

    #[test]
    fn db_key_round_trips_address() {
        let p: Prefix = "2001:db8::1/64".parse().unwrap();
        let key = p.db_key();
        let recovered = Addr::from_be_bytes(key[..16].try_into().unwrap(), false);
        assert_eq!(recovered, p.masked().addr());
        assert_eq!(key[16], 64);
    }
}
