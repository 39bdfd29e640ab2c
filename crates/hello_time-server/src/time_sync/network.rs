use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::ConfigError;

/// An IP network (address + prefix length) used to recognise office source addresses.
///
/// Supports both IPv4 and IPv6. Parses from CIDR notation (`10.1.0.0/16`); a bare
/// address is a single-host network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IpNet {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNet {
    /// Create a new IP network.
    ///
    /// The prefix length is clamped to the maximum for the address type
    /// (32 for IPv4, 128 for IPv6).
    pub fn new(addr: IpAddr, prefix_len: u8) -> Self {
        IpNet {
            addr,
            prefix_len: prefix_len.min(max_prefix(&addr)),
        }
    }

    /// Whether `ip` lies inside this network.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) match IPv4 networks.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(*ip, IpAddr::V4),
            IpAddr::V4(_) => *ip,
        };
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                same_prefix(u32::from(net).into(), u32::from(addr).into(), 32, self.prefix_len)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                same_prefix(u128::from(net), u128::from(addr), 128, self.prefix_len)
            }
            _ => false,
        }
    }
}

// Compare the top `prefix_len` bits of two `width`-bit addresses.
fn same_prefix(a: u128, b: u128, width: u32, prefix_len: u8) -> bool {
    let host_bits = width - u32::from(prefix_len);
    a.checked_shr(host_bits).unwrap_or(0) == b.checked_shr(host_bits).unwrap_or(0)
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl FromStr for IpNet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidCidr {
            value: s.to_string(),
        };
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix_len = match prefix {
            Some(p) => {
                let len: u8 = p.parse().map_err(|_| invalid())?;
                if len > max_prefix(&addr) {
                    return Err(invalid());
                }
                len
            }
            None => max_prefix(&addr),
        };
        Ok(IpNet { addr, prefix_len })
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Whether `ip` falls inside any of `ranges`.
pub fn in_any(ranges: &[IpNet], ip: &IpAddr) -> bool {
    ranges.iter().any(|net| net.contains(ip))
}
