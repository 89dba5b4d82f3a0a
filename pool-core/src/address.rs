use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use ipnet::Ipv6Net;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A single IPv6 source address, serialized in canonical lowercase textual
/// form (the same form `std::net::Ipv6Addr`'s `Display` produces).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(Ipv6Addr);

impl Address {
    pub fn new(addr: Ipv6Addr) -> Self {
        Self(addr)
    }

    pub fn octets(&self) -> Ipv6Addr {
        self.0
    }

    /// True iff `self` falls within `prefix`.
    pub fn in_prefix(&self, prefix: &Prefix) -> bool {
        prefix.net.contains(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Ipv6Addr> for Address {
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr)
    }
}

impl From<Address> for Ipv6Addr {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// A network currently advertised to the host: an interface name paired with
/// a CIDR. Equality is by network + bit length (the interface name is
/// informational and does not participate in comparison, since a prefix is
/// bound to exactly one interface by construction).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prefix {
    iface: String,
    net: Ipv6Net,
}

impl Prefix {
    pub const DEFAULT_BITS: u8 = 64;

    /// Builds a prefix from an observed global address and a bit length,
    /// truncating host bits so the stored network is canonical.
    pub fn new(iface: impl Into<String>, addr: Ipv6Addr, bits: u8) -> Result<Self, ipnet::PrefixLenError> {
        let net = Ipv6Net::new(addr, bits)?.trunc();
        Ok(Self {
            iface: iface.into(),
            net,
        })
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }

    pub fn bits(&self) -> u8 {
        self.net.prefix_len()
    }

    pub fn network(&self) -> Ipv6Addr {
        self.net.network()
    }

    pub fn contains(&self, addr: &Address) -> bool {
        addr.in_prefix(self)
    }

    /// Decomposes the network address into 8 hextet integers, as used by
    /// the spawner to preserve the prefix bits while randomizing the host
    /// bits of a candidate address.
    pub fn addr_to_segs(&self) -> [u16; 8] {
        addr_to_segs(&self.network())
    }

    /// Generates a candidate address: the prefix's network bits verbatim,
    /// host bits filled uniformly at random from `rng`.
    pub fn random_candidate(&self, rng: &mut dyn RngCore) -> Address {
        let bits = self.bits() as u32;
        let net_segs = self.addr_to_segs();
        let host_segs: [u16; 8] = std::array::from_fn(|_| rng.next_u32() as u16);

        let mut segs = [0u16; 8];
        for (i, seg) in segs.iter_mut().enumerate() {
            let seg_start_bit = i as u32 * 16;
            *seg = if seg_start_bit + 16 <= bits {
                net_segs[i]
            } else if seg_start_bit >= bits {
                host_segs[i]
            } else {
                // This hextet straddles the prefix boundary: keep the
                // network's high bits, randomize the rest.
                let keep = bits - seg_start_bit;
                let mask = !0u16 << (16 - keep);
                (net_segs[i] & mask) | (host_segs[i] & !mask)
            };
        }
        Address::new(segs_to_addr(&segs))
    }
}

impl PartialEq for Prefix {
    fn eq(&self, other: &Self) -> bool {
        self.net.network() == other.net.network() && self.net.prefix_len() == other.net.prefix_len()
    }
}

impl Eq for Prefix {}

/// Decomposes an address into 8 hextet integers.
pub fn addr_to_segs(addr: &Ipv6Addr) -> [u16; 8] {
    addr.segments()
}

/// Reassembles 8 hextet integers into an address.
pub fn segs_to_addr(segs: &[u16; 8]) -> Ipv6Addr {
    Ipv6Addr::new(
        segs[0], segs[1], segs[2], segs[3], segs[4], segs[5], segs[6], segs[7],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn prefix_contains_in_network_addresses() {
        let prefix = Prefix::new("eth0", "2001:db8::".parse().unwrap(), 64).unwrap();
        let inside: Address = "2001:db8::1".parse().unwrap();
        let outside: Address = "2001:db9::1".parse().unwrap();
        assert!(prefix.contains(&inside));
        assert!(!prefix.contains(&outside));
    }

    #[test]
    fn prefix_equality_ignores_iface() {
        let a = Prefix::new("eth0", "2001:db8::".parse().unwrap(), 64).unwrap();
        let b = Prefix::new("eth1", "2001:db8::".parse().unwrap(), 64).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn random_candidate_preserves_prefix_bits() {
        let prefix = Prefix::new("eth0", "2001:db8::".parse().unwrap(), 64).unwrap();
        let mut rng = StepRng::new(0xabcd_ef01_2345_6789, 1);
        for _ in 0..8 {
            let candidate = prefix.random_candidate(&mut rng);
            assert!(prefix.contains(&candidate));
        }
    }

    #[test]
    fn segs_round_trip() {
        let addr: Ipv6Addr = "2001:db8:1:2:3:4:5:6".parse().unwrap();
        assert_eq!(segs_to_addr(&addr_to_segs(&addr)), addr);
    }
}
