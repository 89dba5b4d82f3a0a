//! Reads the interface's currently-advertised global IPv6 prefix.

use std::net::Ipv6Addr;
use std::sync::Arc;

use ipv6_pool_core::{Prefix, PoolError};

/// Abstraction over "enumerate this interface's addresses", so `Prefixer`
/// can be driven by a fake in tests instead of the real network stack.
pub trait LinkAddresses: Send + Sync {
    fn global_addrs(&self, iface: &str) -> Result<Vec<Ipv6Addr>, PoolError>;
}

/// Real implementation, backed by `nix::ifaddrs::getifaddrs`.
#[derive(Default)]
pub struct NixLinkAddresses;

impl LinkAddresses for NixLinkAddresses {
    fn global_addrs(&self, iface: &str) -> Result<Vec<Ipv6Addr>, PoolError> {
        let iter = nix::ifaddrs::getifaddrs().map_err(|e| PoolError::Internal(e.into()))?;
        let mut found_iface = false;
        let mut addrs = Vec::new();
        for ifa in iter {
            if ifa.interface_name != iface {
                continue;
            }
            found_iface = true;
            let Some(address) = ifa.address else { continue };
            let Some(sin6) = address.as_sockaddr_in6() else {
                continue;
            };
            let ip = sin6.ip();
            if is_usable_global(&ip) {
                addrs.push(ip);
            }
        }
        if !found_iface {
            return Err(PoolError::NoInterface {
                iface: iface.to_string(),
            });
        }
        Ok(addrs)
    }
}

/// Global, non-link-local, non-loopback, non-multicast.
///
/// `getifaddrs` does not expose the kernel's `IFA_F_TEMPORARY` flag (that's
/// netlink-only), so privacy-extension addresses aren't filtered here; the
/// lowest-numbered tie-break in `Prefixer::current_prefix` still makes the
/// choice deterministic across calls.
fn is_usable_global(ip: &Ipv6Addr) -> bool {
    !ip.is_unspecified()
        && !ip.is_loopback()
        && !ip.is_multicast()
        && !is_unicast_link_local(ip)
        && !is_unique_local(ip)
}

fn is_unicast_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

fn is_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

/// Determines the network currently assigned to an interface.
pub struct Prefixer {
    link: Arc<dyn LinkAddresses>,
    iface: String,
    bits: u8,
}

impl Prefixer {
    pub fn new(iface: impl Into<String>) -> Self {
        Self::with_link(Arc::new(NixLinkAddresses), iface, Prefix::DEFAULT_BITS)
    }

    pub fn with_link(link: Arc<dyn LinkAddresses>, iface: impl Into<String>, bits: u8) -> Self {
        Self {
            link,
            iface: iface.into(),
            bits,
        }
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }

    /// Picks the lowest-numbered global address on the interface and
    /// returns its network prefix.
    pub fn current_prefix(&self) -> Result<Prefix, PoolError> {
        let mut addrs = self.link.global_addrs(&self.iface)?;
        addrs.sort();
        let lowest = addrs.into_iter().next().ok_or_else(|| PoolError::NoGlobalAddress {
            iface: self.iface.clone(),
        })?;
        Prefix::new(self.iface.clone(), lowest, self.bits).map_err(|e| PoolError::Internal(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(Vec<Ipv6Addr>);

    impl LinkAddresses for Fake {
        fn global_addrs(&self, iface: &str) -> Result<Vec<Ipv6Addr>, PoolError> {
            if iface == "missing" {
                return Err(PoolError::NoInterface {
                    iface: iface.to_string(),
                });
            }
            Ok(self.0.clone())
        }
    }

    #[test]
    fn picks_lowest_numbered_address() {
        let fake = Fake(vec![
            "2001:db8::2".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
        ]);
        let prefixer = Prefixer::with_link(Arc::new(fake), "eth0", 64);
        let prefix = prefixer.current_prefix().unwrap();
        assert_eq!(prefix.network(), "2001:db8::".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn no_addresses_fails_no_global_address() {
        let fake = Fake(vec![]);
        let prefixer = Prefixer::with_link(Arc::new(fake), "eth0", 64);
        assert!(matches!(
            prefixer.current_prefix(),
            Err(PoolError::NoGlobalAddress { .. })
        ));
    }

    #[test]
    fn missing_interface_fails_no_interface() {
        let fake = Fake(vec![]);
        let prefixer = Prefixer::with_link(Arc::new(fake), "missing", 64);
        assert!(matches!(
            prefixer.current_prefix(),
            Err(PoolError::NoInterface { .. })
        ));
    }
}
