//! Client identifier handling.

use std::fmt;
use std::net::IpAddr;

/// A key that identifies a single client to the limiter.
///
/// Usually derived from the originating network address. The limiter treats
/// it as opaque and only compares it for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Identifier used when no address can be resolved for a request.
    pub const UNKNOWN: &'static str = "unknown";

    /// Create an identifier from any string key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Identifier shared by every request without a resolvable address.
    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    /// The raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for ClientId {
    /// IPv4-mapped IPv6 addresses collapse onto their IPv4 form so a dual-stack
    /// listener does not split one client across two buckets.
    fn from(addr: IpAddr) -> Self {
        Self(addr.to_canonical().to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_client_id_from_ipv4() {
        let id = ClientId::from(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(id.as_str(), "192.168.1.1");
    }

    #[test]
    fn test_mapped_ipv6_collapses_to_ipv4() {
        let mapped = IpAddr::V6(Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped());
        let plain = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ClientId::from(mapped), ClientId::from(plain));
    }

    #[test]
    fn test_ipv6_is_kept() {
        let id = ClientId::from(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(id.to_string(), "::1");
    }
}
