use crate::rule::InvalidRuleError;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::IpAddr;

/// Matches an address against a set of networks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NetworkMatch(Vec<IpNet>);

// === impl NetworkMatch ===

impl NetworkMatch {
    /// Parses a list of CIDRs or bare addresses.
    pub fn parse<S: AsRef<str>>(
        nets: impl IntoIterator<Item = S>,
    ) -> Result<Self, InvalidRuleError> {
        nets.into_iter().map(|n| Self::parse_net(n.as_ref())).collect()
    }

    /// Parses a CIDR, treating a bare address as a host network.
    pub fn parse_net(s: &str) -> Result<IpNet, InvalidRuleError> {
        let s = s.trim();
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(net.trunc());
        }

        if let Ok(addr) = s.parse::<IpAddr>() {
            return Ok(IpNet::from(addr));
        }

        Err(InvalidRuleError::Net(s.to_string()))
    }

    #[inline]
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.0.iter().any(|net| net.contains(&addr))
    }

    #[inline]
    pub fn nets(&self) -> &[IpNet] {
        &self.0
    }
}

impl From<IpAddr> for NetworkMatch {
    fn from(net: IpAddr) -> Self {
        IpNet::from(net).into()
    }
}

impl From<IpNet> for NetworkMatch {
    fn from(net: IpNet) -> Self {
        Self(vec![net])
    }
}

impl From<Ipv4Net> for NetworkMatch {
    fn from(net: Ipv4Net) -> Self {
        IpNet::from(net).into()
    }
}

impl From<Ipv6Net> for NetworkMatch {
    fn from(net: Ipv6Net) -> Self {
        IpNet::from(net).into()
    }
}

impl std::iter::FromIterator<IpNet> for NetworkMatch {
    fn from_iter<T: IntoIterator<Item = IpNet>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nets_and_addresses() {
        let nets = NetworkMatch::parse(["10.0.0.0/16", "192.168.1.7", "fd00::/8"]).unwrap();
        assert!(nets.contains("10.0.200.1".parse().unwrap()));
        assert!(!nets.contains("10.1.0.1".parse().unwrap()));
        assert!(nets.contains("192.168.1.7".parse().unwrap()));
        assert!(!nets.contains("192.168.1.8".parse().unwrap()));
        assert!(nets.contains("fd12::1".parse().unwrap()));
    }

    #[test]
    fn host_bits_are_truncated() {
        let nets = NetworkMatch::parse(["10.1.2.3/16"]).unwrap();
        assert_eq!(nets.nets(), &["10.1.0.0/16".parse::<IpNet>().unwrap()]);
    }

    #[test]
    fn rejects_invalid() {
        assert_eq!(
            NetworkMatch::parse(["10.0.0.0/33"]),
            Err(InvalidRuleError::Net("10.0.0.0/33".to_string()))
        );
        assert!(NetworkMatch::parse(["not-a-net"]).is_err());
    }
}
