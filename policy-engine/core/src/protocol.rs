use crate::rule::InvalidRuleError;
use std::{fmt, str::FromStr};

/// An IP protocol, identified by its IANA number.
///
/// Names are compared case-insensitively and are equal to their numbers, so `tcp`, `TCP` and `6`
/// all describe the same protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Protocol(u8);

const NAMES: [(&str, Protocol); 6] = [
    ("TCP", Protocol::TCP),
    ("UDP", Protocol::UDP),
    ("ICMP", Protocol::ICMP),
    ("ICMPv6", Protocol::ICMPV6),
    ("SCTP", Protocol::SCTP),
    ("UDPLite", Protocol::UDPLITE),
];

// === impl Protocol ===

impl Protocol {
    pub const ICMP: Self = Self(1);
    pub const TCP: Self = Self(6);
    pub const UDP: Self = Self(17);
    pub const ICMPV6: Self = Self(58);
    pub const SCTP: Self = Self(132);
    pub const UDPLITE: Self = Self(136);

    pub fn from_number(n: u8) -> Result<Self, InvalidRuleError> {
        if n == 0 {
            return Err(InvalidRuleError::Protocol(n.to_string()));
        }
        Ok(Self(n))
    }

    #[inline]
    pub fn number(self) -> u8 {
        self.0
    }

    /// Indicates whether connections of this protocol carry ports.
    #[inline]
    pub fn has_ports(self) -> bool {
        matches!(self, Self::TCP | Self::UDP | Self::SCTP | Self::UDPLITE)
    }
}

impl FromStr for Protocol {
    type Err = InvalidRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((_, proto)) = NAMES.iter().find(|(name, _)| name.eq_ignore_ascii_case(s)) {
            return Ok(*proto);
        }

        match s.parse::<u8>() {
            Ok(n) => Self::from_number(n),
            Err(_) => Err(InvalidRuleError::Protocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NAMES.iter().find(|(_, proto)| proto == self) {
            Some((name, _)) => name.fmt(f),
            None => self.0.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_numbers_are_equivalent() {
        assert_eq!("tcp".parse(), Ok(Protocol::TCP));
        assert_eq!("TCP".parse(), Ok(Protocol::TCP));
        assert_eq!("6".parse(), Ok(Protocol::TCP));
        assert_eq!("icmpv6".parse(), Ok(Protocol::ICMPV6));
        assert_eq!("47".parse::<Protocol>().map(Protocol::number), Ok(47));
        assert!("0".parse::<Protocol>().is_err());
        assert!("256".parse::<Protocol>().is_err());
        assert!("carrier-pigeon".parse::<Protocol>().is_err());
    }

    #[test]
    fn displays_names() {
        assert_eq!(Protocol::UDPLITE.to_string(), "UDPLite");
        assert_eq!(Protocol::from_number(47).unwrap().to_string(), "47");
    }
}
