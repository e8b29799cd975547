use crate::{labels::Labels, protocol::Protocol, ParseKeywordError};
use std::{fmt, net::IpAddr, str::FromStr};

/// The direction of a connection relative to the endpoint that policy is applied to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

/// One side of a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: IpAddr,

    /// Unset for protocols without ports.
    pub port: Option<u16>,

    pub labels: Labels,

    /// Unset for host endpoints and for addresses outside the cluster.
    pub namespace: Option<String>,

    pub namespace_labels: Labels,

    /// DNS names known to resolve to `ip`.
    pub domains: Vec<String>,
}

/// Describes a single flow for which a policy decision is needed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionContext {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub protocol: Protocol,
    pub direction: Direction,
}

// === impl Direction ===

impl FromStr for Direction {
    type Err = ParseKeywordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ingress") {
            Ok(Self::Ingress)
        } else if s.eq_ignore_ascii_case("egress") {
            Ok(Self::Egress)
        } else {
            Err(ParseKeywordError::new("direction", s))
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => "Ingress".fmt(f),
            Self::Egress => "Egress".fmt(f),
        }
    }
}

// === impl IpVersion ===

impl From<IpAddr> for IpVersion {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

impl TryFrom<u8> for IpVersion {
    type Error = crate::InvalidRuleError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            4 => Ok(Self::V4),
            6 => Ok(Self::V6),
            v => Err(crate::InvalidRuleError::IpVersion(v)),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => "4".fmt(f),
            Self::V6 => "6".fmt(f),
        }
    }
}

// === impl Endpoint ===

impl Endpoint {
    pub fn new(ip: impl Into<IpAddr>) -> Self {
        Self {
            ip: ip.into(),
            port: None,
            labels: Labels::default(),
            namespace: None,
            namespace_labels: Labels::default(),
            domains: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_labels(mut self, labels: impl Into<Labels>) -> Self {
        self.labels = labels.into();
        self
    }

    pub fn in_namespace(mut self, namespace: impl ToString, labels: impl Into<Labels>) -> Self {
        self.namespace = Some(namespace.to_string());
        self.namespace_labels = labels.into();
        self
    }

    pub fn with_domains(mut self, domains: impl IntoIterator<Item = impl ToString>) -> Self {
        self.domains = domains.into_iter().map(|d| d.to_string()).collect();
        self
    }
}

// === impl ConnectionContext ===

impl ConnectionContext {
    /// The endpoint that policy is being applied to: the destination of an ingress connection or
    /// the source of an egress connection.
    #[inline]
    pub fn local(&self) -> &Endpoint {
        match self.direction {
            Direction::Ingress => &self.destination,
            Direction::Egress => &self.source,
        }
    }

    #[inline]
    pub fn ip_version(&self) -> IpVersion {
        self.destination.ip.into()
    }
}
