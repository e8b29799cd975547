use crate::{
    context::{ConnectionContext, Endpoint, IpVersion},
    domain_match::DomainMatch,
    network_match::NetworkMatch,
    port_match::PortMatch,
    protocol::Protocol,
    selector::Selector,
    ParseKeywordError,
};
use std::{fmt, str::FromStr};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Allow,
    Deny,

    /// Skips the remaining policies in the current tier.
    Pass,

    /// Records the match and continues with the next rule.
    Log,
}

/// A single match-and-action unit of a policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub action: Action,
    pub protocol: Option<Protocol>,
    pub not_protocol: Option<Protocol>,
    pub ip_version: Option<IpVersion>,
    pub source: MatchCriteria,
    pub destination: MatchCriteria,
}

/// Constrains one side of a connection. Every set field must match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchCriteria {
    pub selector: Option<Selector>,
    pub not_selector: Option<Selector>,
    pub namespace_selector: Option<Selector>,

    /// Restricts `selector` and `not_selector` to endpoints in this namespace. Set for the rules
    /// of namespaced policies that do not select namespaces explicitly.
    pub namespace: Option<String>,

    pub nets: Option<NetworkMatch>,
    pub not_nets: Option<NetworkMatch>,
    pub ports: Option<PortMatch>,
    pub not_ports: Option<PortMatch>,
    pub domains: Option<Vec<DomainMatch>>,
}

/// Describes an invalid rule field.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRuleError {
    #[error("invalid port {0:?}: expected a number or a min:max range")]
    Port(String),

    #[error("invalid port range {0:?}: minimum exceeds maximum")]
    PortRange(String),

    #[error("invalid protocol {0:?}")]
    Protocol(String),

    #[error("not a valid CIDR or IP address: {0}")]
    Net(String),

    #[error("invalid IP version {0}: expected 4 or 6")]
    IpVersion(u8),
}

/// A rule could not be evaluated. Validation should make this impossible, so it is handled as a
/// fault: the connection is denied.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("port range {min}:{max} is inverted")]
    InvertedPortRange { min: u16, max: u16 },
}

// === impl Action ===

impl FromStr for Action {
    type Err = ParseKeywordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for action in [Self::Allow, Self::Deny, Self::Pass, Self::Log] {
            if action.to_string().eq_ignore_ascii_case(s) {
                return Ok(action);
            }
        }
        Err(ParseKeywordError::new("action", s))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => "Allow".fmt(f),
            Self::Deny => "Deny".fmt(f),
            Self::Pass => "Pass".fmt(f),
            Self::Log => "Log".fmt(f),
        }
    }
}

// === impl Rule ===

impl Rule {
    /// A rule that matches every connection.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            protocol: None,
            not_protocol: None,
            ip_version: None,
            source: MatchCriteria::default(),
            destination: MatchCriteria::default(),
        }
    }

    pub fn matches(&self, ctx: &ConnectionContext) -> Result<bool, EvaluationError> {
        if self.ip_version.is_some_and(|v| v != ctx.ip_version()) {
            return Ok(false);
        }

        if self.protocol.is_some_and(|p| p != ctx.protocol) {
            return Ok(false);
        }

        if self.not_protocol.is_some_and(|p| p == ctx.protocol) {
            return Ok(false);
        }

        Ok(self.source.matches(&ctx.source)? && self.destination.matches(&ctx.destination)?)
    }
}

// === impl MatchCriteria ===

impl MatchCriteria {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, endpoint: &Endpoint) -> Result<bool, EvaluationError> {
        if self.selector.is_some() || self.not_selector.is_some() {
            if let Some(ns) = self.namespace.as_deref() {
                if endpoint.namespace.as_deref() != Some(ns) {
                    return Ok(false);
                }
            }
        }

        if let Some(sel) = &self.namespace_selector {
            if endpoint.namespace.is_none() || !sel.matches(&endpoint.namespace_labels) {
                return Ok(false);
            }
        }

        if let Some(sel) = &self.selector {
            if !sel.matches(&endpoint.labels) {
                return Ok(false);
            }
        }

        if let Some(sel) = &self.not_selector {
            if sel.matches(&endpoint.labels) {
                return Ok(false);
            }
        }

        if let Some(nets) = &self.nets {
            if !nets.contains(endpoint.ip) {
                return Ok(false);
            }
        }

        if let Some(nets) = &self.not_nets {
            if nets.contains(endpoint.ip) {
                return Ok(false);
            }
        }

        if let Some(ports) = &self.ports {
            let matched = match endpoint.port {
                Some(port) => ports.matches(port)?,
                None => false,
            };
            if !matched {
                return Ok(false);
            }
        }

        if let (Some(ports), Some(port)) = (&self.not_ports, endpoint.port) {
            if ports.matches(port)? {
                return Ok(false);
            }
        }

        if let Some(domains) = &self.domains {
            let resolved = endpoint
                .domains
                .iter()
                .any(|name| domains.iter().any(|d| d.matches(name)));
            if !resolved {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Direction, PortRange};
    use maplit::btreemap;
    use std::net::Ipv4Addr;

    fn ctx(src_labels: crate::Map, dst_labels: crate::Map) -> ConnectionContext {
        ConnectionContext {
            source: Endpoint::new(Ipv4Addr::new(10, 0, 0, 1))
                .with_port(40000)
                .with_labels(src_labels),
            destination: Endpoint::new(Ipv4Addr::new(10, 2, 0, 1))
                .with_port(150)
                .with_labels(dst_labels),
            protocol: Protocol::TCP,
            direction: Direction::Ingress,
        }
    }

    fn selector(s: &str) -> Option<Selector> {
        Some(s.parse().unwrap())
    }

    fn ports(specs: &[&str]) -> Option<PortMatch> {
        Some(specs.iter().map(|p| p.parse::<PortRange>().unwrap()).collect())
    }

    #[test]
    fn empty_rule_matches_everything() {
        let rule = Rule::new(Action::Allow);
        assert!(rule.source.is_empty());
        assert_eq!(rule.matches(&ctx(Default::default(), Default::default())), Ok(true));
    }

    #[test]
    fn protocol_and_ip_version() {
        let c = ctx(Default::default(), Default::default());

        let mut rule = Rule::new(Action::Deny);
        rule.protocol = Some("tcp".parse().unwrap());
        assert_eq!(rule.matches(&c), Ok(true), "protocol names are case-insensitive");

        rule.protocol = Some(Protocol::UDP);
        assert_eq!(rule.matches(&c), Ok(false), "protocol mismatch");

        let mut rule = Rule::new(Action::Deny);
        rule.not_protocol = Some(Protocol::TCP);
        assert_eq!(rule.matches(&c), Ok(false), "not protocol");

        let mut rule = Rule::new(Action::Deny);
        rule.ip_version = Some(IpVersion::V6);
        assert_eq!(rule.matches(&c), Ok(false), "ip version mismatch");
        rule.ip_version = Some(IpVersion::V4);
        assert_eq!(rule.matches(&c), Ok(true), "ip version match");
    }

    #[test]
    fn criteria_are_anded() {
        let src = btreemap! { "type".to_string() => "application".to_string() };
        let dst = btreemap! { "type".to_string() => "database".to_string() };
        let c = ctx(src, dst);

        let mut rule = Rule::new(Action::Deny);
        rule.source = MatchCriteria {
            selector: selector("type == 'application'"),
            not_selector: selector("type == 'database'"),
            nets: NetworkMatch::parse(["10.0.0.0/16"]).ok(),
            not_nets: NetworkMatch::parse(["10.1.0.0/16"]).ok(),
            ..Default::default()
        };
        rule.destination = MatchCriteria {
            selector: selector("type == 'database'"),
            not_selector: selector("type == 'apples'"),
            nets: NetworkMatch::parse(["10.2.0.0/16"]).ok(),
            not_nets: NetworkMatch::parse(["10.3.0.0/16"]).ok(),
            ports: ports(&["100:200"]),
            not_ports: ports(&["110:140"]),
            ..Default::default()
        };
        assert_eq!(rule.matches(&c), Ok(true));

        rule.destination.not_ports = ports(&["110:1050"]);
        assert_eq!(rule.matches(&c), Ok(false), "excluded port");
    }

    #[test]
    fn ports_require_a_port() {
        let mut c = ctx(Default::default(), Default::default());
        c.protocol = Protocol::ICMP;
        c.destination.port = None;

        let mut rule = Rule::new(Action::Allow);
        rule.destination.ports = ports(&["1:65535"]);
        assert_eq!(rule.matches(&c), Ok(false));

        let mut rule = Rule::new(Action::Allow);
        rule.destination.not_ports = ports(&["1:65535"]);
        assert_eq!(rule.matches(&c), Ok(true));
    }

    #[test]
    fn namespace_scoping() {
        let mut c = ctx(Default::default(), Default::default());
        c.source = c
            .source
            .in_namespace("prod", btreemap! { "env".to_string() => "prod".to_string() });

        let mut rule = Rule::new(Action::Allow);
        rule.source.selector = selector("all()");
        rule.source.namespace = Some("dev".to_string());
        assert_eq!(rule.matches(&c), Ok(false), "selector scoped to another namespace");
        rule.source.namespace = Some("prod".to_string());
        assert_eq!(rule.matches(&c), Ok(true), "selector scoped to own namespace");

        let mut rule = Rule::new(Action::Allow);
        rule.source.namespace_selector = selector("env == 'prod'");
        assert_eq!(rule.matches(&c), Ok(true), "namespace selector");
        rule.source.namespace_selector = selector("env == 'dev'");
        assert_eq!(rule.matches(&c), Ok(false), "namespace selector mismatch");

        c.source.namespace = None;
        rule.source.namespace_selector = selector("all()");
        assert_eq!(rule.matches(&c), Ok(false), "host endpoints have no namespace");
    }

    #[test]
    fn domains() {
        let mut c = ctx(Default::default(), Default::default());
        c.destination = c.destination.with_domains(["api.example.com"]);

        let mut rule = Rule::new(Action::Allow);
        rule.destination.domains = Some(vec!["*.example.com".parse().unwrap()]);
        assert_eq!(rule.matches(&c), Ok(true));
        rule.destination.domains = Some(vec!["example.org".parse().unwrap()]);
        assert_eq!(rule.matches(&c), Ok(false));
    }

    #[test]
    fn inverted_range_is_an_error() {
        let c = ctx(Default::default(), Default::default());
        let mut rule = Rule::new(Action::Allow);
        rule.destination.ports = Some(Some(PortRange { min: 200, max: 100 }).into_iter().collect());
        assert_eq!(
            rule.matches(&c),
            Err(EvaluationError::InvertedPortRange { min: 200, max: 100 })
        );
    }

    #[test]
    fn parse_actions() {
        assert_eq!("allow".parse(), Ok(Action::Allow));
        assert_eq!("Pass".parse(), Ok(Action::Pass));
        assert!("next-tier".parse::<Action>().is_err());
    }
}
