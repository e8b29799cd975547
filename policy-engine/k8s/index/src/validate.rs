//! Converts resource documents into evaluation types.
//!
//! Everything that can be parsed is parsed here, so a resource that converts successfully can
//! always be evaluated. Errors identify the offending resource and field.

use calico_policy_core::{
    Action, DomainMatch, EndOfTier, InvalidRuleError, IpNet, IpVersion, MatchCriteria,
    NetworkMatch, Policy, PolicyTypes, PortMatch, PortRange, Protocol, Rule, Selector,
    SelectorParseError, SnapshotError, Tier, DEFAULT_TIER,
};
use calico_policy_k8s_api::{
    policy::{self as api, PolicyType, TierDefaultAction},
    Resource, ResourceKind,
};

/// A resource was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{kind} is missing metadata.name")]
    MissingName { kind: ResourceKind },

    #[error("{kind} {name:?} is missing metadata.namespace")]
    MissingNamespace { kind: ResourceKind, name: String },

    #[error("{kind} {name:?}: {field}: {error}")]
    InvalidField {
        kind: ResourceKind,
        name: String,
        field: String,
        #[source]
        error: FieldError,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Describes why a single field is invalid.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error(transparent)]
    Selector(#[from] SelectorParseError),

    #[error(transparent)]
    Rule(#[from] InvalidRuleError),

    #[error("order must be a finite number")]
    Order,

    #[error("{net} is not an IPv{version} network")]
    IpVersionMismatch { net: IpNet, version: IpVersion },

    #[error("ports may only be matched for TCP, UDP, SCTP or UDPLite")]
    PortsRequireProtocol,

    #[error("domains may only be matched on the destination of egress rules")]
    DomainsNotAllowed,
}

/// A converted resource.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Validated {
    Tier(Tier),
    Policy(Policy),
}

/// Identifies the resource being converted, for error reporting.
struct Scope<'r> {
    kind: ResourceKind,
    name: &'r str,

    /// Set when converting a namespaced policy.
    namespace: Option<&'r str>,
}

/// The parts of a policy spec shared by namespaced and global policies.
struct PolicyParts<'r> {
    tier: Option<&'r str>,
    order: Option<f64>,
    selector: Option<&'r str>,
    namespace_selector: Option<&'r str>,
    types: Option<&'r [PolicyType]>,
    ingress: &'r [api::Rule],
    egress: &'r [api::Rule],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Side {
    Source,
    Destination,
}

pub(crate) fn validate(resource: &Resource) -> Result<Validated, ConfigError> {
    let kind = resource.kind();
    let name = match resource.name() {
        Some(name) if !name.is_empty() => name,
        _ => return Err(ConfigError::MissingName { kind }),
    };

    match resource {
        Resource::Tier(tier) => {
            let scope = Scope {
                kind,
                name,
                namespace: None,
            };
            let order = scope.order(tier.spec.order)?;
            Ok(Validated::Tier(Tier {
                name: name.to_string(),
                order,
                end_of_tier: tier.spec.default_action.map(|action| match action {
                    TierDefaultAction::Deny => EndOfTier::Deny,
                    TierDefaultAction::Pass => EndOfTier::Pass,
                }),
            }))
        }

        Resource::NetworkPolicy(np) => {
            let namespace = match resource.namespace() {
                Some(ns) if !ns.is_empty() => ns,
                _ => {
                    return Err(ConfigError::MissingNamespace {
                        kind,
                        name: name.to_string(),
                    })
                }
            };
            let scope = Scope {
                kind,
                name,
                namespace: Some(namespace),
            };
            let spec = &np.spec;
            scope
                .policy(PolicyParts {
                    tier: spec.tier.as_deref(),
                    order: spec.order,
                    selector: spec.selector.as_deref(),
                    namespace_selector: None,
                    types: spec.types.as_deref(),
                    ingress: &spec.ingress,
                    egress: &spec.egress,
                })
                .map(Validated::Policy)
        }

        Resource::GlobalNetworkPolicy(gnp) => {
            let scope = Scope {
                kind,
                name,
                namespace: None,
            };
            let spec = &gnp.spec;
            scope
                .policy(PolicyParts {
                    tier: spec.tier.as_deref(),
                    order: spec.order,
                    selector: spec.selector.as_deref(),
                    namespace_selector: spec.namespace_selector.as_deref(),
                    types: spec.types.as_deref(),
                    ingress: &spec.ingress,
                    egress: &spec.egress,
                })
                .map(Validated::Policy)
        }
    }
}

// === impl Scope ===

impl Scope<'_> {
    fn invalid(&self, field: impl ToString, error: impl Into<FieldError>) -> ConfigError {
        ConfigError::InvalidField {
            kind: self.kind,
            name: self.name.to_string(),
            field: field.to_string(),
            error: error.into(),
        }
    }

    fn order(&self, order: Option<f64>) -> Result<Option<f64>, ConfigError> {
        match order {
            Some(o) if !o.is_finite() => Err(self.invalid("spec.order", FieldError::Order)),
            order => Ok(order),
        }
    }

    fn selector(&self, field: &str, selector: &str) -> Result<Selector, ConfigError> {
        selector.parse().map_err(|e| self.invalid(field, FieldError::Selector(e)))
    }

    fn policy(&self, spec: PolicyParts<'_>) -> Result<Policy, ConfigError> {
        let order = self.order(spec.order)?;

        let selector = match spec.selector {
            Some(s) => self.selector("spec.selector", s)?,
            None => Selector::All,
        };

        let namespace_selector = spec
            .namespace_selector
            .map(|s| self.selector("spec.namespaceSelector", s))
            .transpose()?;

        let types = match spec.types {
            Some(types) if !types.is_empty() => PolicyTypes {
                ingress: types.contains(&PolicyType::Ingress),
                egress: types.contains(&PolicyType::Egress),
            },
            _ => PolicyTypes {
                ingress: true,
                egress: !spec.egress.is_empty(),
            },
        };

        let ingress = spec
            .ingress
            .iter()
            .enumerate()
            .map(|(i, r)| self.rule(&format!("spec.ingress[{}]", i), r, PolicyType::Ingress))
            .collect::<Result<Vec<_>, _>>()?;
        let egress = spec
            .egress
            .iter()
            .enumerate()
            .map(|(i, r)| self.rule(&format!("spec.egress[{}]", i), r, PolicyType::Egress))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Policy {
            name: self.name.to_string(),
            namespace: self.namespace.map(String::from),
            tier: spec.tier.unwrap_or(DEFAULT_TIER).to_string(),
            order,
            selector,
            namespace_selector,
            types,
            ingress,
            egress,
        })
    }

    fn rule(
        &self,
        path: &str,
        rule: &api::Rule,
        direction: PolicyType,
    ) -> Result<Rule, ConfigError> {
        let action = match rule.action {
            api::Action::Allow => Action::Allow,
            api::Action::Deny => Action::Deny,
            api::Action::Pass => Action::Pass,
            api::Action::Log => Action::Log,
        };

        let protocol = rule
            .protocol
            .as_ref()
            .map(|p| self.protocol(&format!("{}.protocol", path), p))
            .transpose()?;
        let not_protocol = rule
            .not_protocol
            .as_ref()
            .map(|p| self.protocol(&format!("{}.notProtocol", path), p))
            .transpose()?;
        let ip_version = rule
            .ip_version
            .map(IpVersion::try_from)
            .transpose()
            .map_err(|e| self.invalid(format!("{}.ipVersion", path), e))?;

        let source = self.criteria(
            &format!("{}.source", path),
            &rule.source,
            Side::Source,
            direction,
        )?;
        let destination = self.criteria(
            &format!("{}.destination", path),
            &rule.destination,
            Side::Destination,
            direction,
        )?;

        if let Some(version) = ip_version {
            for (side, criteria) in [("source", &source), ("destination", &destination)] {
                let mismatch = criteria
                    .nets
                    .iter()
                    .chain(&criteria.not_nets)
                    .flat_map(NetworkMatch::nets)
                    .find(|n| !is_version(n, version));
                if let Some(net) = mismatch {
                    return Err(self.invalid(
                        format!("{}.{}", path, side),
                        FieldError::IpVersionMismatch { net: *net, version },
                    ));
                }
            }
        }

        let has_ports = [&source, &destination]
            .iter()
            .any(|c| c.ports.is_some() || c.not_ports.is_some());
        if has_ports && !protocol.is_some_and(Protocol::has_ports) {
            return Err(self.invalid(
                format!("{}.protocol", path),
                FieldError::PortsRequireProtocol,
            ));
        }

        Ok(Rule {
            action,
            protocol,
            not_protocol,
            ip_version,
            source,
            destination,
        })
    }

    fn protocol(&self, field: &str, protocol: &api::Protocol) -> Result<Protocol, ConfigError> {
        let parsed = match protocol {
            api::Protocol::Number(n) => u8::try_from(*n)
                .map_err(|_| InvalidRuleError::Protocol(n.to_string()))
                .and_then(Protocol::from_number),
            api::Protocol::Name(name) => name.parse(),
        };
        parsed.map_err(|e| self.invalid(field, e))
    }

    fn criteria(
        &self,
        path: &str,
        entity: &api::EntityRule,
        side: Side,
        direction: PolicyType,
    ) -> Result<MatchCriteria, ConfigError> {
        let selector = entity
            .selector
            .as_deref()
            .map(|s| self.selector(&format!("{}.selector", path), s))
            .transpose()?;
        let not_selector = entity
            .not_selector
            .as_deref()
            .map(|s| self.selector(&format!("{}.notSelector", path), s))
            .transpose()?;
        let namespace_selector = entity
            .namespace_selector
            .as_deref()
            .map(|s| self.selector(&format!("{}.namespaceSelector", path), s))
            .transpose()?;

        // Endpoint selectors in namespaced policies only select endpoints in the policy's own
        // namespace unless the rule selects namespaces itself.
        let namespace = match (self.namespace, &namespace_selector) {
            (Some(ns), None) => Some(ns.to_string()),
            _ => None,
        };

        let nets = entity
            .nets
            .as_deref()
            .map(|nets| self.nets(&format!("{}.nets", path), nets))
            .transpose()?;
        let not_nets = entity
            .not_nets
            .as_deref()
            .map(|nets| self.nets(&format!("{}.notNets", path), nets))
            .transpose()?;
        let ports = entity
            .ports
            .as_deref()
            .map(|ports| self.ports(&format!("{}.ports", path), ports))
            .transpose()?;
        let not_ports = entity
            .not_ports
            .as_deref()
            .map(|ports| self.ports(&format!("{}.notPorts", path), ports))
            .transpose()?;

        let domains = match entity.domains.as_deref() {
            None => None,
            Some(_) if side != Side::Destination || direction != PolicyType::Egress => {
                return Err(self.invalid(
                    format!("{}.domains", path),
                    FieldError::DomainsNotAllowed,
                ));
            }
            Some(domains) => Some(
                domains
                    .iter()
                    .map(|d| match d.parse::<DomainMatch>() {
                        Ok(d) => d,
                        Err(never) => match never {},
                    })
                    .collect(),
            ),
        };

        Ok(MatchCriteria {
            selector,
            not_selector,
            namespace_selector,
            namespace,
            nets,
            not_nets,
            ports,
            not_ports,
            domains,
        })
    }

    fn nets(&self, path: &str, nets: &[String]) -> Result<NetworkMatch, ConfigError> {
        nets.iter()
            .enumerate()
            .map(|(i, net)| {
                NetworkMatch::parse_net(net)
                    .map_err(|e| self.invalid(format!("{}[{}]", path, i), e))
            })
            .collect()
    }

    fn ports(&self, path: &str, ports: &[api::Port]) -> Result<PortMatch, ConfigError> {
        ports
            .iter()
            .enumerate()
            .map(|(i, port)| {
                let range = match port {
                    api::Port::Number(n) => PortRange::new(*n, *n),
                    api::Port::Range(r) => r.parse(),
                };
                range.map_err(|e| self.invalid(format!("{}[{}]", path, i), e))
            })
            .collect()
    }
}

fn is_version(net: &IpNet, version: IpVersion) -> bool {
    matches!(
        (net, version),
        (IpNet::V4(_), IpVersion::V4) | (IpNet::V6(_), IpVersion::V6)
    )
}
