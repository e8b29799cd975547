//! Calico tiered network policy evaluation.
//!
//! Policies are grouped into ordered tiers. For each connection, tiers are visited in
//! `(order, name)` order and, within a tier, policies are visited in `(order, name)` order. The
//! first policy rule that matches with an `Allow` or `Deny` action decides the connection; a
//! `Pass` rule skips the rest of its tier. When every tier is exhausted without a verdict, the
//! configured default action applies.
//!
//! ```text
//! [ Snapshot ] -> [ Tier ] -> [ Policy ] -> [ Rule ] -> [ MatchCriteria ] -> [ Selector ]
//! ```
//!
//! Everything in this crate is a pure function of an immutable [`Snapshot`] and a
//! [`ConnectionContext`]. Selectors, ports, protocols and networks are parsed when a snapshot is
//! built, so evaluation never parses anything.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod context;
mod domain_match;
mod labels;
mod network_match;
pub mod policy;
mod port_match;
mod protocol;
pub mod rule;
pub mod selector;
pub mod snapshot;
pub mod tier;

pub use self::{
    context::{ConnectionContext, Direction, Endpoint, IpVersion},
    domain_match::DomainMatch,
    labels::{Labels, Map},
    network_match::NetworkMatch,
    policy::{Policy, PolicyTypes, RuleRef, Trace, Verdict},
    port_match::{PortMatch, PortRange},
    protocol::Protocol,
    rule::{Action, EvaluationError, InvalidRuleError, MatchCriteria, Rule},
    selector::{Selector, SelectorParseError},
    snapshot::{Decision, Effect, EvaluationConfig, Reason, Snapshot, SnapshotError},
    tier::{EndOfTier, Tier},
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// The tier that holds policies which do not name a tier. It is always evaluated last unless it
/// is given an explicit order.
pub const DEFAULT_TIER: &str = "default";

/// Returned when a configuration keyword is not recognized.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid {what}: {value:?}")]
pub struct ParseKeywordError {
    what: &'static str,
    value: String,
}

impl ParseKeywordError {
    pub(crate) fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}
