use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single ingress or egress rule.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub action: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_protocol: Option<Protocol>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<u8>,

    #[serde(default)]
    pub source: EntityRule,

    #[serde(default)]
    pub destination: EntityRule,
}

/// Match criteria for one side of a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nets: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_nets: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<Port>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_ports: Option<Vec<Port>>,

    /// Only valid on the destination of egress rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Action {
    #[serde(alias = "allow")]
    Allow,

    #[serde(alias = "deny")]
    Deny,

    #[serde(alias = "pass", alias = "next-tier")]
    Pass,

    #[serde(alias = "log")]
    Log,
}

/// A protocol name (e.g. `TCP`) or number (e.g. `6`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum Protocol {
    Number(u16),
    Name(String),
}

/// A port number or a `min:max` range.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum Port {
    Number(u16),
    Range(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum PolicyType {
    #[serde(alias = "ingress")]
    Ingress,

    #[serde(alias = "egress")]
    Egress,
}

// === impl Protocol ===

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => fmt::Display::fmt(n, f),
            Self::Name(n) => fmt::Display::fmt(n, f),
        }
    }
}

// === impl Port ===

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => fmt::Display::fmt(n, f),
            Self::Range(r) => fmt::Display::fmt(r, f),
        }
    }
}
