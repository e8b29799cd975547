//! Flow documents describe connections to be evaluated from the command line.
//!
//! ```yaml
//! name: web-to-db
//! direction: Ingress
//! protocol: TCP
//! source: {ip: 10.0.0.1, labels: {app: web}, namespace: prod}
//! destination: {ip: 10.0.0.2, port: 5432, labels: {app: db}, namespace: prod}
//! ```
//!
//! A document with a `path` holds the hops of a connection that crosses several attachment
//! points (e.g. a gateway's interfaces); the connection is denied if any hop denies it.

use crate::core::{
    ConnectionContext, Direction, Endpoint, InvalidRuleError, Map, ParseKeywordError, Protocol,
};
use serde::Deserialize;
use serde_yaml::Value;
use std::net::IpAddr;

/// A connection to be decided, as one or more hops.
#[derive(Clone, Debug, PartialEq)]
pub struct Flow {
    pub name: Option<String>,
    pub hops: Vec<ConnectionContext>,
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("flow {index}: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("flow {index}: {source}")]
    Direction {
        index: usize,
        #[source]
        source: ParseKeywordError,
    },

    #[error("flow {index}: {source}")]
    Protocol {
        index: usize,
        #[source]
        source: InvalidRuleError,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlowDocument {
    Path {
        #[serde(default)]
        name: Option<String>,
        path: Vec<HopDocument>,
    },
    Hop(HopDocument),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HopDocument {
    #[serde(default)]
    name: Option<String>,
    direction: String,
    #[serde(default)]
    protocol: Option<ProtocolDocument>,
    source: EndpointDocument,
    destination: EndpointDocument,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProtocolDocument {
    Number(u8),
    Name(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointDocument {
    ip: IpAddr,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    labels: Map,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    namespace_labels: Map,
    #[serde(default)]
    domains: Vec<String>,
}

/// Parses every flow in a stream of YAML (or JSON) documents. A document may hold a single flow
/// or a sequence of flows.
pub fn parse_flows(input: &str) -> Result<Vec<Flow>, FlowError> {
    let mut flows = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(input) {
        let index = flows.len();
        let value = Value::deserialize(doc).map_err(|source| FlowError::Invalid { index, source })?;
        match value {
            Value::Null => {}
            Value::Sequence(items) => {
                for item in items {
                    let index = flows.len();
                    flows.push(Flow::from_value(index, item)?);
                }
            }
            value => flows.push(Flow::from_value(index, value)?),
        }
    }
    Ok(flows)
}

// === impl Flow ===

impl Flow {
    fn from_value(index: usize, value: Value) -> Result<Self, FlowError> {
        let doc = serde_yaml::from_value::<FlowDocument>(value)
            .map_err(|source| FlowError::Invalid { index, source })?;
        match doc {
            FlowDocument::Hop(hop) => {
                let name = hop.name.clone();
                let ctx = hop.into_context(index)?;
                Ok(Self {
                    name,
                    hops: vec![ctx],
                })
            }
            FlowDocument::Path { name, path } => {
                let hops = path
                    .into_iter()
                    .map(|hop| hop.into_context(index))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self { name, hops })
            }
        }
    }
}

// === impl HopDocument ===

impl HopDocument {
    fn into_context(self, index: usize) -> Result<ConnectionContext, FlowError> {
        let direction = self
            .direction
            .parse::<Direction>()
            .map_err(|source| FlowError::Direction { index, source })?;
        let protocol = match self.protocol {
            None => Ok(Protocol::TCP),
            Some(ProtocolDocument::Number(n)) => Protocol::from_number(n),
            Some(ProtocolDocument::Name(name)) => name.parse(),
        }
        .map_err(|source| FlowError::Protocol { index, source })?;

        Ok(ConnectionContext {
            source: self.source.into(),
            destination: self.destination.into(),
            protocol,
            direction,
        })
    }
}

impl From<EndpointDocument> for Endpoint {
    fn from(doc: EndpointDocument) -> Self {
        let EndpointDocument {
            ip,
            port,
            labels,
            namespace,
            namespace_labels,
            domains,
        } = doc;

        let mut endpoint = Endpoint::new(ip)
            .with_labels(labels)
            .with_domains(domains);
        if let Some(port) = port {
            endpoint = endpoint.with_port(port);
        }
        if let Some(ns) = namespace {
            endpoint = endpoint.in_namespace(ns, namespace_labels);
        }
        endpoint
    }
}
