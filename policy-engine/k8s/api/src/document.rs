//! Parses streams of resource documents.
//!
//! A stream holds any number of YAML documents separated by `---`. JSON is accepted as a YAML
//! subset. Each document is a single resource, a sequence of resources or a `List` whose `items`
//! are resources.

use crate::policy::{GlobalNetworkPolicy, NetworkPolicy, Tier};
use kube::api::ObjectMeta;
use serde::Deserialize;
use serde_yaml::Value;
use std::{fmt, str::FromStr};

#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Tier(Tier),
    NetworkPolicy(NetworkPolicy),
    GlobalNetworkPolicy(GlobalNetworkPolicy),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Tier,
    NetworkPolicy,
    GlobalNetworkPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("document {index}: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("document {index}: missing kind")]
    MissingKind { index: usize },

    #[error("document {index}: unsupported kind {kind:?}")]
    UnsupportedKind { index: usize, kind: String },

    #[error("document {index}: unsupported apiVersion {api_version:?}")]
    UnsupportedApiVersion { index: usize, api_version: String },
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported resource kind {0:?}")]
pub struct UnsupportedKind(String);

/// Parses every resource in a stream of documents.
pub fn parse_documents(input: &str) -> Result<Vec<Resource>, LoadError> {
    let mut resources = Vec::new();
    for (index, doc) in serde_yaml::Deserializer::from_str(input).enumerate() {
        let value =
            Value::deserialize(doc).map_err(|source| LoadError::Invalid { index, source })?;
        collect(index, value, &mut resources)?;
    }
    Ok(resources)
}

fn collect(index: usize, value: Value, resources: &mut Vec<Resource>) -> Result<(), LoadError> {
    match value {
        Value::Null => Ok(()),
        Value::Sequence(items) => {
            for item in items {
                collect(index, item, resources)?;
            }
            Ok(())
        }
        mut value => {
            let kind = match value.get("kind").and_then(Value::as_str) {
                Some(kind) => kind.to_string(),
                None => return Err(LoadError::MissingKind { index }),
            };

            if kind == "List" || kind.ends_with("List") {
                let items = value.get("items").cloned().unwrap_or(Value::Null);
                return collect(index, items, resources);
            }

            match value.get("apiVersion").and_then(Value::as_str) {
                Some(api_version) if api_version != Resource::API_VERSION => {
                    return Err(LoadError::UnsupportedApiVersion {
                        index,
                        api_version: api_version.to_string(),
                    });
                }
                _ => {}
            }
            // Every spec field is optional, so the spec itself may be omitted.
            if let Value::Mapping(map) = &mut value {
                if !map.contains_key("apiVersion") {
                    map.insert("apiVersion".into(), Resource::API_VERSION.into());
                }
                if !map.contains_key("spec") {
                    map.insert("spec".into(), Value::Mapping(Default::default()));
                }
            }

            let kind = kind
                .parse::<ResourceKind>()
                .map_err(|UnsupportedKind(kind)| LoadError::UnsupportedKind { index, kind })?;
            let resource = Resource::from_value(kind, value)
                .map_err(|source| LoadError::Invalid { index, source })?;
            resources.push(resource);
            Ok(())
        }
    }
}

// === impl Resource ===

impl Resource {
    pub const API_VERSION: &'static str = "projectcalico.org/v3";

    fn from_value(kind: ResourceKind, value: Value) -> Result<Self, serde_yaml::Error> {
        match kind {
            ResourceKind::Tier => serde_yaml::from_value(value).map(Self::Tier),
            ResourceKind::NetworkPolicy => serde_yaml::from_value(value).map(Self::NetworkPolicy),
            ResourceKind::GlobalNetworkPolicy => {
                serde_yaml::from_value(value).map(Self::GlobalNetworkPolicy)
            }
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Tier(_) => ResourceKind::Tier,
            Self::NetworkPolicy(_) => ResourceKind::NetworkPolicy,
            Self::GlobalNetworkPolicy(_) => ResourceKind::GlobalNetworkPolicy,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Tier(r) => &r.metadata,
            Self::NetworkPolicy(r) => &r.metadata,
            Self::GlobalNetworkPolicy(r) => &r.metadata,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata().name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }
}

impl From<Tier> for Resource {
    fn from(r: Tier) -> Self {
        Self::Tier(r)
    }
}

impl From<NetworkPolicy> for Resource {
    fn from(r: NetworkPolicy) -> Self {
        Self::NetworkPolicy(r)
    }
}

impl From<GlobalNetworkPolicy> for Resource {
    fn from(r: GlobalNetworkPolicy) -> Self {
        Self::GlobalNetworkPolicy(r)
    }
}

// === impl ResourceKind ===

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier => "Tier",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::GlobalNetworkPolicy => "GlobalNetworkPolicy",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(self, Self::NetworkPolicy)
    }
}

impl FromStr for ResourceKind {
    type Err = UnsupportedKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Tier, Self::NetworkPolicy, Self::GlobalNetworkPolicy]
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnsupportedKind(s.to_string()))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Action, PolicyType, Port, Protocol};

    #[test]
    fn parses_tiered_policies() {
        let resources = parse_documents(
            r#"
apiVersion: projectcalico.org/v3
kind: Tier
metadata:
  name: tier-c
spec:
  Order: 1
---
apiVersion: projectcalico.org/v3
kind: GlobalNetworkPolicy
metadata:
  name: pol-1
spec:
  tier: tier-c
  order: 10
  selector: all()
  types: [Ingress, Egress]
  ingress:
    - action: deny
  egress:
    - action: next-tier
      protocol: TCP
      destination:
        ports: [80, "8000:8080"]
---
apiVersion: projectcalico.org/v3
kind: NetworkPolicy
metadata:
  name: allow-web
  namespace: prod
spec:
  selector: app == 'web'
  ingress:
    - action: Allow
"#,
        )
        .unwrap();

        assert_eq!(resources.len(), 3);
        let kinds = resources.iter().map(Resource::kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                ResourceKind::Tier,
                ResourceKind::GlobalNetworkPolicy,
                ResourceKind::NetworkPolicy
            ]
        );

        match &resources[0] {
            Resource::Tier(tier) => assert_eq!(tier.spec.order, Some(1.0)),
            r => panic!("unexpected resource: {:?}", r),
        }

        match &resources[1] {
            Resource::GlobalNetworkPolicy(gnp) => {
                assert_eq!(gnp.spec.tier.as_deref(), Some("tier-c"));
                assert_eq!(
                    gnp.spec.types,
                    Some(vec![PolicyType::Ingress, PolicyType::Egress])
                );
                assert_eq!(gnp.spec.ingress[0].action, Action::Deny);
                let egress = &gnp.spec.egress[0];
                assert_eq!(egress.action, Action::Pass);
                assert_eq!(egress.protocol, Some(Protocol::Name("TCP".to_string())));
                assert_eq!(
                    egress.destination.ports,
                    Some(vec![Port::Number(80), Port::Range("8000:8080".to_string())])
                );
            }
            r => panic!("unexpected resource: {:?}", r),
        }

        assert_eq!(resources[2].name(), Some("allow-web"));
        assert_eq!(resources[2].namespace(), Some("prod"));
    }

    #[test]
    fn parses_lists_and_json() {
        let resources = parse_documents(
            r#"{
                "apiVersion": "projectcalico.org/v3",
                "kind": "TierList",
                "items": [
                    {"kind": "Tier", "metadata": {"name": "a"}, "spec": {"order": 1}},
                    {"kind": "Tier", "metadata": {"name": "b"}, "spec": {}}
                ]
            }"#,
        )
        .unwrap();
        let names = resources.iter().filter_map(Resource::name).collect::<Vec<_>>();
        assert_eq!(names, ["a", "b"]);

        let resources = parse_documents("---\n---\n").unwrap();
        assert!(resources.is_empty());
    }

    #[test]
    fn defaults_omitted_specs() {
        let resources = parse_documents(
            r#"
kind: Tier
metadata: {name: a}
---
kind: GlobalNetworkPolicy
metadata: {name: allow-all}
"#,
        )
        .unwrap();
        assert_eq!(resources.len(), 2);

        match &resources[0] {
            Resource::Tier(tier) => {
                assert_eq!(tier.metadata.name.as_deref(), Some("a"));
                assert_eq!(tier.spec.order, None);
                assert_eq!(tier.spec.default_action, None);
            }
            r => panic!("unexpected resource: {:?}", r),
        }
        match &resources[1] {
            Resource::GlobalNetworkPolicy(gnp) => {
                assert_eq!(gnp.spec, Default::default());
                assert!(gnp.spec.ingress.is_empty());
            }
            r => panic!("unexpected resource: {:?}", r),
        }
    }

    #[test]
    fn rejects_unknown_documents() {
        assert!(matches!(
            parse_documents("kind: Pod\nmetadata: {name: x}\n"),
            Err(LoadError::UnsupportedKind { index: 0, .. })
        ));
        assert!(matches!(
            parse_documents("metadata: {name: x}\n"),
            Err(LoadError::MissingKind { index: 0 })
        ));
        assert!(matches!(
            parse_documents("---\nkind: Tier\napiVersion: crd.projectcalico.org/v1\n"),
            Err(LoadError::UnsupportedApiVersion { .. })
        ));
        assert!(matches!(
            parse_documents("kind: Tier\nmetadata: {name: x}\nspec: {order: fast}\n"),
            Err(LoadError::Invalid { index: 0, .. })
        ));
    }
}
