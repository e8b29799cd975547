//! Helpers for scenario tests that drive policy resources through the index and engine.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use calico_policy_core as core;
pub use calico_policy_k8s_api as k8s;
pub use calico_policy_k8s_index as index;

use self::{
    core::{ConnectionContext, Direction, Endpoint, EvaluationConfig, Labels, Protocol},
    index::{Engine, Index, Metrics, SharedIndex},
    k8s::Resource,
};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

/// The tiers used by the tiered policy scenarios, in evaluation order.
pub const TIERS: [&str; 3] = ["tier-c", "tier-b", "tier-a"];

/// Builds an engine whose index holds the resources in `yaml`.
pub fn engine(config: EvaluationConfig, yaml: &str) -> (Engine, SharedIndex) {
    let (engine, index) = Index::new(config, Metrics::default());
    index
        .write()
        .reset(resources(yaml))
        .expect("fixture resources must be valid");
    (engine, index)
}

pub fn resources(yaml: &str) -> Vec<Resource> {
    k8s::parse_documents(yaml).expect("fixture resources must parse")
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

pub fn read_fixture(name: &str) -> String {
    let path = fixture(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|error| panic!("failed to read {}: {}", path.display(), error))
}

/// Renders `tier-c` (order 1), `tier-b` (order 2) and `tier-a` (order 3), each holding a
/// `pol-1` global policy whose only ingress rule takes the respective action.
pub fn tiered_policies(actions: [&str; 3]) -> String {
    let mut yaml = String::new();
    for (i, (tier, action)) in TIERS.iter().zip(actions).enumerate() {
        yaml.push_str(&tier_yaml(tier, i + 1));
        yaml.push_str(&policy_yaml("pol-1", tier, action));
    }
    yaml
}

pub fn tier_yaml(name: &str, order: usize) -> String {
    format!(
        "---\napiVersion: projectcalico.org/v3\nkind: Tier\nmetadata:\n  name: {}\nspec:\n  order: {}\n",
        name, order
    )
}

pub fn policy_yaml(name: &str, tier: &str, action: &str) -> String {
    format!(
        r#"---
apiVersion: projectcalico.org/v3
kind: GlobalNetworkPolicy
metadata:
  name: {name}
spec:
  tier: {tier}
  selector: all()
  ingress:
    - action: {action}
"#,
        name = name,
        tier = tier,
        action = action,
    )
}

pub fn labels<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn pod(ip: [u8; 4], labels: Labels) -> Endpoint {
    Endpoint::new(IpAddr::from(Ipv4Addr::from(ip)))
        .with_labels(labels)
        .in_namespace("default", Labels::default())
}

/// A TCP connection from `source` to port 80 of `destination`.
pub fn tcp(direction: Direction, source: Endpoint, destination: Endpoint) -> ConnectionContext {
    ConnectionContext {
        source: source.with_port(40000),
        destination: destination.with_port(80),
        protocol: Protocol::TCP,
        direction,
    }
}

/// An ingress connection between two unlabeled pods.
pub fn ingress() -> ConnectionContext {
    tcp(
        Direction::Ingress,
        pod([10, 0, 0, 1], Labels::default()),
        pod([10, 0, 0, 2], Labels::default()),
    )
}

pub fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "calico=trace,debug".parse().unwrap()),
            )
            .finish(),
    )
}
