//! Holds the validated resources and publishes a snapshot each time they change.
//!
//! Updates are validated before they are applied: a resource that does not convert, or that
//! would produce an invalid snapshot (e.g. a policy in a tier that does not exist), is rejected
//! and the previously published snapshot remains in effect.

use crate::{
    engine::Engine,
    metrics::Metrics,
    validate::{validate, ConfigError, Validated},
};
use calico_policy_core::{EvaluationConfig, Policy, Snapshot, SnapshotError, Tier, DEFAULT_TIER};
use calico_policy_k8s_api::{Resource, ResourceKind};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::watch;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds all indexing state. Owned and updated by a single writer, publishing snapshots to any
/// number of [`Engine`]s.
#[derive(Debug)]
pub struct Index {
    tiers: BTreeMap<String, Tier>,
    policies: BTreeMap<PolicyKey, Policy>,
    config: EvaluationConfig,
    tx: watch::Sender<Arc<Snapshot>>,
    metrics: Metrics,
}

/// Policies are identified within their tier, so the same name may be used in several tiers.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct PolicyKey {
    kind: ResourceKind,
    namespace: Option<String>,
    tier: String,
    name: String,
}

// === impl Index ===

impl Index {
    pub fn new(config: EvaluationConfig, metrics: Metrics) -> (Engine, SharedIndex) {
        let (tx, rx) = watch::channel(Arc::new(Snapshot::empty(config)));
        let engine = Engine::new(rx, metrics.clone());
        let index = Self {
            tiers: BTreeMap::new(),
            policies: BTreeMap::new(),
            config,
            tx,
            metrics,
        };
        (engine, Arc::new(RwLock::new(index)))
    }

    /// Returns the most recently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// Creates or replaces a resource.
    pub fn apply(&mut self, resource: Resource) -> Result<(), ConfigError> {
        let kind = resource.kind();
        let res = validate(&resource).and_then(|validated| match validated {
            Validated::Tier(tier) => self.update_tier(tier.name.clone(), Some(tier)),
            Validated::Policy(policy) => {
                let key = PolicyKey::of(kind, &policy);
                self.update_policy(key, Some(policy))
            }
        });

        match res {
            Ok(()) => {
                tracing::debug!(%kind, name = ?resource.name(), "Applied");
                self.metrics.applied(kind);
                Ok(())
            }
            Err(error) => Err(self.rejected(kind, error)),
        }
    }

    /// Removes a resource. Removing a resource that is not indexed has no effect.
    ///
    /// Policies are named as `<tier>.<name>`; a name without the prefix of a known tier names a
    /// policy in the `default` tier.
    pub fn delete(
        &mut self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ConfigError> {
        let res = match kind {
            ResourceKind::Tier => self.update_tier(name.to_string(), None),
            kind => {
                let key = self.policy_key(kind, namespace, name);
                self.update_policy(key, None)
            }
        };

        match res {
            Ok(()) => {
                tracing::debug!(%kind, ?namespace, %name, "Deleted");
                self.metrics.deleted(kind);
                Ok(())
            }
            Err(error) => Err(self.rejected(kind, error)),
        }
    }

    /// Replaces every indexed resource. Either all resources are accepted or none are.
    pub fn reset(&mut self, resources: Vec<Resource>) -> Result<(), ConfigError> {
        let mut tiers = BTreeMap::new();
        let mut policies = BTreeMap::new();
        for resource in &resources {
            let kind = resource.kind();
            match validate(resource) {
                Ok(Validated::Tier(tier)) => {
                    tiers.insert(tier.name.clone(), tier);
                }
                Ok(Validated::Policy(policy)) => {
                    policies.insert(PolicyKey::of(kind, &policy), policy);
                }
                Err(error) => return Err(self.rejected(kind, error)),
            }
        }

        let prior_tiers = std::mem::replace(&mut self.tiers, tiers);
        let prior_policies = std::mem::replace(&mut self.policies, policies);
        if let Err(error) = self.publish() {
            let kind = self.rejected_kind(&error);
            self.tiers = prior_tiers;
            self.policies = prior_policies;
            return Err(self.rejected(kind, error));
        }

        for resource in &resources {
            self.metrics.applied(resource.kind());
        }
        Ok(())
    }

    fn update_tier(&mut self, name: String, tier: Option<Tier>) -> Result<(), ConfigError> {
        let prior = match tier {
            Some(tier) => self.tiers.insert(name.clone(), tier),
            None => match self.tiers.remove(&name) {
                Some(prior) => Some(prior),
                None => return Ok(()),
            },
        };

        if let Err(error) = self.publish() {
            match prior {
                Some(prior) => self.tiers.insert(name, prior),
                None => self.tiers.remove(&name),
            };
            return Err(error);
        }
        Ok(())
    }

    fn update_policy(
        &mut self,
        key: PolicyKey,
        policy: Option<Policy>,
    ) -> Result<(), ConfigError> {
        let prior = match policy {
            Some(policy) => self.policies.insert(key.clone(), policy),
            None => match self.policies.remove(&key) {
                Some(prior) => Some(prior),
                None => return Ok(()),
            },
        };

        if let Err(error) = self.publish() {
            match prior {
                Some(prior) => self.policies.insert(key, prior),
                None => self.policies.remove(&key),
            };
            return Err(error);
        }
        Ok(())
    }

    /// Builds a snapshot from the indexed resources and, if it is valid, publishes it.
    fn publish(&mut self) -> Result<(), ConfigError> {
        let snapshot = Snapshot::new(
            self.tiers.values().cloned(),
            self.policies.values().cloned(),
            self.config,
        )?;

        let policies = snapshot.policy_count();
        self.tx.send_replace(Arc::new(snapshot));
        self.metrics.published(policies);
        tracing::info!(tiers = self.tiers.len(), policies, "Published policy snapshot");
        Ok(())
    }

    /// Resolves a policy name, qualified by its tier as `<tier>.<name>`, to its key.
    fn policy_key(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> PolicyKey {
        let (tier, name) = match name.split_once('.') {
            Some((tier, short)) if tier == DEFAULT_TIER || self.tiers.contains_key(tier) => {
                (tier, short)
            }
            _ => (DEFAULT_TIER, name),
        };
        PolicyKey::new(kind, namespace, tier, name)
    }

    /// The kind of the indexed resource that an invalid snapshot implicates.
    fn rejected_kind(&self, error: &ConfigError) -> ResourceKind {
        let policy = match error {
            ConfigError::Snapshot(SnapshotError::DuplicateTier(_)) => return ResourceKind::Tier,
            ConfigError::Snapshot(SnapshotError::UnknownTier { policy, .. })
            | ConfigError::Snapshot(SnapshotError::DuplicatePolicy(policy)) => policy,
            _ => return ResourceKind::GlobalNetworkPolicy,
        };
        self.policies
            .iter()
            .find(|(_, p)| p.qualified_name() == *policy)
            .map(|(key, _)| key.kind)
            .unwrap_or(ResourceKind::GlobalNetworkPolicy)
    }

    fn rejected(&self, kind: ResourceKind, error: ConfigError) -> ConfigError {
        tracing::error!(%kind, %error, "Rejected update");
        self.metrics.rejected(kind);
        error
    }
}

// === impl PolicyKey ===

impl PolicyKey {
    fn of(kind: ResourceKind, policy: &Policy) -> Self {
        Self::new(kind, policy.namespace.as_deref(), &policy.tier, &policy.name)
    }

    /// Strips the tier prefix from names like `<tier>.<name>`.
    fn new(kind: ResourceKind, namespace: Option<&str>, tier: &str, name: &str) -> Self {
        let name = name
            .strip_prefix(tier)
            .and_then(|name| name.strip_prefix('.'))
            .filter(|name| !name.is_empty())
            .unwrap_or(name);
        Self {
            kind,
            namespace: namespace
                .filter(|_| kind.is_namespaced())
                .map(String::from),
            tier: tier.to_string(),
            name: name.to_string(),
        }
    }
}
