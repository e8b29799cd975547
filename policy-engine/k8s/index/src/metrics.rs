use calico_policy_core::Decision;
use calico_policy_k8s_api::ResourceKind;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Index and evaluation metrics. Clones share the same underlying metrics.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    decisions: Family<DecisionLabels, Counter>,
    evaluation_errors: Counter,
    index_applies: Family<IndexLabels, Counter>,
    index_deletes: Family<IndexLabels, Counter>,
    index_rejections: Family<IndexLabels, Counter>,
    snapshot_policies: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DecisionLabels {
    action: String,
    reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();

        prom.register(
            "decisions",
            "Count of policy decisions",
            metrics.decisions.clone(),
        );

        prom.register(
            "evaluation_errors",
            "Count of connections denied because a rule could not be evaluated",
            metrics.evaluation_errors.clone(),
        );

        prom.register(
            "index_applies",
            "Count of resources applied to the index",
            metrics.index_applies.clone(),
        );

        prom.register(
            "index_deletes",
            "Count of resources deleted from the index",
            metrics.index_deletes.clone(),
        );

        prom.register(
            "index_rejections",
            "Count of resource updates rejected by the index",
            metrics.index_rejections.clone(),
        );

        prom.register(
            "snapshot_policies",
            "Gauge of the number of policies in the published snapshot",
            metrics.snapshot_policies.clone(),
        );

        metrics
    }

    pub(crate) fn decision(&self, decision: &Decision) {
        self.decisions
            .get_or_create(&DecisionLabels {
                action: decision.action.to_string(),
                reason: decision.reason.kind().to_string(),
            })
            .inc();
        if let calico_policy_core::Reason::EvaluationFailed(_) = decision.reason {
            self.evaluation_errors.inc();
        }
    }

    pub(crate) fn applied(&self, kind: ResourceKind) {
        self.index_applies.get_or_create(&IndexLabels::from(kind)).inc();
    }

    pub(crate) fn deleted(&self, kind: ResourceKind) {
        self.index_deletes.get_or_create(&IndexLabels::from(kind)).inc();
    }

    pub(crate) fn rejected(&self, kind: ResourceKind) {
        self.index_rejections
            .get_or_create(&IndexLabels::from(kind))
            .inc();
    }

    pub(crate) fn published(&self, policies: usize) {
        self.snapshot_policies.set(policies as i64);
    }
}

impl From<ResourceKind> for IndexLabels {
    fn from(kind: ResourceKind) -> Self {
        Self {
            kind: kind.to_string(),
        }
    }
}
