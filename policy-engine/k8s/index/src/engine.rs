use crate::metrics::Metrics;
use calico_policy_core::{ConnectionContext, Decision, Snapshot};
use std::sync::Arc;
use tokio::sync::watch;

/// Evaluates connections against the most recently published snapshot.
///
/// Engines are cheap to clone. Each evaluation holds a single snapshot for its duration, so it is
/// never affected by a concurrent update.
#[derive(Clone, Debug)]
pub struct Engine {
    rx: watch::Receiver<Arc<Snapshot>>,
    metrics: Metrics,
}

// === impl Engine ===

impl Engine {
    pub(crate) fn new(rx: watch::Receiver<Arc<Snapshot>>, metrics: Metrics) -> Self {
        Self { rx, metrics }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.rx.borrow().clone()
    }

    /// Waits for a new snapshot to be published. Returns `false` once the index has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn evaluate(&self, ctx: &ConnectionContext) -> Decision {
        let decision = self.snapshot().evaluate(ctx);
        tracing::debug!(
            src = %ctx.source.ip,
            dst = %ctx.destination.ip,
            direction = %ctx.direction,
            action = %decision.action,
            reason = %decision.reason,
            "Evaluated"
        );
        self.metrics.decision(&decision);
        decision
    }

    /// Evaluates a connection that traverses several attachment points. A denial at any of them
    /// denies the connection.
    pub fn evaluate_path(&self, hops: &[ConnectionContext]) -> Decision {
        let decision = self.snapshot().evaluate_path(hops);
        tracing::debug!(
            hops = hops.len(),
            action = %decision.action,
            reason = %decision.reason,
            "Evaluated path"
        );
        self.metrics.decision(&decision);
        decision
    }
}
