use crate::{
    context::ConnectionContext,
    policy::{Policy, RuleRef, Trace, Verdict},
    rule::{Action, EvaluationError},
    tier::{cmp_order, EndOfTier, Tier},
    ParseKeywordError, DEFAULT_TIER,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::{fmt, str::FromStr};

/// A terminal policy outcome.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Effect {
    Allow,
    #[default]
    Deny,
}

/// Engine-wide evaluation options.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EvaluationConfig {
    /// Applied when every tier has been evaluated without a verdict.
    pub default_action: Effect,

    /// Applied to tiers that do not configure their own end-of-tier action.
    pub end_of_tier: EndOfTier,
}

/// Explains a [`Decision`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    /// A rule allowed or denied the connection.
    Rule(RuleRef),

    /// Policies in the named tier applied to the endpoint, but none of their rules matched.
    EndOfTier(String),

    /// No tier produced a verdict, so the default action applied.
    EndOfTiers,

    /// A rule could not be evaluated and the connection was denied.
    EvaluationFailed(EvaluationError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub action: Effect,
    pub reason: Reason,

    /// Every `Log` rule that matched before the decision was reached.
    pub logged: Vec<RuleRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("duplicate tier {0:?}")]
    DuplicateTier(String),

    #[error("policy {policy:?} references unknown tier {tier:?}")]
    UnknownTier { policy: String, tier: String },

    #[error("duplicate policy {0:?}")]
    DuplicatePolicy(String),
}

/// An immutable, validated set of tiers and policies.
///
/// Tiers are held in evaluation order and each tier's policies are held in evaluation order, so
/// evaluation never sorts or allocates beyond its trace.
#[derive(Clone, Debug)]
pub struct Snapshot {
    tiers: Vec<Tier>,
    policies: HashMap<String, Vec<Policy>>,
    config: EvaluationConfig,
}

// === impl Effect ===

impl FromStr for Effect {
    type Err = ParseKeywordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("allow") {
            Ok(Self::Allow)
        } else if s.eq_ignore_ascii_case("deny") {
            Ok(Self::Deny)
        } else {
            Err(ParseKeywordError::new("action", s))
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => "Allow".fmt(f),
            Self::Deny => "Deny".fmt(f),
        }
    }
}

// === impl Reason ===

impl Reason {
    /// A short, fixed label for the kind of reason.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rule(_) => "rule",
            Self::EndOfTier(_) => "end_of_tier",
            Self::EndOfTiers => "end_of_tiers",
            Self::EvaluationFailed(_) => "evaluation_failed",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(rule) => write!(f, "rule {}", rule),
            Self::EndOfTier(tier) => write!(f, "end of tier {}", tier),
            Self::EndOfTiers => "end of tiers".fmt(f),
            Self::EvaluationFailed(error) => write!(f, "evaluation failed: {}", error),
        }
    }
}

// === impl Decision ===

impl Decision {
    #[inline]
    pub fn is_allowed(&self) -> bool {
        self.action == Effect::Allow
    }
}

// === impl Snapshot ===

impl Snapshot {
    /// Builds a snapshot, adding the default tier if it is not configured explicitly.
    pub fn new(
        tiers: impl IntoIterator<Item = Tier>,
        policies: impl IntoIterator<Item = Policy>,
        config: EvaluationConfig,
    ) -> Result<Self, SnapshotError> {
        let mut names = HashSet::new();
        let mut tiers = tiers
            .into_iter()
            .map(|tier| {
                if !names.insert(tier.name.clone()) {
                    return Err(SnapshotError::DuplicateTier(tier.name));
                }
                Ok(tier)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !names.contains(DEFAULT_TIER) {
            tiers.push(Tier::new(DEFAULT_TIER, None));
        }
        tiers.sort_by(|a, b| {
            cmp_order((a.order, a.name.as_str()), (b.order, b.name.as_str()))
        });

        let mut by_tier = HashMap::<String, Vec<Policy>>::new();
        let mut qualified = HashSet::new();
        for policy in policies {
            let name = policy.qualified_name();
            if !tiers.iter().any(|t| t.name == policy.tier) {
                return Err(SnapshotError::UnknownTier {
                    policy: name,
                    tier: policy.tier,
                });
            }
            if !qualified.insert((policy.tier.clone(), name.clone())) {
                return Err(SnapshotError::DuplicatePolicy(name));
            }
            by_tier.entry(policy.tier.clone()).or_default().push(policy);
        }
        for policies in by_tier.values_mut() {
            policies.sort_by(|a, b| {
                cmp_order((a.order, a.name.as_str()), (b.order, b.name.as_str()))
            });
        }

        Ok(Self {
            tiers,
            policies: by_tier,
            config,
        })
    }

    /// A snapshot with only the default tier and no policies.
    pub fn empty(config: EvaluationConfig) -> Self {
        Self {
            tiers: vec![Tier::new(DEFAULT_TIER, None)],
            policies: HashMap::default(),
            config,
        }
    }

    /// The snapshot's tiers, in evaluation order.
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// The named tier's policies, in evaluation order.
    pub fn policies(&self, tier: &str) -> &[Policy] {
        self.policies.get(tier).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn policy_count(&self) -> usize {
        self.policies.values().map(Vec::len).sum()
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Decides a single connection at a single attachment point.
    pub fn evaluate(&self, ctx: &ConnectionContext) -> Decision {
        let mut trace = Trace::default();
        let verdict = self.evaluate_tiers(ctx, &mut trace);
        let logged = trace.logged;
        match verdict {
            Ok(Some((action, reason))) => Decision {
                action,
                reason,
                logged,
            },
            Ok(None) => {
                tracing::debug!(action = %self.config.default_action, "No tier decided");
                Decision {
                    action: self.config.default_action,
                    reason: Reason::EndOfTiers,
                    logged,
                }
            }
            Err(error) => {
                tracing::error!(
                    %error,
                    src = %ctx.source.ip,
                    dst = %ctx.destination.ip,
                    direction = %ctx.direction,
                    "Policy evaluation failed; denying connection"
                );
                Decision {
                    action: Effect::Deny,
                    reason: Reason::EvaluationFailed(error),
                    logged,
                }
            }
        }
    }

    /// Decides a connection that traverses several attachment points, e.g. the ingress and
    /// egress interfaces of a gateway. A denial at any hop denies the connection. A path with no
    /// hops is decided by the default action.
    pub fn evaluate_path(&self, hops: &[ConnectionContext]) -> Decision {
        let mut logged = Vec::new();
        let mut last = None;
        for ctx in hops {
            let mut decision = self.evaluate(ctx);
            logged.append(&mut decision.logged);
            if decision.action == Effect::Deny {
                decision.logged = logged;
                return decision;
            }
            last = Some(decision);
        }

        match last {
            Some(mut decision) => {
                decision.logged = logged;
                decision
            }
            None => Decision {
                action: self.config.default_action,
                reason: Reason::EndOfTiers,
                logged,
            },
        }
    }

    fn evaluate_tiers(
        &self,
        ctx: &ConnectionContext,
        trace: &mut Trace,
    ) -> Result<Option<(Effect, Reason)>, EvaluationError> {
        for tier in &self.tiers {
            let policies = self.policies(&tier.name);
            if policies.is_empty() {
                continue;
            }

            trace.matched = None;
            let action = match tier.evaluate(policies, ctx, self.config.end_of_tier, trace)? {
                Verdict::Allow => Effect::Allow,
                Verdict::Deny => Effect::Deny,
                Verdict::Pass | Verdict::NoMatch => continue,
            };

            let reason = match trace.matched.take() {
                Some(rule) if rule.action != Action::Pass => Reason::Rule(rule),
                _ => Reason::EndOfTier(tier.name.clone()),
            };
            return Ok(Some((action, reason)));
        }
        Ok(None)
    }
}
