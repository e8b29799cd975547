use crate::{
    context::ConnectionContext,
    policy::{Policy, Trace, Verdict},
    rule::EvaluationError,
    ParseKeywordError,
};
use std::{cmp::Ordering, fmt, str::FromStr};

/// An ordered group of policies.
#[derive(Clone, Debug, PartialEq)]
pub struct Tier {
    pub name: String,

    /// Tiers without an order are evaluated after those with one.
    pub order: Option<f64>,

    /// Overrides the engine's end-of-tier behavior for this tier.
    pub end_of_tier: Option<EndOfTier>,
}

/// What a tier yields when policies applied to the endpoint but none of their rules matched.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum EndOfTier {
    /// Evaluation continues with the next tier.
    #[default]
    Pass,

    /// The connection is denied.
    Deny,
}

// === impl Tier ===

impl Tier {
    pub fn new(name: impl ToString, order: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            order,
            end_of_tier: None,
        }
    }

    /// Evaluates the tier's policies, which must already be sorted with [`cmp_order`].
    ///
    /// The first policy that allows or denies the connection decides it. A `Pass` verdict skips
    /// the rest of the tier.
    pub fn evaluate(
        &self,
        policies: &[Policy],
        ctx: &ConnectionContext,
        end_of_tier: EndOfTier,
        trace: &mut Trace,
    ) -> Result<Verdict, EvaluationError> {
        let _span = tracing::debug_span!("tier", name = %self.name).entered();

        let mut applied = false;
        for policy in policies {
            if !policy.applies_to(ctx) {
                tracing::trace!(policy = %policy.qualified_name(), "Policy does not apply");
                continue;
            }
            applied = true;

            match policy.evaluate_rules(ctx, trace)? {
                Verdict::NoMatch => {
                    tracing::debug!(policy = %policy.qualified_name(), "No rule matched");
                }
                verdict => return Ok(verdict),
            }
        }

        if applied && self.end_of_tier.unwrap_or(end_of_tier) == EndOfTier::Deny {
            tracing::debug!("Denied at end of tier");
            return Ok(Verdict::Deny);
        }
        Ok(Verdict::NoMatch)
    }
}

/// Orders tiers and policies by `(order, name)`. A missing order sorts after every explicit one.
pub fn cmp_order(a: (Option<f64>, &str), b: (Option<f64>, &str)) -> Ordering {
    let by_order = match (a.0, b.0) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_order.then_with(|| a.1.cmp(b.1))
}

// === impl EndOfTier ===

impl FromStr for EndOfTier {
    type Err = ParseKeywordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("pass") {
            Ok(Self::Pass)
        } else if s.eq_ignore_ascii_case("deny") {
            Ok(Self::Deny)
        } else {
            Err(ParseKeywordError::new("end-of-tier action", s))
        }
    }
}

impl fmt::Display for EndOfTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => "pass".fmt(f),
            Self::Deny => "deny".fmt(f),
        }
    }
}
