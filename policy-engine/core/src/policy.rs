use crate::{
    context::{ConnectionContext, Direction},
    rule::{Action, EvaluationError, Rule},
    selector::Selector,
    DEFAULT_TIER,
};
use std::fmt;

/// The outcome of evaluating a rule list, a policy or a tier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Nothing matched; evaluation continues.
    NoMatch,
    Allow,
    Deny,

    /// Evaluation continues with the next tier.
    Pass,
}

/// The directions a policy applies to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PolicyTypes {
    pub ingress: bool,
    pub egress: bool,
}

/// A named, selector-scoped set of ordered ingress and egress rules.
#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub name: String,

    /// Set for namespaced policies, which only apply to endpoints in their own namespace.
    pub namespace: Option<String>,

    pub tier: String,

    /// Policies without an order are evaluated after those with one.
    pub order: Option<f64>,

    /// Selects the endpoints the policy applies to.
    pub selector: Selector,

    /// Restricts a global policy to endpoints in matching namespaces.
    pub namespace_selector: Option<Selector>,

    pub types: PolicyTypes,
    pub ingress: Vec<Rule>,
    pub egress: Vec<Rule>,
}

/// Identifies a rule within a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RuleRef {
    pub tier: String,
    pub policy: String,
    pub direction: Direction,
    pub index: usize,
    pub action: Action,
}

/// Records which rules matched during an evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    /// The most recent rule that produced an `Allow`, `Deny` or `Pass` verdict.
    pub matched: Option<RuleRef>,

    /// Every `Log` rule that matched, in evaluation order.
    pub logged: Vec<RuleRef>,
}

// === impl PolicyTypes ===

impl PolicyTypes {
    pub const INGRESS: Self = Self {
        ingress: true,
        egress: false,
    };

    pub const EGRESS: Self = Self {
        ingress: false,
        egress: true,
    };

    pub const ALL: Self = Self {
        ingress: true,
        egress: true,
    };

    #[inline]
    pub fn contains(&self, direction: Direction) -> bool {
        match direction {
            Direction::Ingress => self.ingress,
            Direction::Egress => self.egress,
        }
    }
}

// === impl Policy ===

impl Policy {
    /// A global policy that selects all endpoints in both directions and has no rules.
    pub fn new(name: impl ToString, tier: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            tier: tier.to_string(),
            order: None,
            selector: Selector::All,
            namespace_selector: None,
            types: PolicyTypes::ALL,
            ingress: Vec::new(),
            egress: Vec::new(),
        }
    }

    /// The policy's name, prefixed with its namespace if it has one.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    #[inline]
    pub fn rules(&self, direction: Direction) -> &[Rule] {
        match direction {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }

    /// Indicates whether the policy selects the connection's local endpoint in the connection's
    /// direction.
    pub fn applies_to(&self, ctx: &ConnectionContext) -> bool {
        if !self.types.contains(ctx.direction) {
            return false;
        }

        let local = ctx.local();
        if let Some(ns) = self.namespace.as_deref() {
            if local.namespace.as_deref() != Some(ns) {
                return false;
            }
        }

        if let Some(sel) = &self.namespace_selector {
            if local.namespace.is_none() || !sel.matches(&local.namespace_labels) {
                return false;
            }
        }

        self.selector.matches(&local.labels)
    }

    pub fn evaluate(
        &self,
        ctx: &ConnectionContext,
        trace: &mut Trace,
    ) -> Result<Verdict, EvaluationError> {
        if !self.applies_to(ctx) {
            return Ok(Verdict::NoMatch);
        }
        self.evaluate_rules(ctx, trace)
    }

    /// Returns the verdict of the first matching rule, without checking whether the policy
    /// applies.
    pub(crate) fn evaluate_rules(
        &self,
        ctx: &ConnectionContext,
        trace: &mut Trace,
    ) -> Result<Verdict, EvaluationError> {
        let direction = ctx.direction;
        for (index, rule) in self.rules(direction).iter().enumerate() {
            if !rule.matches(ctx)? {
                continue;
            }

            let verdict = match rule.action {
                Action::Allow => Verdict::Allow,
                Action::Deny => Verdict::Deny,
                Action::Pass if self.tier == DEFAULT_TIER => {
                    tracing::debug!(
                        policy = %self.qualified_name(),
                        index,
                        "Ignoring pass rule in the default tier"
                    );
                    continue;
                }
                Action::Pass => Verdict::Pass,
                Action::Log => {
                    let rule = self.rule_ref(direction, index, Action::Log);
                    tracing::info!(
                        %rule,
                        src = %ctx.source.ip,
                        dst = %ctx.destination.ip,
                        protocol = %ctx.protocol,
                        "Matched log rule"
                    );
                    trace.logged.push(rule);
                    continue;
                }
            };

            tracing::debug!(policy = %self.qualified_name(), index, ?verdict, "Rule matched");
            trace.matched = Some(self.rule_ref(direction, index, rule.action));
            return Ok(verdict);
        }

        Ok(Verdict::NoMatch)
    }

    fn rule_ref(&self, direction: Direction, index: usize, action: Action) -> RuleRef {
        RuleRef {
            tier: self.tier.clone(),
            policy: self.qualified_name(),
            direction,
            index,
            action,
        }
    }
}

// === impl RuleRef ===

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.tier, self.policy, self.direction, self.index, self.action
        )
    }
}
