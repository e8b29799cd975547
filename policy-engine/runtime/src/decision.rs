use crate::core::{Decision, Reason};
use serde::Serialize;

/// The JSON form of a decision written by the `eval` command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,

    pub action: String,

    pub reason: &'static str,

    /// The tier that decided the flow, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,

    /// The rule that decided the flow, as `tier|policy|direction|index|action`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logged: Vec<String>,
}

// === impl DecisionRecord ===

impl DecisionRecord {
    pub fn new(flow: Option<String>, decision: &Decision) -> Self {
        let (tier, rule, error) = match &decision.reason {
            Reason::Rule(rule) => (Some(rule.tier.clone()), Some(rule.to_string()), None),
            Reason::EndOfTier(tier) => (Some(tier.clone()), None, None),
            Reason::EndOfTiers => (None, None, None),
            Reason::EvaluationFailed(error) => (None, None, Some(error.to_string())),
        };

        Self {
            flow,
            action: decision.action.to_string(),
            reason: decision.reason.kind(),
            tier,
            rule,
            error,
            logged: decision.logged.iter().map(ToString::to_string).collect(),
        }
    }
}
