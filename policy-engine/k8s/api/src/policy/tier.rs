use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An ordered group of policies.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "Tier",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct TierSpec {
    /// Tiers without an order are evaluated last.
    #[serde(default, alias = "Order", skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,

    /// What happens to a connection when policies in the tier applied to it but none of their
    /// rules matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_action: Option<TierDefaultAction>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum TierDefaultAction {
    #[serde(alias = "deny")]
    Deny,

    #[serde(alias = "pass")]
    Pass,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_capitalized_order() {
        let spec = serde_json::from_value::<TierSpec>(serde_json::json!({ "Order": 2 })).unwrap();
        assert_eq!(spec.order, Some(2.0));

        let spec = serde_json::from_value::<TierSpec>(serde_json::json!({
            "order": 10.5,
            "defaultAction": "Pass",
        }))
        .unwrap();
        assert_eq!(spec.order, Some(10.5));
        assert_eq!(spec.default_action, Some(TierDefaultAction::Pass));
    }
}
