pub mod global_network_policy;
pub mod network_policy;
pub mod rule;
pub mod tier;

pub use self::{
    global_network_policy::{GlobalNetworkPolicy, GlobalNetworkPolicySpec},
    network_policy::{NetworkPolicy, NetworkPolicySpec},
    rule::{Action, EntityRule, PolicyType, Port, Protocol, Rule},
    tier::{Tier, TierDefaultAction, TierSpec},
};
