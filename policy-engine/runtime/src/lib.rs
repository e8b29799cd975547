#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use calico_policy_core as core;
pub use calico_policy_k8s_api as k8s;
pub use calico_policy_k8s_index as index;

mod args;
mod decision;
mod flow;
mod load;

pub use self::{
    args::Args,
    decision::DecisionRecord,
    flow::{parse_flows, Flow, FlowError},
    load::{load_flows, load_resources},
};
