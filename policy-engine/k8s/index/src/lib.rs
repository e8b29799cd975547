//! Calico policy index
//!
//! The index holds the `Tier`, `NetworkPolicy` and `GlobalNetworkPolicy` resources handed to it
//! by a datastore watch (or read from files) and publishes an immutable snapshot each time they
//! change:
//!
//! ```text
//! [ Resource ] -> validate -> [ Index ] -> watch<Arc<Snapshot>> -> [ Engine ]
//! ```
//!
//! Resources are converted into evaluation types when they are applied. A resource that fails to
//! convert, or that would leave the index in an invalid state, is rejected with a
//! [`ConfigError`] and the prior snapshot remains published. Engines never observe a partially
//! applied update.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod engine;
mod index;
mod metrics;
mod validate;


pub use self::{
    engine::Engine,
    index::{Index, SharedIndex},
    metrics::Metrics,
    validate::{ConfigError, FieldError},
};
