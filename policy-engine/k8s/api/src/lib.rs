#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod document;
pub mod policy;

pub use self::document::{parse_documents, LoadError, Resource, ResourceKind, UnsupportedKind};
pub use kube::api::{ObjectMeta, ResourceExt};
