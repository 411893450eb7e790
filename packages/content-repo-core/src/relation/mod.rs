//! Relation declarations and their build-time resolution.

mod config;
mod options;
mod resolver;

pub use config::{Cardinality, RelationConfig, RelationKind};
pub use options::{RelationOptions, RelationTarget, TargetFn};
pub use resolver::{infer_kind, resolve_relations};
