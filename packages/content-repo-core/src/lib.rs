//! Content repository engine.
//!
//! Derives relational tables from declarative collections and serves
//! localized CRUD with versioning, workflow stages, relations and
//! field-level access control over an in-memory transactional store.

pub mod access;
pub mod config;
pub mod crud;
pub mod declarative;
pub mod error;
pub mod global;
pub mod hooks;
pub mod jobs;
pub mod registry;
pub mod relation;
pub mod schema;
pub mod store;
pub mod upload;

/// Assembled record: attribute name to value, in field order.
pub type Record = serde_json::Map<String, serde_json::Value>;

pub use access::{AccessDecision, AccessRule, CollectionAccess, FieldRule, RequestContext};
pub use config::{FallbackStrategy, IdStrategy, RepoConfig};
pub use crud::{
    Collection, FindOptions, JobOutcome, TransitionOptions, TransitionOutcome, VersionRef,
};
pub use declarative::CollectionsFile;
pub use error::{RepoError, Result};
pub use global::Global;
pub use hooks::{ChangeOperation, Hooks};
pub use jobs::{InMemoryJobQueue, JobQueue, TransitionJob};
pub use registry::{BuilderExtension, Repository, RepositoryBuilder};
pub use relation::RelationOptions;
pub use schema::{CollectionDefinition, FieldDefinition, GlobalDefinition};
