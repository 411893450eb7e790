//! Operations on one collection.
//!
//! Reads run against one committed snapshot. Every mutation runs inside one
//! store transaction covering Main, I18n, Versions and I18n-Versions, and
//! commits only if every step succeeded.

mod options;
mod read;
mod relations;
mod versions;
mod where_clause;
mod workflow;
mod write;

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::access::RequestContext;
use crate::error::Result;
use crate::registry::{CollectionRuntime, Repository};
use crate::schema::CollectionSchema;
use crate::store::{Filter, Transaction};
use crate::Record;

pub use options::{FindOptions, VersionRef};
pub use workflow::{JobOutcome, TransitionOptions, TransitionOutcome};
pub(crate) use read::LocaleScope;
pub(crate) use where_clause::WhereParser;

/// Handle for one collection of a built repository.
#[derive(Clone, Copy)]
pub struct Collection<'r> {
    repo: &'r Repository,
    runtime: &'r CollectionRuntime,
}

impl<'r> Collection<'r> {
    pub(crate) fn new(repo: &'r Repository, runtime: &'r CollectionRuntime) -> Self {
        Self { repo, runtime }
    }

    pub fn name(&self) -> &'r str {
        self.runtime.name()
    }

    pub fn runtime(&self) -> &'r CollectionRuntime {
        self.runtime
    }

    pub fn schema(&self) -> &'r CollectionSchema {
        &self.runtime.schema
    }

    /// Human-readable label of a record, read from the title attribute.
    pub fn title_of<'a>(&self, record: &'a Record) -> Option<&'a Value> {
        record.get(self.runtime.schema.title.attribute())
    }

    fn main_table(&self) -> &'r str {
        &self.runtime.schema.tables.main.name
    }

    fn key_filter(&self, id: &Value) -> Filter {
        Filter::Eq(self.runtime.schema.primary_key.clone(), id.clone())
    }

    fn scope(&self, ctx: &RequestContext) -> LocaleScope {
        LocaleScope::new(self.repo.config(), ctx)
    }

    /// Runs `operation` in a write transaction, committing on success.
    ///
    /// A failed operation drops the transaction, discarding every staged
    /// change.
    fn in_transaction<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Transaction<'r>) -> Result<T>,
    ) -> Result<T> {
        let mut tx = self.repo.store().begin();
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(collection = self.name(), operation, error = %e, "operation aborted");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Collection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name())
            .finish()
    }
}

/// Current time as stored in timestamp columns.
pub(crate) fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Map key for an id value.
pub(crate) fn key_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
