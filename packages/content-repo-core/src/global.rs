//! Singleton records.

use serde_json::Value;

use crate::access::RequestContext;
use crate::crud::{Collection, FindOptions, TransitionOptions, TransitionOutcome, VersionRef};
use crate::error::{RepoError, Result};
use crate::Record;

/// Handle for one global.
///
/// A global is a collection holding at most one record. The first `update`
/// creates it; later updates modify it in place.
#[derive(Debug, Clone, Copy)]
pub struct Global<'r> {
    collection: Collection<'r>,
}

impl<'r> Global<'r> {
    pub(crate) fn new(collection: Collection<'r>) -> Self {
        Self { collection }
    }

    pub fn name(&self) -> &'r str {
        self.collection.name()
    }

    /// Reads the global, or the latest snapshot of a workflow stage.
    ///
    /// # Returns
    /// `None` before the first update, or if the stage has no snapshot.
    pub fn get(&self, ctx: &RequestContext, stage: Option<&str>) -> Result<Option<Record>> {
        let mut options = FindOptions::new();
        if let Some(stage) = stage {
            options = options.stage(stage);
        }
        self.collection.find_one(ctx, &options)
    }

    /// Writes the global, creating it if needed.
    pub fn update(&self, ctx: &RequestContext, data: Value) -> Result<Record> {
        self.collection.upsert_singleton(ctx, data)
    }

    pub fn find_versions(&self, ctx: &RequestContext) -> Result<Vec<Record>> {
        let id = self.collection.singleton_id()?.unwrap_or(Value::Null);
        self.collection.find_versions(ctx, &id)
    }

    pub fn revert_to_version(&self, ctx: &RequestContext, version: VersionRef) -> Result<Record> {
        let id = self.require_id()?;
        self.collection.revert_to_version(ctx, &id, version)
    }

    /// Moves the global to a workflow stage; see `Collection::transition_stage`.
    pub fn transition_stage(
        &self,
        ctx: &RequestContext,
        options: TransitionOptions,
    ) -> Result<TransitionOutcome> {
        let id = self.require_id()?;
        self.collection.transition_stage(ctx, &id, options)
    }

    fn require_id(&self) -> Result<Value> {
        self.collection
            .singleton_id()?
            .ok_or_else(|| RepoError::not_found(self.name(), &Value::Null))
    }
}
