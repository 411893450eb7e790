//! Change and read hooks.
//!
//! `before_change` runs inside the write transaction before persistence and
//! may rewrite the payload; `after_change` runs inside the same transaction
//! after persistence; `after_read` runs on every returned record. A hook
//! error aborts the operation. Hooks must not call back into the repository
//! for writes, the transaction is still open.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::access::RequestContext;
use crate::error::{RepoError, Result};
use crate::Record;

/// Kind of mutation reported to hooks and recorded in versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
    Restore,
    Revert,
    Transition,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "create",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
            ChangeOperation::Restore => "restore",
            ChangeOperation::Revert => "revert",
            ChangeOperation::Transition => "transition",
        }
    }

    /// Operation tag stored in `versionOperation`.
    pub fn version_tag(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "create",
            ChangeOperation::Delete => "delete",
            _ => "update",
        }
    }
}

/// Payload seen by `before_change`.
pub struct BeforeChange<'a> {
    pub collection: &'a str,
    pub operation: ChangeOperation,
    pub context: &'a RequestContext,
    /// Caller payload; changes are persisted. Empty on delete and restore
    pub data: &'a mut Record,
    /// Record before the change; `None` on create
    pub original: Option<&'a Record>,
}

/// Payload seen by `after_change`.
pub struct AfterChange<'a> {
    pub collection: &'a str,
    pub operation: ChangeOperation,
    pub context: &'a RequestContext,
    /// Record as persisted
    pub record: &'a Record,
    pub original: Option<&'a Record>,
}

pub type HookResult = std::result::Result<(), String>;
pub type BeforeChangeHook = Arc<dyn Fn(&mut BeforeChange<'_>) -> HookResult + Send + Sync>;
pub type AfterChangeHook = Arc<dyn Fn(&AfterChange<'_>) -> HookResult + Send + Sync>;
pub type AfterReadHook = Arc<dyn Fn(&mut Record, &RequestContext) -> HookResult + Send + Sync>;

/// Hooks of one collection, run in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_change: Vec<BeforeChangeHook>,
    pub after_change: Vec<AfterChangeHook>,
    pub after_read: Vec<AfterReadHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_change(
        mut self,
        hook: impl Fn(&mut BeforeChange<'_>) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.before_change.push(Arc::new(hook));
        self
    }

    pub fn after_change(
        mut self,
        hook: impl Fn(&AfterChange<'_>) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.after_change.push(Arc::new(hook));
        self
    }

    pub fn after_read(
        mut self,
        hook: impl Fn(&mut Record, &RequestContext) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.after_read.push(Arc::new(hook));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before_change.is_empty() && self.after_change.is_empty() && self.after_read.is_empty()
    }

    pub(crate) fn run_before_change(&self, event: &mut BeforeChange<'_>) -> Result<()> {
        for hook in &self.before_change {
            hook(event).map_err(|message| hook_error(event.collection, message))?;
        }
        Ok(())
    }

    pub(crate) fn run_after_change(&self, event: &AfterChange<'_>) -> Result<()> {
        for hook in &self.after_change {
            hook(event).map_err(|message| hook_error(event.collection, message))?;
        }
        Ok(())
    }

    pub(crate) fn run_after_read(
        &self,
        collection: &str,
        record: &mut Record,
        ctx: &RequestContext,
    ) -> Result<()> {
        for hook in &self.after_read {
            hook(record, ctx).map_err(|message| hook_error(collection, message))?;
        }
        Ok(())
    }
}

fn hook_error(collection: &str, message: String) -> RepoError {
    RepoError::Hook {
        collection: collection.to_string(),
        message,
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_change", &self.before_change.len())
            .field("after_change", &self.after_change.len())
            .field("after_read", &self.after_read.len())
            .finish()
    }
}
