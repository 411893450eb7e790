//! Read options.

use serde_json::Value;

use crate::store::Direction;

/// Options of `find`, `find_one` and `find_by_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// JSON `where` clause over record attributes
    pub filter: Option<Value>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Relation fields to eager-load
    pub with: Vec<String>,
    /// Workflow stage to read instead of the live record
    pub stage: Option<String>,
    /// Include soft-deleted records
    pub include_deleted: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, clause: Value) -> Self {
        self.filter = Some(clause);
        self
    }

    pub fn order_by(mut self, attribute: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((attribute.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with(mut self, relation: impl Into<String>) -> Self {
        self.with.push(relation.into());
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// Version addressed by `revert_to_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRef {
    /// Per-record `versionNumber`
    Number(i64),
    /// Table-wide `versionId`
    Id(i64),
}
