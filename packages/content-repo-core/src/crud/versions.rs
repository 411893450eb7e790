//! Version snapshots.
//!
//! Each mutation appends exactly one snapshot of the Main row and copies
//! the record's I18n rows under the same version number. Numbers are per
//! record, start at 1 and only grow; reverting appends a new version rather
//! than rewinding.

use std::collections::HashMap;

use serde_json::Value;

use super::read::LocalizedRows;
use super::{key_of, now, Collection, VersionRef};
use crate::access::{AccessDecision, AccessOperation, RequestContext};
use crate::error::{RepoError, Result};
use crate::hooks::{AfterChange, ChangeOperation};
use crate::schema::columns::{
    CREATED_AT, LOCALE, LOCALIZED_BLOB, PARENT_ID, UPDATED_AT, VERSION_CREATED_AT, VERSION_ID,
    VERSION_NUMBER, VERSION_OPERATION, VERSION_PARENT, VERSION_STAGE, VERSION_USER_ID,
};
use crate::store::{Filter, Row, StoreRead, Transaction};
use crate::Record;

const VERSION_META: &[&str] = &[
    VERSION_ID,
    VERSION_NUMBER,
    VERSION_OPERATION,
    VERSION_USER_ID,
    VERSION_CREATED_AT,
];

fn version_number(row: &Row) -> i64 {
    row.get(VERSION_NUMBER).and_then(Value::as_i64).unwrap_or(0)
}

impl<'r> Collection<'r> {
    fn not_versioned(&self) -> RepoError {
        RepoError::validation(self.name(), "versions", "collection is not versioned")
    }

    /// Appends a snapshot of the record as it currently is in `tx`.
    ///
    /// # Arguments
    /// * `stage` - Workflow stage tag; defaults to the initial stage
    ///
    /// # Returns
    /// The new version number, or `None` if the collection is unversioned.
    pub(crate) fn append_version(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        id: &Value,
        operation: ChangeOperation,
        stage: Option<&str>,
    ) -> Result<Option<i64>> {
        let schema = &self.runtime.schema;
        let options = &self.runtime.definition.options;
        let Some(versions) = &schema.tables.versions else {
            return Ok(None);
        };
        let main = tx
            .select_one(self.main_table(), &self.key_filter(id))?
            .ok_or_else(|| RepoError::not_found(self.name(), id))?;

        let number = tx
            .select(&versions.name, &Filter::Eq(VERSION_PARENT.into(), id.clone()))?
            .iter()
            .map(version_number)
            .max()
            .unwrap_or(0)
            + 1;

        let mut row = Row::new();
        row.insert(VERSION_PARENT.into(), id.clone());
        row.insert(VERSION_NUMBER.into(), Value::from(number));
        row.insert(VERSION_OPERATION.into(), Value::from(operation.version_tag()));
        row.insert(VERSION_USER_ID.into(), ctx.user_id());
        row.insert(VERSION_CREATED_AT.into(), now());
        if let Some(workflow) = options.versioning.workflow() {
            let stage = stage.unwrap_or(&workflow.initial_stage);
            row.insert(VERSION_STAGE.into(), Value::from(stage));
        }
        for column in &schema.snapshot_columns {
            row.insert(column.clone(), main.get(column).cloned().unwrap_or(Value::Null));
        }
        tx.insert(&versions.name, row)?;

        if let (Some(i18n), Some(i18n_versions)) = (&schema.tables.i18n, &schema.tables.i18n_versions) {
            let localized = tx.select(&i18n.name, &Filter::Eq(PARENT_ID.into(), id.clone()))?;
            for source in localized {
                let mut copy = Row::new();
                copy.insert(PARENT_ID.into(), id.clone());
                copy.insert(VERSION_NUMBER.into(), Value::from(number));
                for column in schema
                    .localized_columns
                    .iter()
                    .map(String::as_str)
                    .chain([LOCALE, LOCALIZED_BLOB])
                {
                    copy.insert(
                        column.to_string(),
                        source.get(column).cloned().unwrap_or(Value::Null),
                    );
                }
                tx.insert(&i18n_versions.name, copy)?;
            }
        }

        if let Some(max) = options.max_versions {
            let cutoff = number - max.max(1) as i64;
            if cutoff > 0 {
                // the newest snapshot of each stage backs stage reads
                let pinned = match options.versioning.workflow() {
                    Some(_) => self.stage_heads(tx, id)?,
                    None => Vec::new(),
                };
                let trimmed = tx.delete_where(
                    &versions.name,
                    &Filter::and(vec![
                        Filter::Eq(VERSION_PARENT.into(), id.clone()),
                        Filter::Lte(VERSION_NUMBER.into(), Value::from(cutoff)),
                        Filter::NotIn(VERSION_NUMBER.into(), pinned.clone()),
                    ]),
                )?;
                if let Some(i18n_versions) = &schema.tables.i18n_versions {
                    tx.delete_where(
                        &i18n_versions.name,
                        &Filter::and(vec![
                            Filter::Eq(PARENT_ID.into(), id.clone()),
                            Filter::Lte(VERSION_NUMBER.into(), Value::from(cutoff)),
                            Filter::NotIn(VERSION_NUMBER.into(), pinned),
                        ]),
                    )?;
                }
                if !trimmed.is_empty() {
                    tracing::trace!(
                        collection = self.name(),
                        id = %key_of(id),
                        trimmed = trimmed.len(),
                        "trimmed versions"
                    );
                }
            }
        }

        tracing::trace!(
            collection = self.name(),
            id = %key_of(id),
            version = number,
            operation = operation.as_str(),
            "appended version"
        );
        Ok(Some(number))
    }

    /// Number of the newest version of each stage of a record.
    fn stage_heads(&self, tx: &Transaction<'r>, id: &Value) -> Result<Vec<Value>> {
        let Some(versions) = &self.runtime.schema.tables.versions else {
            return Ok(Vec::new());
        };
        let mut heads: HashMap<String, i64> = HashMap::new();
        for row in tx.select(&versions.name, &Filter::Eq(VERSION_PARENT.into(), id.clone()))? {
            let Some(stage) = row.get(VERSION_STAGE).and_then(Value::as_str) else {
                continue;
            };
            let number = version_number(&row);
            let head = heads.entry(stage.to_string()).or_insert(number);
            *head = (*head).max(number);
        }
        Ok(heads.into_values().map(Value::from).collect())
    }

    /// Lists the versions of a record, oldest first.
    ///
    /// Each entry carries the version metadata followed by the record as it
    /// was at that version, localized for the context and stripped of
    /// unreadable fields.
    pub fn find_versions(&self, ctx: &RequestContext, id: &Value) -> Result<Vec<Record>> {
        let schema = &self.runtime.schema;
        let Some(versions) = &schema.tables.versions else {
            return Err(self.not_versioned());
        };
        let view = self.repo.store().read();
        match self
            .runtime
            .definition
            .access
            .decide(AccessOperation::Read, ctx)
        {
            AccessDecision::Deny => return Ok(Vec::new()),
            AccessDecision::Allow => {}
            AccessDecision::Where(filter) => {
                let visible = self
                    .load(&view, ctx, id, true)?
                    .is_some_and(|record| filter.matches(&record));
                if !visible {
                    return Ok(Vec::new());
                }
            }
        }

        let mut rows = view.select(&versions.name, &Filter::Eq(VERSION_PARENT.into(), id.clone()))?;
        rows.sort_by_key(version_number);
        let localized_rows = match &schema.tables.i18n_versions {
            Some(table) => view.select(&table.name, &Filter::Eq(PARENT_ID.into(), id.clone()))?,
            None => Vec::new(),
        };

        let scope = self.scope(ctx);
        let workflow = self.runtime.definition.options.versioning.workflow().is_some();
        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let number = version_number(row);
            let localized = LocalizedRows::build(
                self.repo.config().fallback_strategy,
                localized_rows.iter().filter(|r| version_number(r) == number),
                &scope,
            );
            let snapshot = self.snapshot_row(row, id, None);
            let assembled = self.assemble(&view, &snapshot, &localized, &scope)?;

            let mut entry = Record::new();
            for column in VERSION_META {
                entry.insert(column.to_string(), row.get(*column).cloned().unwrap_or(Value::Null));
            }
            if workflow {
                entry.insert(
                    VERSION_STAGE.into(),
                    row.get(VERSION_STAGE).cloned().unwrap_or(Value::Null),
                );
            }
            entry.extend(self.strip(assembled, ctx));
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Restores a record to an earlier version.
    ///
    /// The Main row takes the snapshot values (keeping `createdAt`), the I18n
    /// rows are replaced by the saved ones, and a new version is appended.
    pub fn revert_to_version(
        &self,
        ctx: &RequestContext,
        id: &Value,
        version: VersionRef,
    ) -> Result<Record> {
        let schema = &self.runtime.schema;
        let definition = &self.runtime.definition;
        let Some(versions) = &schema.tables.versions else {
            return Err(self.not_versioned());
        };
        let access = definition
            .access
            .write_filter(self.name(), AccessOperation::Update, ctx)?;

        let record = self.in_transaction("revert", |tx| {
            let original = self
                .load(&*tx, ctx, id, false)?
                .filter(|record| access.matches(record))
                .ok_or_else(|| RepoError::not_found(self.name(), id))?;
            let selector = match version {
                VersionRef::Number(number) => Filter::Eq(VERSION_NUMBER.into(), Value::from(number)),
                VersionRef::Id(version_id) => Filter::Eq(VERSION_ID.into(), Value::from(version_id)),
            };
            let filter = Filter::and(vec![Filter::Eq(VERSION_PARENT.into(), id.clone()), selector]);
            let snapshot = tx.select_one(&versions.name, &filter)?.ok_or_else(|| {
                let label = match version {
                    VersionRef::Number(number) => format!("{}@{number}", key_of(id)),
                    VersionRef::Id(version_id) => format!("{}#{version_id}", key_of(id)),
                };
                RepoError::not_found(self.name(), &Value::String(label))
            })?;
            let number = version_number(&snapshot);

            let mut patch = Row::new();
            for column in schema.snapshot_columns.iter().filter(|c| c.as_str() != CREATED_AT) {
                patch.insert(column.clone(), snapshot.get(column).cloned().unwrap_or(Value::Null));
            }
            if definition.options.timestamps {
                patch.insert(UPDATED_AT.into(), now());
            }
            tx.update_where(self.main_table(), &self.key_filter(id), &patch)?;

            if let (Some(i18n), Some(i18n_versions)) =
                (&schema.tables.i18n, &schema.tables.i18n_versions)
            {
                tx.delete_where(&i18n.name, &Filter::Eq(PARENT_ID.into(), id.clone()))?;
                let saved = tx.select(
                    &i18n_versions.name,
                    &Filter::and(vec![
                        Filter::Eq(PARENT_ID.into(), id.clone()),
                        Filter::Eq(VERSION_NUMBER.into(), Value::from(number)),
                    ]),
                )?;
                for source in saved {
                    let mut row = Row::new();
                    row.insert(PARENT_ID.into(), id.clone());
                    for column in schema
                        .localized_columns
                        .iter()
                        .map(String::as_str)
                        .chain([LOCALE, LOCALIZED_BLOB])
                    {
                        row.insert(
                            column.to_string(),
                            source.get(column).cloned().unwrap_or(Value::Null),
                        );
                    }
                    tx.insert(&i18n.name, row)?;
                }
            }

            self.append_version(tx, ctx, id, ChangeOperation::Revert, None)?;
            let record = self
                .load(&*tx, ctx, id, false)?
                .ok_or_else(|| RepoError::not_found(self.name(), id))?;
            definition.hooks.run_after_change(&AfterChange {
                collection: self.name(),
                operation: ChangeOperation::Revert,
                context: ctx,
                record: &record,
                original: Some(&original),
            })?;
            tracing::debug!(
                collection = self.name(),
                id = %key_of(id),
                reverted_to = number,
                "reverted record"
            );
            Ok(record)
        })?;
        self.finish(record, ctx)
    }
}
