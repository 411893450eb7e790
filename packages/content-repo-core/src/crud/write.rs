//! Create, update, delete and restore.
//!
//! Every mutation validates its payload before touching the store, then
//! writes Main, I18n and the version snapshot in one transaction.

use serde_json::{Map, Value};

use super::options::FindOptions;
use super::read::deep_merge;
use super::{now, Collection};
use crate::access::{check_field_writes, AccessOperation, RequestContext};
use crate::error::{RepoError, Result};
use crate::hooks::{AfterChange, BeforeChange, ChangeOperation};
use crate::relation::RelationKind;
use crate::schema::columns::{CREATED_AT, DELETED_AT, LOCALE, LOCALIZED_BLOB, PARENT_ID, UPDATED_AT};
use crate::schema::FieldStorage;
use crate::store::{Filter, Row, StoreRead, Transaction};
use crate::Record;

/// A write payload split by destination table.
#[derive(Debug, Default)]
struct RowParts {
    main: Row,
    /// Whole-mode I18n columns
    localized: Row,
    /// Nested-mode overrides keyed by field
    fragments: Map<String, Value>,
    /// Relations stored on other tables, applied after the Main row exists
    remote: Vec<(String, Value)>,
}

impl<'r> Collection<'r> {
    /// Checks the shape of a write payload.
    ///
    /// Unknown attributes, field access, `input: false` fields and primary
    /// key changes are rejected in that order.
    fn check_payload(
        &self,
        ctx: &RequestContext,
        data: Value,
        operation: ChangeOperation,
    ) -> Result<Record> {
        let Value::Object(payload) = data else {
            return Err(RepoError::validation(self.name(), "data", "payload must be an object"));
        };
        for key in payload.keys() {
            if self.runtime.field(key).is_none() {
                return Err(RepoError::validation(self.name(), key.as_str(), "unknown field"));
            }
        }
        let fields = &self.runtime.definition.fields;
        check_field_writes(self.name(), fields, &payload, ctx)?;
        for field in fields.iter().filter(|f| payload.contains_key(&f.name)) {
            if !field.input || field.is_virtual() {
                return Err(RepoError::validation(
                    self.name(),
                    field.name.as_str(),
                    "field is not writable",
                ));
            }
            if field.primary_key && operation != ChangeOperation::Create {
                return Err(RepoError::validation(
                    self.name(),
                    field.name.as_str(),
                    "primary key cannot be changed",
                ));
            }
        }
        Ok(payload)
    }

    /// Locale localized values of a write are stored under.
    fn write_locale(&self, ctx: &RequestContext) -> Result<String> {
        let config = self.repo.config();
        let locale = ctx
            .locale
            .clone()
            .unwrap_or_else(|| config.default_locale.clone());
        if !config.accepts_locale(&locale) {
            return Err(RepoError::validation(
                self.name(),
                "locale",
                format!("locale '{locale}' is not configured"),
            ));
        }
        Ok(locale)
    }

    /// Validates values against their field types.
    fn validate_payload(&self, payload: &Record, operation: ChangeOperation) -> Result<()> {
        if operation == ChangeOperation::Create {
            for name in self.runtime.shapes.required_on_insert() {
                if payload.get(name).map_or(true, Value::is_null) {
                    return Err(RepoError::validation(self.name(), name, "is required"));
                }
            }
        }
        for field in &self.runtime.definition.fields {
            let Some(value) = payload.get(&field.name) else {
                continue;
            };
            if self.runtime.relations.contains_key(&field.name) {
                continue;
            }
            if value.is_null() {
                if !field.nullable {
                    return Err(RepoError::validation(
                        self.name(),
                        field.name.as_str(),
                        "must not be null",
                    ));
                }
                continue;
            }
            let field_type = self.repo.field_types().for_field(self.name(), field)?;
            field_type
                .validate(field, value)
                .map_err(|message| RepoError::validation(self.name(), field.name.as_str(), message))?;
        }
        Ok(())
    }

    /// Splits a payload by destination.
    ///
    /// # Arguments
    /// * `nested_in_main` - Whether nested-mode values replace the base value
    /// * `original` - Current Main row on update
    fn split_payload(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        payload: &Record,
        nested_in_main: bool,
        original: Option<&Row>,
    ) -> Result<RowParts> {
        let mut parts = RowParts::default();
        for field in &self.runtime.definition.fields {
            let Some(value) = payload.get(&field.name) else {
                continue;
            };
            match self.runtime.schema.storage.get(&field.name) {
                Some(FieldStorage::Main { columns }) => match self.runtime.relations.get(&field.name) {
                    Some(relation) => {
                        let columns = self.local_relation_columns(tx, ctx, relation, value, original)?;
                        parts.main.extend(columns);
                    }
                    None => {
                        if let Some(column) = columns.first() {
                            parts.main.insert(column.clone(), value.clone());
                        }
                    }
                },
                Some(FieldStorage::Localized { column }) => {
                    parts.localized.insert(column.clone(), value.clone());
                }
                Some(FieldStorage::Nested { column }) if nested_in_main => {
                    parts.main.insert(column.clone(), value.clone());
                }
                Some(FieldStorage::Nested { .. }) => {
                    parts.fragments.insert(field.name.clone(), value.clone());
                }
                Some(FieldStorage::Related) => {
                    parts.remote.push((field.name.clone(), value.clone()));
                }
                Some(FieldStorage::Computed) | None => {}
            }
        }
        Ok(parts)
    }

    fn apply_remote(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        id: &Value,
        remote: Vec<(String, Value)>,
    ) -> Result<()> {
        for (field, value) in remote {
            if let Some(relation) = self.runtime.relations.get(&field) {
                self.apply_remote_relation(tx, ctx, relation, id, &value)?;
            }
        }
        Ok(())
    }

    /// Inserts the Main row and its I18n rows.
    ///
    /// # Returns
    /// The new primary key.
    fn insert_row(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        payload: &Record,
        locale: &str,
    ) -> Result<Value> {
        let schema = &self.runtime.schema;
        let parts = self.split_payload(tx, ctx, payload, true, None)?;
        let mut main = parts.main;
        if self.runtime.definition.options.timestamps {
            let stamp = now();
            main.insert(CREATED_AT.into(), stamp.clone());
            main.insert(UPDATED_AT.into(), stamp);
        }
        let row = tx.insert(self.main_table(), main)?;
        let id = row.get(&schema.primary_key).cloned().unwrap_or(Value::Null);

        if let Some(table) = &schema.tables.i18n {
            let mut localized = parts.localized;
            for field in &self.runtime.definition.fields {
                if let (Some(FieldStorage::Localized { column }), Some(default)) =
                    (schema.storage.get(&field.name), &field.default)
                {
                    if !localized.contains_key(column) {
                        localized.insert(column.clone(), default.clone());
                    }
                }
            }
            let default_locale = &self.repo.config().default_locale;
            let mut locales = vec![locale];
            if locale != default_locale {
                locales.push(default_locale);
            }
            for row_locale in locales {
                let mut row = localized.clone();
                row.insert(PARENT_ID.into(), id.clone());
                row.insert(LOCALE.into(), Value::String(row_locale.to_string()));
                tx.insert(&table.name, row)?;
            }
        }

        self.apply_remote(tx, ctx, &id, parts.remote)?;
        tracing::trace!(collection = self.name(), id = %super::key_of(&id), locale, "inserted row");
        Ok(id)
    }

    /// Writes localized values of one locale, creating the row if needed.
    fn upsert_i18n(
        &self,
        tx: &mut Transaction<'r>,
        id: &Value,
        locale: &str,
        localized: Row,
        fragments: Map<String, Value>,
    ) -> Result<()> {
        let Some(table) = &self.runtime.schema.tables.i18n else {
            return Ok(());
        };
        let filter = Filter::and(vec![
            Filter::Eq(PARENT_ID.into(), id.clone()),
            Filter::eq(LOCALE, locale),
        ]);
        let existing = tx.select_one(&table.name, &filter)?;
        let mut row = localized;
        if !fragments.is_empty() {
            let mut blob: Map<String, Value> = existing
                .as_ref()
                .and_then(|r| r.get(LOCALIZED_BLOB))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            for (field, fragment) in fragments {
                match blob.get_mut(&field) {
                    Some(current) if !current.is_null() => deep_merge(current, &fragment),
                    _ => {
                        blob.insert(field, fragment);
                    }
                }
            }
            row.insert(LOCALIZED_BLOB.into(), Value::Object(blob));
        }
        match existing {
            Some(_) => {
                tx.update_where(&table.name, &filter, &row)?;
            }
            None => {
                row.insert(PARENT_ID.into(), id.clone());
                row.insert(LOCALE.into(), Value::String(locale.to_string()));
                tx.insert(&table.name, row)?;
            }
        }
        Ok(())
    }

    /// Applies an update payload to Main, I18n and remote relations.
    fn update_row(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        id: &Value,
        payload: &Record,
        locale: &str,
        original: &Row,
    ) -> Result<()> {
        let in_default = locale == self.repo.config().default_locale;
        let parts = self.split_payload(tx, ctx, payload, in_default, Some(original))?;
        let mut main = parts.main;
        if self.runtime.definition.options.timestamps {
            main.insert(UPDATED_AT.into(), now());
        }
        if !main.is_empty() {
            tx.update_where(self.main_table(), &self.key_filter(id), &main)?;
        }
        if !parts.localized.is_empty() || !parts.fragments.is_empty() {
            self.upsert_i18n(tx, id, locale, parts.localized, parts.fragments)?;
        }
        self.apply_remote(tx, ctx, id, parts.remote)
    }

    fn denied(&self, operation: AccessOperation) -> RepoError {
        RepoError::AccessDenied {
            collection: self.name().to_string(),
            operation: operation.as_str().to_string(),
        }
    }

    /// Creates a record inside an open transaction.
    ///
    /// Nested relation creates call this on the target collection.
    pub(crate) fn create_in(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        data: Value,
    ) -> Result<Record> {
        let definition = &self.runtime.definition;
        let access = definition
            .access
            .write_filter(self.name(), AccessOperation::Create, ctx)?;
        let mut payload = self.check_payload(ctx, data, ChangeOperation::Create)?;
        let locale = self.write_locale(ctx)?;
        definition.hooks.run_before_change(&mut BeforeChange {
            collection: self.name(),
            operation: ChangeOperation::Create,
            context: ctx,
            data: &mut payload,
            original: None,
        })?;
        self.validate_payload(&payload, ChangeOperation::Create)?;

        let id = self.insert_row(tx, ctx, &payload, &locale)?;
        self.append_version(tx, ctx, &id, ChangeOperation::Create, None)?;
        let record = self
            .load(&*tx, ctx, &id, false)?
            .ok_or_else(|| RepoError::not_found(self.name(), &id))?;
        if !access.matches(&record) {
            return Err(self.denied(AccessOperation::Create));
        }
        definition.hooks.run_after_change(&AfterChange {
            collection: self.name(),
            operation: ChangeOperation::Create,
            context: ctx,
            record: &record,
            original: None,
        })?;
        Ok(record)
    }

    /// Creates a record.
    ///
    /// Localized values are stored under the context locale; a record
    /// created in another locale also seeds the default locale.
    ///
    /// # Returns
    /// The created record as the context may read it.
    pub fn create(&self, ctx: &RequestContext, data: Value) -> Result<Record> {
        let record = self.in_transaction("create", |tx| self.create_in(tx, ctx, data))?;
        tracing::debug!(collection = self.name(), "created record");
        self.finish(record, ctx)
    }

    /// Updates one record inside an open transaction.
    ///
    /// `access` is the update filter; a record outside it is not found.
    pub(crate) fn update_in(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        id: &Value,
        payload: &Record,
        access: &Filter,
    ) -> Result<Record> {
        let definition = &self.runtime.definition;
        let locale = self.write_locale(ctx)?;
        let original = self
            .load(&*tx, ctx, id, false)?
            .filter(|record| access.matches(record))
            .ok_or_else(|| RepoError::not_found(self.name(), id))?;
        let original_row = tx
            .select_one(self.main_table(), &self.key_filter(id))?
            .unwrap_or_default();

        let mut data = payload.clone();
        definition.hooks.run_before_change(&mut BeforeChange {
            collection: self.name(),
            operation: ChangeOperation::Update,
            context: ctx,
            data: &mut data,
            original: Some(&original),
        })?;
        self.validate_payload(&data, ChangeOperation::Update)?;

        self.update_row(tx, ctx, id, &data, &locale, &original_row)?;
        self.append_version(tx, ctx, id, ChangeOperation::Update, None)?;
        let record = self
            .load(&*tx, ctx, id, false)?
            .ok_or_else(|| RepoError::not_found(self.name(), id))?;
        definition.hooks.run_after_change(&AfterChange {
            collection: self.name(),
            operation: ChangeOperation::Update,
            context: ctx,
            record: &record,
            original: Some(&original),
        })?;
        Ok(record)
    }

    /// Updates a record by primary key.
    ///
    /// Localized values are written to the context locale only.
    pub fn update_by_id(&self, ctx: &RequestContext, id: &Value, data: Value) -> Result<Record> {
        let access = self
            .runtime
            .definition
            .access
            .write_filter(self.name(), AccessOperation::Update, ctx)?;
        let payload = self.check_payload(ctx, data, ChangeOperation::Update)?;
        let record = self.in_transaction("update", |tx| {
            self.update_in(tx, ctx, id, &payload, &access)
        })?;
        tracing::debug!(collection = self.name(), id = %super::key_of(id), "updated record");
        self.finish(record, ctx)
    }

    /// Updates every record matching a `where` clause that the context may
    /// read and update, in one transaction.
    pub fn update(&self, ctx: &RequestContext, filter: &Value, data: Value) -> Result<Vec<Record>> {
        let access = self
            .runtime
            .definition
            .access
            .write_filter(self.name(), AccessOperation::Update, ctx)?;
        let payload = self.check_payload(ctx, data, ChangeOperation::Update)?;
        let key = self.runtime.schema.primary_key.clone();
        let records = self.in_transaction("update", |tx| {
            let options = FindOptions::new().filter(filter.clone());
            let ids: Vec<Value> = self
                .collect_records(&*tx, ctx, &options, None)?
                .into_iter()
                .filter_map(|record| record.get(&key).cloned())
                .collect();
            let mut updated = Vec::with_capacity(ids.len());
            for id in &ids {
                let visible = self
                    .load(&*tx, ctx, id, false)?
                    .is_some_and(|record| access.matches(&record));
                if visible {
                    updated.push(self.update_in(tx, ctx, id, &payload, &access)?);
                }
            }
            Ok(updated)
        })?;
        tracing::debug!(collection = self.name(), count = records.len(), "updated records");
        records
            .into_iter()
            .map(|record| self.finish(record, ctx))
            .collect()
    }

    /// Updates the single record of a global, creating it on first write.
    pub(crate) fn upsert_singleton(&self, ctx: &RequestContext, data: Value) -> Result<Record> {
        let access = self
            .runtime
            .definition
            .access
            .write_filter(self.name(), AccessOperation::Update, ctx)?;
        let key = &self.runtime.schema.primary_key;
        let record = self.in_transaction("update", |tx| {
            let existing = tx
                .rows(self.main_table())?
                .first()
                .and_then(|row| row.get(key))
                .cloned();
            match existing {
                Some(id) => {
                    let payload = self.check_payload(ctx, data, ChangeOperation::Update)?;
                    self.update_in(tx, ctx, &id, &payload, &access)
                }
                None => self.create_in(tx, ctx, data),
            }
        })?;
        self.finish(record, ctx)
    }

    /// Removes junction rows of this record's manyToMany relations.
    fn delete_junction_rows(&self, tx: &mut Transaction<'r>, id: &Value) -> Result<()> {
        for relation in self.runtime.relations.values() {
            if relation.kind != RelationKind::ManyToMany {
                continue;
            }
            let (Some(through), Some(source_field)) = (&relation.through, &relation.source_field)
            else {
                continue;
            };
            let junction = self.repo.runtime(through)?;
            tx.delete_where(
                &junction.schema.tables.main.name,
                &Filter::Eq(source_field.clone(), id.clone()),
            )?;
        }
        Ok(())
    }

    /// Deletes a record; soft-delete collections mark it instead.
    ///
    /// # Returns
    /// The record as it was before the delete.
    pub fn delete(&self, ctx: &RequestContext, id: &Value) -> Result<Record> {
        let definition = &self.runtime.definition;
        let access = definition
            .access
            .write_filter(self.name(), AccessOperation::Delete, ctx)?;
        let original = self.in_transaction("delete", |tx| {
            let original = self
                .load(&*tx, ctx, id, false)?
                .filter(|record| access.matches(record))
                .ok_or_else(|| RepoError::not_found(self.name(), id))?;
            definition.hooks.run_before_change(&mut BeforeChange {
                collection: self.name(),
                operation: ChangeOperation::Delete,
                context: ctx,
                data: &mut Record::new(),
                original: Some(&original),
            })?;
            self.append_version(tx, ctx, id, ChangeOperation::Delete, None)?;
            if definition.options.soft_delete {
                let mut patch = Row::new();
                patch.insert(DELETED_AT.into(), now());
                tx.update_where(self.main_table(), &self.key_filter(id), &patch)?;
            } else {
                self.delete_junction_rows(tx, id)?;
                tx.delete_where(self.main_table(), &self.key_filter(id))?;
            }
            definition.hooks.run_after_change(&AfterChange {
                collection: self.name(),
                operation: ChangeOperation::Delete,
                context: ctx,
                record: &original,
                original: Some(&original),
            })?;
            Ok(original)
        })?;
        tracing::debug!(
            collection = self.name(),
            id = %super::key_of(id),
            soft = definition.options.soft_delete,
            "deleted record"
        );
        Ok(self.strip(original, ctx))
    }

    /// Clears `deletedAt` on a soft-deleted record.
    pub fn restore(&self, ctx: &RequestContext, id: &Value) -> Result<Record> {
        let definition = &self.runtime.definition;
        if !definition.options.soft_delete {
            return Err(RepoError::validation(
                self.name(),
                DELETED_AT,
                "collection does not use soft delete",
            ));
        }
        let access = definition
            .access
            .write_filter(self.name(), AccessOperation::Update, ctx)?;
        let record = self.in_transaction("restore", |tx| {
            let original = self
                .load(&*tx, ctx, id, true)?
                .filter(|record| access.matches(record))
                .ok_or_else(|| RepoError::not_found(self.name(), id))?;
            if original.get(DELETED_AT).map_or(true, Value::is_null) {
                return Err(RepoError::validation(
                    self.name(),
                    DELETED_AT,
                    "record is not deleted",
                ));
            }
            definition.hooks.run_before_change(&mut BeforeChange {
                collection: self.name(),
                operation: ChangeOperation::Restore,
                context: ctx,
                data: &mut Record::new(),
                original: Some(&original),
            })?;
            let mut patch = Row::new();
            patch.insert(DELETED_AT.into(), Value::Null);
            if definition.options.timestamps {
                patch.insert(UPDATED_AT.into(), now());
            }
            tx.update_where(self.main_table(), &self.key_filter(id), &patch)?;
            self.append_version(tx, ctx, id, ChangeOperation::Restore, None)?;
            let record = self
                .load(&*tx, ctx, id, false)?
                .ok_or_else(|| RepoError::not_found(self.name(), id))?;
            definition.hooks.run_after_change(&AfterChange {
                collection: self.name(),
                operation: ChangeOperation::Restore,
                context: ctx,
                record: &record,
                original: Some(&original),
            })?;
            Ok(record)
        })?;
        self.finish(record, ctx)
    }
}
