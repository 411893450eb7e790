//! Record assembly and the read pipeline.
//!
//! A record is assembled from its Main row, its I18n rows and the tables of
//! its remote relations. Localized values coalesce the request locale with
//! the default locale unless fallback is disabled for the request.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use super::options::FindOptions;
use super::relations::remote_key;
use super::where_clause::WhereParser;
use super::{key_of, Collection};
use crate::access::{AccessDecision, AccessOperation, RequestContext};
use crate::config::{FallbackStrategy, RepoConfig};
use crate::error::{RepoError, Result};
use crate::relation::{RelationConfig, RelationKind};
use crate::schema::columns::{
    CREATED_AT, DELETED_AT, LOCALE, LOCALIZED_BLOB, PARENT_ID, UPDATED_AT, VERSION_NUMBER,
    VERSION_PARENT, VERSION_STAGE,
};
use crate::schema::{FieldDefinition, FieldStorage, DRAFT_STAGE};
use crate::store::{sort_rows, values_equal, Filter, Row, StoreRead};
use crate::upload::UploadValue;
use crate::Record;

/// Locales a request reads localized values in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocaleScope {
    pub(crate) locale: String,
    pub(crate) default_locale: String,
    pub(crate) fallback: bool,
}

impl LocaleScope {
    pub(crate) fn new(config: &RepoConfig, ctx: &RequestContext) -> Self {
        Self {
            locale: ctx
                .locale
                .clone()
                .unwrap_or_else(|| config.default_locale.clone()),
            default_locale: config.default_locale.clone(),
            fallback: ctx.fallback_locale,
        }
    }

    fn falls_back(&self) -> bool {
        self.fallback && self.locale != self.default_locale
    }

    pub(crate) fn is_default(&self) -> bool {
        self.locale == self.default_locale
    }
}

/// I18n rows visible to one read, indexed the way the fallback strategy
/// consumes them.
pub(crate) enum LocalizedRows<'a> {
    Empty,
    /// The I18n table joined twice, once per locale alias
    Joined {
        current: HashMap<String, &'a Row>,
        default: HashMap<String, &'a Row>,
    },
    /// Rows searched separately for every localized value
    Scan(Vec<&'a Row>),
}

impl<'a> LocalizedRows<'a> {
    pub(crate) fn build(
        strategy: FallbackStrategy,
        rows: impl IntoIterator<Item = &'a Row>,
        scope: &LocaleScope,
    ) -> Self {
        match strategy {
            FallbackStrategy::AliasedJoin => {
                let mut current = HashMap::new();
                let mut default = HashMap::new();
                for row in rows {
                    let parent = key_of(row.get(PARENT_ID).unwrap_or(&Value::Null));
                    match row.get(LOCALE).and_then(Value::as_str) {
                        Some(locale) if locale == scope.locale => {
                            current.insert(parent, row);
                        }
                        Some(locale) if locale == scope.default_locale && scope.falls_back() => {
                            default.insert(parent, row);
                        }
                        _ => {}
                    }
                }
                LocalizedRows::Joined { current, default }
            }
            FallbackStrategy::Subquery => LocalizedRows::Scan(rows.into_iter().collect()),
        }
    }

    fn row(&self, parent: &Value, locale: &str, alias_default: bool) -> Option<&'a Row> {
        match self {
            LocalizedRows::Empty => None,
            LocalizedRows::Joined { current, default } => {
                let alias = if alias_default { default } else { current };
                alias.get(&key_of(parent)).copied()
            }
            LocalizedRows::Scan(rows) => rows
                .iter()
                .find(|row| {
                    row.get(PARENT_ID).is_some_and(|p| values_equal(p, parent))
                        && row.get(LOCALE).and_then(Value::as_str) == Some(locale)
                })
                .copied(),
        }
    }

    /// `COALESCE(value@locale, value@default)` for one column.
    pub(crate) fn value(&self, parent: &Value, column: &str, scope: &LocaleScope) -> Value {
        let non_null = |row: Option<&'a Row>| {
            row.and_then(|r| r.get(column))
                .filter(|v| !v.is_null())
                .cloned()
        };
        if let Some(value) = non_null(self.row(parent, &scope.locale, false)) {
            return value;
        }
        if scope.falls_back() {
            if let Some(value) = non_null(self.row(parent, &scope.default_locale, true)) {
                return value;
            }
        }
        Value::Null
    }

    /// Nested-mode override fragment of `field` in the request locale.
    pub(crate) fn fragment(&self, parent: &Value, field: &str, scope: &LocaleScope) -> Option<Value> {
        self.row(parent, &scope.locale, false)
            .and_then(|row| row.get(LOCALIZED_BLOB))
            .and_then(|blob| blob.get(field))
            .filter(|v| !v.is_null())
            .cloned()
    }
}

/// Merges `patch` into `base`; objects merge key by key, anything else replaces.
pub(crate) fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

fn is_live(row: &Row) -> bool {
    row.get(DELETED_AT).map_or(true, Value::is_null)
}

/// Record value of a relation stored on this table.
fn local_relation_value(relation: &RelationConfig, columns: &[String], row: &Row) -> Value {
    let column = |idx: usize| {
        columns
            .get(idx)
            .and_then(|c| row.get(c))
            .cloned()
            .unwrap_or(Value::Null)
    };
    match relation.kind {
        RelationKind::MorphTo => {
            let (tag, id) = (column(0), column(1));
            if tag.is_null() || id.is_null() {
                Value::Null
            } else {
                let mut pair = Map::new();
                pair.insert("type".into(), tag);
                pair.insert("id".into(), id);
                Value::Object(pair)
            }
        }
        RelationKind::Multiple => match column(0) {
            Value::Null => Value::Array(Vec::new()),
            ids => ids,
        },
        _ => column(0),
    }
}

impl<'r> Collection<'r> {
    pub(crate) fn localized_rows<'a, R: StoreRead>(
        &self,
        reader: &'a R,
        scope: &LocaleScope,
    ) -> Result<LocalizedRows<'a>> {
        match &self.runtime.schema.tables.i18n {
            Some(table) => Ok(LocalizedRows::build(
                self.repo.config().fallback_strategy,
                reader.rows(&table.name)?,
                scope,
            )),
            None => Ok(LocalizedRows::Empty),
        }
    }

    /// Ids linked through a relation stored on another table.
    pub(crate) fn related_ids<R: StoreRead>(
        &self,
        reader: &R,
        relation: &RelationConfig,
        id: &Value,
    ) -> Result<Vec<Value>> {
        let Some(target) = &relation.target_collection else {
            return Ok(Vec::new());
        };
        let target = self.repo.runtime(target)?;
        let target_key = &target.schema.primary_key;
        let foreign_id = match &relation.foreign_key {
            Some(foreign_key) => remote_key(target, foreign_key, id),
            None => id.clone(),
        };
        let points_here = |row: &Row, column: &Option<String>, key: &Value| {
            column
                .as_ref()
                .and_then(|c| row.get(c))
                .is_some_and(|v| values_equal(v, key))
        };
        let ids = match relation.kind {
            RelationKind::HasMany => reader
                .rows(&target.schema.tables.main.name)?
                .iter()
                .filter(|row| is_live(row) && points_here(row, &relation.foreign_key, &foreign_id))
                .filter_map(|row| row.get(target_key).cloned())
                .collect(),
            RelationKind::MorphMany => {
                let tag = relation.morph_type.as_deref().map(Value::from);
                reader
                    .rows(&target.schema.tables.main.name)?
                    .iter()
                    .filter(|row| {
                        is_live(row)
                            && points_here(row, &relation.foreign_key, &foreign_id)
                            && relation
                                .morph_type_column
                                .as_ref()
                                .and_then(|c| row.get(c))
                                == tag.as_ref()
                    })
                    .filter_map(|row| row.get(target_key).cloned())
                    .collect()
            }
            RelationKind::ManyToMany => {
                let Some(through) = &relation.through else {
                    return Ok(Vec::new());
                };
                let junction = self.repo.runtime(through)?;
                let target_field = relation.target_field.clone().unwrap_or_default();
                reader
                    .rows(&junction.schema.tables.main.name)?
                    .iter()
                    .filter(|row| points_here(row, &relation.source_field, id))
                    .filter_map(|row| row.get(&target_field).cloned())
                    .collect()
            }
            _ => Vec::new(),
        };
        Ok(ids)
    }

    /// Gives a morphTo id the key type of the collection it points at.
    fn typed_morph_key(&self, relation: &RelationConfig, value: Value) -> Value {
        if relation.kind != RelationKind::MorphTo {
            return value;
        }
        let Value::Object(mut pair) = value else {
            return value;
        };
        let target = pair
            .get("type")
            .and_then(Value::as_str)
            .and_then(|tag| relation.targets.get(tag))
            .and_then(|name| self.repo.runtime(name).ok());
        let key = target.zip(pair.get("id")).and_then(|(target, id)| {
            target
                .schema
                .tables
                .main
                .get_column(&target.schema.primary_key)
                .map(|column| column.column_type.coerce_key(id))
        });
        if let Some(key) = key {
            pair.insert("id".into(), key);
        }
        Value::Object(pair)
    }

    fn with_upload_url(&self, field: &FieldDefinition, value: Value) -> Value {
        let Some(storage) = self.repo.storage().filter(|_| field.kind == "upload") else {
            return value;
        };
        let Ok(upload) = serde_json::from_value::<UploadValue>(value.clone()) else {
            return value;
        };
        match (storage.url(&upload.key, upload.visibility), value) {
            (Some(url), Value::Object(mut stored)) => {
                stored.insert("url".into(), Value::String(url));
                Value::Object(stored)
            }
            (_, value) => value,
        }
    }

    /// Assembles the full record of a Main row, before access stripping.
    pub(crate) fn assemble<R: StoreRead>(
        &self,
        reader: &R,
        row: &Row,
        localized: &LocalizedRows<'_>,
        scope: &LocaleScope,
    ) -> Result<Record> {
        let schema = &self.runtime.schema;
        let id = row.get(&schema.primary_key).cloned().unwrap_or(Value::Null);
        let mut record = Record::new();
        record.insert(schema.primary_key.clone(), id.clone());

        let mut computed = Vec::new();
        for field in &self.runtime.definition.fields {
            let Some(storage) = schema.storage.get(&field.name) else {
                continue;
            };
            let value = match storage {
                FieldStorage::Main { columns } => match self.runtime.relations.get(&field.name) {
                    Some(relation) => {
                        self.typed_morph_key(relation, local_relation_value(relation, columns, row))
                    }
                    None => columns
                        .first()
                        .and_then(|c| row.get(c))
                        .cloned()
                        .unwrap_or(Value::Null),
                },
                FieldStorage::Localized { column } => localized.value(&id, column, scope),
                FieldStorage::Nested { column } => {
                    let mut base = row.get(column).cloned().unwrap_or(Value::Null);
                    match localized.fragment(&id, &field.name, scope) {
                        Some(fragment) => deep_merge(&mut base, &fragment),
                        None if !scope.is_default() && !scope.fallback => base = Value::Null,
                        None => {}
                    }
                    base
                }
                FieldStorage::Related => match self.runtime.relations.get(&field.name) {
                    Some(relation) => Value::Array(self.related_ids(reader, relation, &id)?),
                    None => Value::Array(Vec::new()),
                },
                FieldStorage::Computed => {
                    computed.push(field);
                    Value::Null
                }
            };
            record.insert(field.name.clone(), self.with_upload_url(field, value));
        }

        let options = &self.runtime.definition.options;
        if options.timestamps {
            for column in [CREATED_AT, UPDATED_AT] {
                record.insert(column.into(), row.get(column).cloned().unwrap_or(Value::Null));
            }
        }
        if options.soft_delete {
            record.insert(
                DELETED_AT.into(),
                row.get(DELETED_AT).cloned().unwrap_or(Value::Null),
            );
        }

        for field in computed {
            if let Some(compute) = &field.compute {
                let value = (compute.0)(&record);
                record.insert(field.name.clone(), value);
            }
        }
        Ok(record)
    }

    fn assemble_all<R: StoreRead + Sync>(
        &self,
        reader: &R,
        rows: &[Row],
        localized: &LocalizedRows<'_>,
        scope: &LocaleScope,
    ) -> Result<Vec<Record>> {
        #[cfg(feature = "parallel")]
        let records = {
            use rayon::prelude::*;
            rows.par_iter()
                .map(|row| self.assemble(reader, row, localized, scope))
                .collect::<Result<Vec<_>>>()
        };
        #[cfg(not(feature = "parallel"))]
        let records = rows
            .iter()
            .map(|row| self.assemble(reader, row, localized, scope))
            .collect::<Result<Vec<_>>>();
        records
    }

    /// Loads one live record by primary key, unstripped.
    pub(crate) fn load<R: StoreRead>(
        &self,
        reader: &R,
        ctx: &RequestContext,
        id: &Value,
        include_deleted: bool,
    ) -> Result<Option<Record>> {
        let Some(row) = reader.select_one(self.main_table(), &self.key_filter(id))? else {
            return Ok(None);
        };
        if !include_deleted && !is_live(&row) {
            return Ok(None);
        }
        let scope = self.scope(ctx);
        let localized = self.localized_rows(reader, &scope)?;
        self.assemble(reader, &row, &localized, &scope).map(Some)
    }

    /// Removes fields the context may not read.
    pub(crate) fn strip(&self, record: Record, ctx: &RequestContext) -> Record {
        let hidden: HashSet<&str> = self
            .runtime
            .definition
            .fields
            .iter()
            .filter(|f| !f.output || !f.access.read.permits(ctx))
            .map(|f| f.name.as_str())
            .collect();
        if hidden.is_empty() {
            return record;
        }
        record
            .into_iter()
            .filter(|(key, _)| !hidden.contains(key.as_str()))
            .collect()
    }

    /// Strips a record and runs the read hooks.
    pub(crate) fn finish(&self, record: Record, ctx: &RequestContext) -> Result<Record> {
        let mut record = self.strip(record, ctx);
        self.runtime
            .definition
            .hooks
            .run_after_read(self.name(), &mut record, ctx)?;
        Ok(record)
    }

    /// Resolves a stage selector; `None` reads the live record.
    pub(crate) fn read_stage<'s>(&self, stage: Option<&'s str>) -> Result<Option<&'s str>> {
        let Some(stage) = stage else {
            return Ok(None);
        };
        let declared = match self.runtime.definition.options.versioning.workflow() {
            Some(workflow) => workflow.has_stage(stage),
            None => stage == DRAFT_STAGE,
        };
        if !declared {
            return Err(RepoError::UnknownStage {
                collection: self.name().to_string(),
                stage: stage.to_string(),
            });
        }
        Ok((stage != DRAFT_STAGE).then_some(stage))
    }

    /// Latest snapshot tagged with `stage` for every record that has one,
    /// shaped as a Main row, with its version number.
    fn stage_rows<R: StoreRead>(
        &self,
        reader: &R,
        stage: &str,
        keys: Option<&[Value]>,
        include_deleted: bool,
    ) -> Result<Vec<(Row, i64)>> {
        let schema = &self.runtime.schema;
        let Some(versions) = &schema.tables.versions else {
            return Ok(Vec::new());
        };
        let mut latest: HashMap<String, (&Row, i64)> = HashMap::new();
        for row in reader.rows(&versions.name)? {
            if row.get(VERSION_STAGE).and_then(Value::as_str) != Some(stage) {
                continue;
            }
            let number = row.get(VERSION_NUMBER).and_then(Value::as_i64).unwrap_or(0);
            let parent = key_of(row.get(VERSION_PARENT).unwrap_or(&Value::Null));
            match latest.get(&parent) {
                Some((_, seen)) if *seen >= number => {}
                _ => {
                    latest.insert(parent, (row, number));
                }
            }
        }

        let mut rows = Vec::new();
        for live in reader.rows(self.main_table())? {
            if !include_deleted && !is_live(live) {
                continue;
            }
            let id = live.get(&schema.primary_key).cloned().unwrap_or(Value::Null);
            if keys.is_some_and(|keys| !keys.iter().any(|k| values_equal(k, &id))) {
                continue;
            }
            let Some((version, number)) = latest.get(&key_of(&id)) else {
                continue;
            };
            rows.push((self.snapshot_row(version, &id, live.get(DELETED_AT)), *number));
        }
        Ok(rows)
    }

    /// Main-shaped row rebuilt from a Versions row.
    pub(crate) fn snapshot_row(&self, version: &Row, id: &Value, deleted_at: Option<&Value>) -> Row {
        let schema = &self.runtime.schema;
        let mut row = Row::new();
        row.insert(schema.primary_key.clone(), id.clone());
        for column in &schema.snapshot_columns {
            row.insert(
                column.clone(),
                version.get(column).cloned().unwrap_or(Value::Null),
            );
        }
        if let Some(deleted_at) = deleted_at {
            row.insert(DELETED_AT.into(), deleted_at.clone());
        }
        row
    }

    /// Assembles, filters and sorts the records a read selects.
    ///
    /// # Arguments
    /// * `reader` - Snapshot or open transaction
    /// * `ctx` - Request context
    /// * `options` - Filter, ordering, stage and soft-delete options
    /// * `keys` - Restricts the read to these primary keys
    ///
    /// # Returns
    /// Stripped records, unpaginated, without read hooks applied.
    pub(crate) fn collect_records<R: StoreRead + Sync>(
        &self,
        reader: &R,
        ctx: &RequestContext,
        options: &FindOptions,
        keys: Option<&[Value]>,
    ) -> Result<Vec<Record>> {
        let access = match self
            .runtime
            .definition
            .access
            .decide(AccessOperation::Read, ctx)
        {
            AccessDecision::Deny => return Ok(Vec::new()),
            AccessDecision::Allow => Filter::All,
            AccessDecision::Where(filter) => filter,
        };
        let user_filter = match &options.filter {
            Some(clause) => WhereParser::new(self.runtime, self.repo.field_types()).parse(clause)?,
            None => Filter::All,
        };
        let scope = self.scope(ctx);
        let schema = &self.runtime.schema;

        let assembled = match self.read_stage(options.stage.as_deref())? {
            Some(stage) => {
                let staged = self.stage_rows(reader, stage, keys, options.include_deleted)?;
                let selected: HashSet<(String, i64)> = staged
                    .iter()
                    .map(|(row, number)| {
                        let id = row.get(&schema.primary_key).unwrap_or(&Value::Null);
                        (key_of(id), *number)
                    })
                    .collect();
                let localized = match &schema.tables.i18n_versions {
                    Some(table) => LocalizedRows::build(
                        self.repo.config().fallback_strategy,
                        reader.rows(&table.name)?.iter().filter(|row| {
                            let parent = key_of(row.get(PARENT_ID).unwrap_or(&Value::Null));
                            let number = row.get(VERSION_NUMBER).and_then(Value::as_i64).unwrap_or(0);
                            selected.contains(&(parent, number))
                        }),
                        &scope,
                    ),
                    None => LocalizedRows::Empty,
                };
                let rows: Vec<Row> = staged.into_iter().map(|(row, _)| row).collect();
                self.assemble_all(reader, &rows, &localized, &scope)?
            }
            None => {
                let rows: Vec<Row> = reader
                    .rows(self.main_table())?
                    .iter()
                    .filter(|row| options.include_deleted || is_live(row))
                    .filter(|row| match keys {
                        Some(keys) => row
                            .get(&schema.primary_key)
                            .is_some_and(|id| keys.iter().any(|k| values_equal(k, id))),
                        None => true,
                    })
                    .cloned()
                    .collect();
                let localized = self.localized_rows(reader, &scope)?;
                tracing::trace!(
                    collection = self.name(),
                    rows = rows.len(),
                    locale = %scope.locale,
                    fallback = scope.falls_back(),
                    "assembling localized read"
                );
                self.assemble_all(reader, &rows, &localized, &scope)?
            }
        };

        let mut records: Vec<Record> = assembled
            .into_iter()
            .filter(|record| access.matches(record))
            .map(|record| self.strip(record, ctx))
            .filter(|record| user_filter.matches(record))
            .collect();
        sort_rows(&mut records, &options.order_by);
        Ok(records)
    }

    /// Full read: collect, paginate, eager-load and run read hooks.
    pub(crate) fn read_records<R: StoreRead + Sync>(
        &self,
        reader: &R,
        ctx: &RequestContext,
        options: &FindOptions,
        keys: Option<&[Value]>,
    ) -> Result<Vec<Record>> {
        let records = self.collect_records(reader, ctx, options, keys)?;
        let mut records: Vec<Record> = records
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();
        if !options.with.is_empty() {
            self.eager_load(reader, ctx, &mut records, &options.with)?;
        }
        for record in &mut records {
            self.runtime
                .definition
                .hooks
                .run_after_read(self.name(), record, ctx)?;
        }
        Ok(records)
    }

    /// Loads visible records of this collection in the order of `ids`.
    fn load_many<R: StoreRead + Sync>(
        &self,
        reader: &R,
        ctx: &RequestContext,
        ids: &[Value],
    ) -> Result<Vec<Record>> {
        let records = self.read_records(reader, ctx, &FindOptions::default(), Some(ids))?;
        let key = &self.runtime.schema.primary_key;
        let mut by_id: HashMap<String, Record> = records
            .into_iter()
            .map(|r| (key_of(r.get(key).unwrap_or(&Value::Null)), r))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(&key_of(id))).collect())
    }

    fn eager_load<R: StoreRead + Sync>(
        &self,
        reader: &R,
        ctx: &RequestContext,
        records: &mut [Record],
        with: &[String],
    ) -> Result<()> {
        for name in with {
            let relation = self.runtime.relations.get(name).ok_or_else(|| {
                RepoError::validation(self.name(), name.as_str(), "not a relation field")
            })?;
            for record in records.iter_mut() {
                let Some(value) = record.get(name).cloned() else {
                    continue;
                };
                let loaded = match relation.kind {
                    RelationKind::MorphTo => {
                        let tag = value.get("type").and_then(Value::as_str);
                        let target = tag.and_then(|t| relation.targets.get(t));
                        match (target, value.get("id")) {
                            (Some(target), Some(id)) => {
                                let target = self.repo.any_collection(target)?;
                                let loaded = target.load_many(reader, ctx, std::slice::from_ref(id))?;
                                let mut pair = value.as_object().cloned().unwrap_or_default();
                                pair.insert(
                                    "value".into(),
                                    loaded.into_iter().next().map(Value::Object).unwrap_or(Value::Null),
                                );
                                Value::Object(pair)
                            }
                            _ => Value::Null,
                        }
                    }
                    RelationKind::BelongsTo => match &relation.target_collection {
                        Some(target) if !value.is_null() => {
                            let target = self.repo.any_collection(target)?;
                            target
                                .load_many(reader, ctx, std::slice::from_ref(&value))?
                                .into_iter()
                                .next()
                                .map(Value::Object)
                                .unwrap_or(Value::Null)
                        }
                        _ => Value::Null,
                    },
                    _ => {
                        let ids = value.as_array().cloned().unwrap_or_default();
                        match &relation.target_collection {
                            Some(target) => {
                                let target = self.repo.any_collection(target)?;
                                Value::Array(
                                    target
                                        .load_many(reader, ctx, &ids)?
                                        .into_iter()
                                        .map(Value::Object)
                                        .collect(),
                                )
                            }
                            None => Value::Array(Vec::new()),
                        }
                    }
                };
                record.insert(name.clone(), loaded);
            }
        }
        Ok(())
    }

    /// Primary key of the first Main row, used by globals.
    pub(crate) fn singleton_id(&self) -> Result<Option<Value>> {
        let view = self.repo.store().read();
        let id = view
            .rows(self.main_table())?
            .first()
            .and_then(|row| row.get(&self.runtime.schema.primary_key))
            .cloned();
        Ok(id)
    }

    /// Lists records visible to the context.
    pub fn find(&self, ctx: &RequestContext, options: &FindOptions) -> Result<Vec<Record>> {
        let view = self.repo.store().read();
        self.read_records(&view, ctx, options, None)
    }

    /// First record matching the options, or `None`.
    pub fn find_one(&self, ctx: &RequestContext, options: &FindOptions) -> Result<Option<Record>> {
        let mut options = options.clone();
        options.limit = Some(1);
        Ok(self.find(ctx, &options)?.into_iter().next())
    }

    /// Record by primary key, or `None` if it does not exist or is not
    /// visible to the context.
    pub fn find_by_id(
        &self,
        ctx: &RequestContext,
        id: &Value,
        options: &FindOptions,
    ) -> Result<Option<Record>> {
        let view = self.repo.store().read();
        let records = self.read_records(&view, ctx, options, Some(std::slice::from_ref(id)))?;
        Ok(records.into_iter().next())
    }

    /// Counts records matching an optional `where` clause.
    pub fn count(&self, ctx: &RequestContext, filter: Option<&Value>) -> Result<usize> {
        let view = self.repo.store().read();
        let options = FindOptions {
            filter: filter.cloned(),
            ..FindOptions::default()
        };
        Ok(self.collect_records(&view, ctx, &options, None)?.len())
    }
}
