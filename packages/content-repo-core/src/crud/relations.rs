//! Relation mutation syntax.
//!
//! A relation field accepts a bare value or a mutation object:
//! - scalar id: connect
//! - array (to-many): set
//! - null: clear the relation
//! - `{"connect" | "create" | "connectOrCreate" | "disconnect" | "set": ...}`
//!
//! `disconnect` and `set` only apply to to-many relations. Relations stored
//! on this table are resolved before the Main row is written, relations
//! stored elsewhere after it.

use serde_json::{Map, Value};

use super::options::FindOptions;
use super::{now, Collection};
use crate::access::RequestContext;
use crate::error::{RepoError, Result};
use crate::registry::CollectionRuntime;
use crate::relation::{RelationConfig, RelationKind};
use crate::schema::columns::{CREATED_AT, DELETED_AT, UPDATED_AT};
use crate::store::{values_equal, Filter, Row, StoreRead, Transaction};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RelationMutation {
    Connect(Vec<Value>),
    /// Nested payloads created in the target collection
    Create(Vec<Value>),
    /// `{where, create}` items
    ConnectOrCreate(Vec<Value>),
    Disconnect(Vec<Value>),
    Set(Vec<Value>),
    Clear,
}

const MUTATION_KEYS: &[&str] = &["connect", "create", "connectOrCreate", "disconnect", "set"];

/// Parses the value written to a relation field.
pub(crate) fn parse_mutations(
    collection: &str,
    relation: &RelationConfig,
    value: &Value,
) -> Result<Vec<RelationMutation>> {
    let to_many = relation.kind.is_to_many();
    let invalid = |message: String| RepoError::validation(collection, relation.field.as_str(), message);
    match value {
        Value::Null if to_many => Ok(vec![RelationMutation::Set(Vec::new())]),
        Value::Null => Ok(vec![RelationMutation::Clear]),
        Value::Array(items) if to_many => Ok(vec![RelationMutation::Set(items.clone())]),
        Value::Array(_) => Err(invalid("expects a single target".into())),
        Value::Object(map) if map.keys().any(|k| MUTATION_KEYS.contains(&k.as_str())) => {
            let mut mutations = Vec::with_capacity(map.len());
            for (key, operand) in map {
                let items = match operand {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                if !to_many && items.len() > 1 {
                    return Err(invalid(format!("'{key}' expects a single target")));
                }
                let mutation = match key.as_str() {
                    "connect" => RelationMutation::Connect(items),
                    "create" => RelationMutation::Create(items),
                    "connectOrCreate" => RelationMutation::ConnectOrCreate(items),
                    "disconnect" | "set" if !to_many => {
                        return Err(invalid(format!(
                            "'{key}' is only valid on to-many relations"
                        )))
                    }
                    "disconnect" => RelationMutation::Disconnect(items),
                    "set" => RelationMutation::Set(items),
                    other => return Err(invalid(format!("unknown relation operation '{other}'"))),
                };
                mutations.push(mutation);
            }
            Ok(mutations)
        }
        other => Ok(vec![RelationMutation::Connect(vec![other.clone()])]),
    }
}

fn contains(ids: &[Value], id: &Value) -> bool {
    ids.iter().any(|candidate| values_equal(candidate, id))
}

/// `id` as stored in the foreign key column of another collection.
pub(crate) fn remote_key(target: &CollectionRuntime, foreign_key: &str, id: &Value) -> Value {
    match target.schema.tables.main.get_column(foreign_key) {
        Some(column) => column.column_type.coerce_key(id),
        None => id.clone(),
    }
}

impl<'r> Collection<'r> {
    fn relation_error(&self, relation: &RelationConfig, message: impl Into<String>) -> RepoError {
        RepoError::validation(self.name(), relation.field.as_str(), message)
    }

    /// Fails unless `id` is a live record of `target`.
    fn ensure_target<R: StoreRead>(
        &self,
        reader: &R,
        relation: &RelationConfig,
        target: &str,
        id: &Value,
    ) -> Result<()> {
        let runtime = self.repo.runtime(target)?;
        let filter = Filter::and(vec![
            Filter::Eq(runtime.schema.primary_key.clone(), id.clone()),
            if runtime.definition.options.soft_delete {
                Filter::IsNull(DELETED_AT.into())
            } else {
                Filter::All
            },
        ]);
        if reader.count(&runtime.schema.tables.main.name, &filter)? == 0 {
            return Err(self.relation_error(
                relation,
                format!("target '{}' not found in '{}'", super::key_of(id), target),
            ));
        }
        Ok(())
    }

    /// Target ids produced by a connect, create or connectOrCreate.
    fn target_ids(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        relation: &RelationConfig,
        target: &str,
        mutation: RelationMutation,
    ) -> Result<Vec<Value>> {
        let target_collection = self.repo.any_collection(target)?;
        let key = &target_collection.runtime.schema.primary_key;
        let mut ids = Vec::new();
        match mutation {
            RelationMutation::Connect(items) => {
                for id in items {
                    self.ensure_target(&*tx, relation, target, &id)?;
                    ids.push(id);
                }
            }
            RelationMutation::Create(payloads) => {
                for payload in payloads {
                    let record = target_collection.create_in(tx, ctx, payload)?;
                    ids.push(record.get(key).cloned().unwrap_or(Value::Null));
                }
            }
            RelationMutation::ConnectOrCreate(items) => {
                for item in items {
                    let (Some(clause), Some(payload)) = (item.get("where"), item.get("create")) else {
                        return Err(self.relation_error(
                            relation,
                            "connectOrCreate expects {\"where\", \"create\"}",
                        ));
                    };
                    let options = FindOptions::new().filter(clause.clone());
                    let existing = target_collection
                        .collect_records(&*tx, ctx, &options, None)?
                        .into_iter()
                        .next()
                        .and_then(|r| r.get(key).cloned());
                    let id = match existing {
                        Some(id) => id,
                        None => {
                            let record = target_collection.create_in(tx, ctx, payload.clone())?;
                            record.get(key).cloned().unwrap_or(Value::Null)
                        }
                    };
                    ids.push(id);
                }
            }
            RelationMutation::Disconnect(_) | RelationMutation::Set(_) | RelationMutation::Clear => {}
        }
        Ok(ids)
    }

    /// Resolves a morphTo pair `{type, id}`; creates use `{type, data}`.
    fn morph_target(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        relation: &RelationConfig,
        mutation: RelationMutation,
    ) -> Result<(Value, Value)> {
        let (item, creating) = match mutation {
            RelationMutation::Clear => return Ok((Value::Null, Value::Null)),
            RelationMutation::Connect(items) => (items.into_iter().next(), false),
            RelationMutation::Create(items) => (items.into_iter().next(), true),
            _ => {
                return Err(self.relation_error(
                    relation,
                    "polymorphic relations accept connect or create",
                ))
            }
        };
        let item = item.unwrap_or(Value::Null);
        let Some(tag) = item.get("type").and_then(Value::as_str) else {
            return Err(self.relation_error(relation, "expects {\"type\", \"id\"}"));
        };
        let Some(target) = relation.targets.get(tag) else {
            return Err(self.relation_error(relation, format!("unknown type '{tag}'")));
        };
        let id = if creating {
            let payload = item.get("data").cloned().unwrap_or(Value::Object(Map::new()));
            let mut ids = self.target_ids(tx, ctx, relation, target, RelationMutation::Create(vec![payload]))?;
            ids.pop().unwrap_or(Value::Null)
        } else {
            let id = item.get("id").cloned().unwrap_or(Value::Null);
            self.ensure_target(&*tx, relation, target, &id)?;
            id
        };
        // mixed-key targets share a text id column
        let id = match relation.fields.get(1).and_then(|c| self.runtime.schema.tables.main.get_column(c)) {
            Some(column) => column.column_type.coerce_key(&id),
            None => id,
        };
        Ok((Value::String(tag.to_string()), id))
    }

    /// Column values of a relation stored on this table.
    ///
    /// # Arguments
    /// * `original` - Current Main row on update, consulted by `multiple`
    pub(crate) fn local_relation_columns(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        relation: &RelationConfig,
        value: &Value,
        original: Option<&Row>,
    ) -> Result<Vec<(String, Value)>> {
        let mutations = parse_mutations(self.name(), relation, value)?;
        let column = |idx: usize| relation.fields.get(idx).cloned().unwrap_or_default();
        match relation.kind {
            RelationKind::BelongsTo => {
                let target = relation.target_collection.clone().unwrap_or_default();
                let mut resolved = Value::Null;
                for mutation in mutations {
                    if mutation == RelationMutation::Clear {
                        resolved = Value::Null;
                        continue;
                    }
                    if let Some(id) = self.target_ids(tx, ctx, relation, &target, mutation)?.pop() {
                        resolved = id;
                    }
                }
                Ok(vec![(column(0), resolved)])
            }
            RelationKind::MorphTo => {
                let mut pair = (Value::Null, Value::Null);
                for mutation in mutations {
                    pair = self.morph_target(tx, ctx, relation, mutation)?;
                }
                Ok(vec![(column(0), pair.0), (column(1), pair.1)])
            }
            RelationKind::Multiple => {
                let target = relation.target_collection.clone().unwrap_or_default();
                let mut ids: Vec<Value> = original
                    .and_then(|row| row.get(&column(0)))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for mutation in mutations {
                    match mutation {
                        RelationMutation::Clear => ids.clear(),
                        RelationMutation::Disconnect(items) => {
                            ids.retain(|id| !contains(&items, id));
                        }
                        RelationMutation::Set(items) => {
                            ids = self.target_ids(tx, ctx, relation, &target, RelationMutation::Connect(items))?;
                        }
                        other => {
                            for id in self.target_ids(tx, ctx, relation, &target, other)? {
                                if !contains(&ids, &id) {
                                    ids.push(id);
                                }
                            }
                        }
                    }
                }
                Ok(vec![(column(0), Value::Array(ids))])
            }
            RelationKind::HasMany | RelationKind::ManyToMany | RelationKind::MorphMany => Ok(Vec::new()),
        }
    }

    /// Applies mutations of a relation stored on another table.
    pub(crate) fn apply_remote_relation(
        &self,
        tx: &mut Transaction<'r>,
        ctx: &RequestContext,
        relation: &RelationConfig,
        id: &Value,
        value: &Value,
    ) -> Result<()> {
        let mutations = parse_mutations(self.name(), relation, value)?;
        let target = relation.target_collection.clone().unwrap_or_default();
        for mutation in mutations {
            match mutation {
                RelationMutation::Set(items) => {
                    let wanted =
                        self.target_ids(tx, ctx, relation, &target, RelationMutation::Connect(items))?;
                    let stale: Vec<Value> = self
                        .related_ids(&*tx, relation, id)?
                        .into_iter()
                        .filter(|current| !contains(&wanted, current))
                        .collect();
                    self.unlink(tx, relation, id, &stale)?;
                    self.link(tx, relation, id, &wanted)?;
                }
                RelationMutation::Disconnect(items) => self.unlink(tx, relation, id, &items)?,
                RelationMutation::Clear => {
                    let current = self.related_ids(&*tx, relation, id)?;
                    self.unlink(tx, relation, id, &current)?;
                }
                other => {
                    let ids = self.target_ids(tx, ctx, relation, &target, other)?;
                    self.link(tx, relation, id, &ids)?;
                }
            }
        }
        Ok(())
    }

    fn link(
        &self,
        tx: &mut Transaction<'r>,
        relation: &RelationConfig,
        id: &Value,
        targets: &[Value],
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let target = self
            .repo
            .runtime(relation.target_collection.as_deref().unwrap_or_default())?;
        match relation.kind {
            RelationKind::HasMany | RelationKind::MorphMany => {
                let mut patch = Row::new();
                if let Some(foreign_key) = &relation.foreign_key {
                    patch.insert(foreign_key.clone(), remote_key(target, foreign_key, id));
                }
                if let (Some(column), Some(tag)) = (&relation.morph_type_column, &relation.morph_type) {
                    patch.insert(column.clone(), Value::String(tag.clone()));
                }
                let filter = Filter::In(target.schema.primary_key.clone(), targets.to_vec());
                tx.update_where(&target.schema.tables.main.name, &filter, &patch)?;
            }
            RelationKind::ManyToMany => {
                let junction = self
                    .repo
                    .runtime(relation.through.as_deref().unwrap_or_default())?;
                let (Some(source_field), Some(target_field)) =
                    (&relation.source_field, &relation.target_field)
                else {
                    return Ok(());
                };
                let current = self.related_ids(&*tx, relation, id)?;
                for target_id in targets.iter().filter(|t| !contains(&current, t)) {
                    let mut row = Row::new();
                    row.insert(source_field.clone(), id.clone());
                    row.insert(target_field.clone(), target_id.clone());
                    if junction.definition.options.timestamps {
                        let stamp = now();
                        row.insert(CREATED_AT.into(), stamp.clone());
                        row.insert(UPDATED_AT.into(), stamp);
                    }
                    tx.insert(&junction.schema.tables.main.name, row)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn unlink(
        &self,
        tx: &mut Transaction<'r>,
        relation: &RelationConfig,
        id: &Value,
        targets: &[Value],
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let target = self
            .repo
            .runtime(relation.target_collection.as_deref().unwrap_or_default())?;
        match relation.kind {
            RelationKind::HasMany | RelationKind::MorphMany => {
                let Some(foreign_key) = &relation.foreign_key else {
                    return Ok(());
                };
                let mut conditions = vec![
                    Filter::In(target.schema.primary_key.clone(), targets.to_vec()),
                    Filter::Eq(foreign_key.clone(), remote_key(target, foreign_key, id)),
                ];
                let mut patch = Row::new();
                patch.insert(foreign_key.clone(), Value::Null);
                if let (Some(column), Some(tag)) = (&relation.morph_type_column, &relation.morph_type) {
                    conditions.push(Filter::Eq(column.clone(), Value::String(tag.clone())));
                    patch.insert(column.clone(), Value::Null);
                }
                tx.update_where(&target.schema.tables.main.name, &Filter::and(conditions), &patch)?;
            }
            RelationKind::ManyToMany => {
                let junction = self
                    .repo
                    .runtime(relation.through.as_deref().unwrap_or_default())?;
                let (Some(source_field), Some(target_field)) =
                    (&relation.source_field, &relation.target_field)
                else {
                    return Ok(());
                };
                let filter = Filter::and(vec![
                    Filter::Eq(source_field.clone(), id.clone()),
                    Filter::In(target_field.clone(), targets.to_vec()),
                ]);
                tx.delete_where(&junction.schema.tables.main.name, &filter)?;
            }
            _ => {}
        }
        Ok(())
    }
}
