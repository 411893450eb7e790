//! Relation resolution.
//!
//! Relation targets are stored unevaluated on their fields. Once every
//! collection is registered, one pass over the registry evaluates each target
//! and materializes a `RelationConfig`. Nothing is resolved recursively, so
//! forward and circular references need no special handling.

use indexmap::IndexMap;

use super::config::{RelationConfig, RelationKind};
use super::options::{RelationOptions, RelationTarget};
use crate::error::{RepoError, Result};
use crate::schema::{CollectionDefinition, LocalizationMode};
use crate::store::{Column, ColumnType, ReferentialAction};

/// Infers the relation kind from declared options.
pub fn infer_kind(options: &RelationOptions) -> RelationKind {
    let polymorphic = options.target.is_polymorphic();
    if polymorphic && options.has_many && options.morph_name.is_some() {
        RelationKind::MorphMany
    } else if polymorphic {
        RelationKind::MorphTo
    } else if options.multiple {
        RelationKind::Multiple
    } else if options.has_many && options.through.is_some() {
        RelationKind::ManyToMany
    } else if options.has_many {
        RelationKind::HasMany
    } else {
        RelationKind::BelongsTo
    }
}

/// This-side column names of a relation field.
pub(crate) fn local_columns(field: &str, kind: RelationKind) -> Vec<String> {
    match kind {
        RelationKind::BelongsTo => vec![format!("{field}Id")],
        RelationKind::MorphTo => vec![format!("{field}Type"), format!("{field}Id")],
        RelationKind::Multiple => vec![field.to_string()],
        RelationKind::HasMany | RelationKind::ManyToMany | RelationKind::MorphMany => Vec::new(),
    }
}

/// Main-table column names a collection will have, known before any type is.
fn planned_columns(collection: &CollectionDefinition, key: &Column) -> Vec<String> {
    let mut columns = vec![key.name.clone()];
    for field in &collection.fields {
        if field.is_virtual() || field.primary_key {
            continue;
        }
        if let Some(options) = &field.relation {
            columns.extend(local_columns(&field.name, infer_kind(options)));
        } else if !field.localized || field.localization == LocalizationMode::Nested {
            columns.push(field.name.clone());
        }
    }
    columns
}

struct Resolver<'a> {
    collections: &'a IndexMap<String, CollectionDefinition>,
    keys: &'a IndexMap<String, Column>,
}

impl Resolver<'_> {
    fn unresolved(&self, collection: &str, field: &str, message: impl Into<String>) -> RepoError {
        RepoError::UnresolvedRelation {
            collection: collection.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn key(&self, collection: &str, field: &str, target: &str) -> Result<&Column> {
        self.keys
            .get(target)
            .ok_or_else(|| self.unresolved(collection, field, format!("collection '{target}' is not registered")))
    }

    fn target_name(&self, collection: &str, field: &str, target: &RelationTarget) -> Result<String> {
        let name = match target {
            RelationTarget::Name(name) => name.clone(),
            RelationTarget::Accessor(accessor) => accessor()
                .ok_or_else(|| self.unresolved(collection, field, "target accessor returned no collection"))?,
            RelationTarget::Polymorphic(_) => {
                return Err(self.unresolved(collection, field, "polymorphic target where one collection is expected"))
            }
        };
        self.key(collection, field, &name)?;
        Ok(name)
    }

    fn require_column(
        &self,
        collection: &str,
        field: &str,
        owner: &str,
        column: &str,
    ) -> Result<()> {
        let owner_def = &self.collections[owner];
        let key = self.key(collection, field, owner)?;
        if planned_columns(owner_def, key).iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(self.unresolved(
                collection,
                field,
                format!("column '{column}' does not exist on '{owner}'"),
            ))
        }
    }

    fn resolve(
        &self,
        position: usize,
        collection: &CollectionDefinition,
        field_name: &str,
        nullable: bool,
        options: &RelationOptions,
    ) -> Result<RelationConfig> {
        let this = collection.name.as_str();
        let kind = infer_kind(options);
        let mut config = RelationConfig {
            field: field_name.to_string(),
            kind,
            target_collection: None,
            targets: IndexMap::new(),
            references: None,
            fields: local_columns(field_name, kind),
            key_type: ColumnType::Text,
            foreign_key: None,
            morph_type_column: None,
            morph_type: None,
            through: None,
            source_field: None,
            target_field: None,
            on_delete: options.on_delete.unwrap_or(if nullable {
                ReferentialAction::SetNull
            } else {
                ReferentialAction::Restrict
            }),
            on_update: options.on_update.unwrap_or(ReferentialAction::Cascade),
            relation_name: options.relation_name.clone(),
            constrained: false,
        };

        match kind {
            RelationKind::MorphTo => {
                let RelationTarget::Polymorphic(targets) = &options.target else {
                    return Err(self.unresolved(this, field_name, "morphTo needs a polymorphic target"));
                };
                if targets.is_empty() {
                    return Err(self.unresolved(this, field_name, "polymorphic target map is empty"));
                }
                let mut key_types = Vec::new();
                for target in targets.values() {
                    key_types.push(self.key(this, field_name, target)?.column_type);
                }
                key_types.dedup();
                config.key_type = match key_types.as_slice() {
                    [shared] => *shared,
                    _ => ColumnType::Text,
                };
                config.targets = targets.clone();
            }
            RelationKind::MorphMany => {
                let RelationTarget::Polymorphic(targets) = &options.target else {
                    return Err(self.unresolved(this, field_name, "morphMany needs a polymorphic target"));
                };
                let mut entries = targets.iter();
                let (Some((tag, target)), None) = (entries.next(), entries.next()) else {
                    return Err(self.unresolved(
                        this,
                        field_name,
                        "morphMany target must map exactly one type tag to one collection",
                    ));
                };
                let key = self.key(this, field_name, target)?;
                let morph_name = options.morph_name.clone().unwrap_or_default();
                let morph_field = self.collections[target.as_str()]
                    .get_field(&morph_name)
                    .and_then(|f| f.relation.as_ref());
                let points_back = match morph_field {
                    Some(morph) if infer_kind(morph) == RelationKind::MorphTo => match &morph.target {
                        RelationTarget::Polymorphic(map) => map.get(tag).is_some_and(|c| c == this),
                        _ => false,
                    },
                    _ => false,
                };
                if !points_back {
                    return Err(self.unresolved(
                        this,
                        field_name,
                        format!("'{target}.{morph_name}' is not a morphTo mapping '{tag}' to '{this}'"),
                    ));
                }
                config.target_collection = Some(target.clone());
                config.targets.insert(tag.clone(), target.clone());
                config.references = Some(key.name.clone());
                config.key_type = key.column_type;
                config.foreign_key = Some(format!("{morph_name}Id"));
                config.morph_type_column = Some(format!("{morph_name}Type"));
                config.morph_type = Some(tag.clone());
            }
            RelationKind::BelongsTo | RelationKind::Multiple => {
                let target = self.target_name(this, field_name, &options.target)?;
                let key = self.key(this, field_name, &target)?;
                config.references = Some(key.name.clone());
                config.key_type = key.column_type;
                config.constrained = kind == RelationKind::BelongsTo
                    && self
                        .collections
                        .get_index_of(&target)
                        .is_some_and(|target_position| target_position <= position);
                config.target_collection = Some(target);
            }
            RelationKind::HasMany => {
                let target = self.target_name(this, field_name, &options.target)?;
                let foreign_key = options.foreign_key.clone().ok_or_else(|| {
                    self.unresolved(this, field_name, "hasMany requires a foreign key on the target")
                })?;
                self.require_column(this, field_name, &target, &foreign_key)?;
                let key = self.key(this, field_name, &target)?;
                config.references = Some(key.name.clone());
                config.key_type = key.column_type;
                config.foreign_key = Some(foreign_key);
                config.target_collection = Some(target);
            }
            RelationKind::ManyToMany => {
                let target = self.target_name(this, field_name, &options.target)?;
                let through = options.through.clone().unwrap_or_default();
                self.key(this, field_name, &through)?;
                let source_field = options
                    .source_field
                    .clone()
                    .unwrap_or_else(|| format!("{this}Id"));
                let target_field = options
                    .target_field
                    .clone()
                    .unwrap_or_else(|| format!("{target}Id"));
                self.require_column(this, field_name, &through, &source_field)?;
                self.require_column(this, field_name, &through, &target_field)?;
                let key = self.key(this, field_name, &target)?;
                config.references = Some(key.name.clone());
                config.key_type = key.column_type;
                config.through = Some(through);
                config.source_field = Some(source_field);
                config.target_field = Some(target_field);
                config.target_collection = Some(target);
            }
        }

        tracing::debug!(
            collection = this,
            field = field_name,
            kind = kind.as_str(),
            target = ?config.target_collections(),
            constrained = config.constrained,
            "resolved relation"
        );
        Ok(config)
    }
}

/// Materializes every relation of every registered collection.
///
/// # Arguments
/// * `collections` - All collections, in registration order
/// * `keys` - Primary key column in effect for each collection
///
/// # Returns
/// Relations per collection, keyed by field name in declaration order.
pub fn resolve_relations(
    collections: &IndexMap<String, CollectionDefinition>,
    keys: &IndexMap<String, Column>,
) -> Result<IndexMap<String, IndexMap<String, RelationConfig>>> {
    let resolver = Resolver { collections, keys };
    let mut resolved = IndexMap::with_capacity(collections.len());
    for (position, collection) in collections.values().enumerate() {
        let mut relations = IndexMap::new();
        for field in &collection.fields {
            if let Some(options) = &field.relation {
                let config = resolver.resolve(position, collection, &field.name, field.nullable, options)?;
                relations.insert(field.name.clone(), config);
            }
        }
        resolved.insert(collection.name.clone(), relations);
    }
    Ok(resolved)
}
