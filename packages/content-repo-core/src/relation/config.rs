//! Resolved relation configuration.

use indexmap::IndexMap;
use serde::Serialize;

use crate::store::{ColumnType, ReferentialAction};

/// Concrete relation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsTo,
    HasMany,
    ManyToMany,
    Multiple,
    MorphTo,
    MorphMany,
}

/// Storage cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
    One,
    Many,
    ManyToMany,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "belongsTo",
            RelationKind::HasMany => "hasMany",
            RelationKind::ManyToMany => "manyToMany",
            RelationKind::Multiple => "multiple",
            RelationKind::MorphTo => "morphTo",
            RelationKind::MorphMany => "morphMany",
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            RelationKind::BelongsTo | RelationKind::MorphTo => Cardinality::One,
            RelationKind::HasMany | RelationKind::Multiple | RelationKind::MorphMany => {
                Cardinality::Many
            }
            RelationKind::ManyToMany => Cardinality::ManyToMany,
        }
    }

    /// Returns true if the relation holds a list of targets.
    pub fn is_to_many(&self) -> bool {
        self.cardinality() != Cardinality::One
    }

    /// Returns true if the relation stores columns on this table.
    pub fn has_local_columns(&self) -> bool {
        matches!(
            self,
            RelationKind::BelongsTo | RelationKind::MorphTo | RelationKind::Multiple
        )
    }
}

/// Relation materialized at registry build time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationConfig {
    /// Field on the owning collection
    pub field: String,
    pub kind: RelationKind,
    /// Target collection; `None` for morphTo
    pub target_collection: Option<String>,
    /// Discriminator to collection (morphTo targets, or the single morphMany tag)
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub targets: IndexMap<String, String>,
    /// Target key column; always the target's primary key
    pub references: Option<String>,
    /// This-side columns, in order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Type of this-side id columns, cloned from the target key
    pub key_type: ColumnType,
    /// Column on the target pointing back here (hasMany, morphMany id column)
    pub foreign_key: Option<String>,
    /// Discriminator column on the target (morphMany)
    pub morph_type_column: Option<String>,
    /// Discriminator value identifying this collection (morphMany)
    pub morph_type: Option<String>,
    pub through: Option<String>,
    pub source_field: Option<String>,
    pub target_field: Option<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    pub relation_name: Option<String>,
    /// Whether a store-level foreign key backs the relation
    pub constrained: bool,
}

impl RelationConfig {
    pub fn cardinality(&self) -> Cardinality {
        self.kind.cardinality()
    }

    /// Collections this relation can point at.
    pub fn target_collections(&self) -> Vec<&str> {
        match (&self.target_collection, self.kind) {
            (_, RelationKind::MorphTo) => self.targets.values().map(|s| s.as_str()).collect(),
            (Some(target), _) => vec![target.as_str()],
            (None, _) => Vec::new(),
        }
    }

    /// Discriminator under which `collection` is stored by a morphTo.
    pub fn tag_for(&self, collection: &str) -> Option<&str> {
        self.targets
            .iter()
            .find(|(_, c)| c.as_str() == collection)
            .map(|(tag, _)| tag.as_str())
    }
}
