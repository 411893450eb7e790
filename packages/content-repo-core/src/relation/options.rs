//! Declarative relation options, stored unevaluated on the field.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::store::ReferentialAction;

/// Deferred target evaluated once every collection is registered.
pub type TargetFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Declared relation target.
#[derive(Clone)]
pub enum RelationTarget {
    /// Literal collection name
    Name(String),
    /// Zero-argument accessor returning the collection name
    Accessor(TargetFn),
    /// Discriminator value to collection name
    Polymorphic(IndexMap<String, String>),
}

impl RelationTarget {
    pub fn is_polymorphic(&self) -> bool {
        matches!(self, RelationTarget::Polymorphic(_))
    }
}

impl fmt::Debug for RelationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationTarget::Name(name) => write!(f, "Name({name})"),
            RelationTarget::Accessor(_) => write!(f, "Accessor(<fn>)"),
            RelationTarget::Polymorphic(map) => f.debug_tuple("Polymorphic").field(map).finish(),
        }
    }
}

/// Relation metadata as declared on a field.
#[derive(Debug, Clone)]
pub struct RelationOptions {
    pub target: RelationTarget,
    /// To-many relation
    pub has_many: bool,
    /// Inline id array stored on this table
    pub multiple: bool,
    /// Junction collection for many-to-many
    pub through: Option<String>,
    /// Junction column pointing at this collection
    pub source_field: Option<String>,
    /// Junction column pointing at the target
    pub target_field: Option<String>,
    /// Column on the target holding this collection's key (hasMany)
    pub foreign_key: Option<String>,
    /// Name of the polymorphic relation on the target (morphMany)
    pub morph_name: Option<String>,
    /// Disambiguates multiple relations to the same target
    pub relation_name: Option<String>,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
}

impl RelationOptions {
    fn with_target(target: RelationTarget) -> Self {
        Self {
            target,
            has_many: false,
            multiple: false,
            through: None,
            source_field: None,
            target_field: None,
            foreign_key: None,
            morph_name: None,
            relation_name: None,
            on_delete: None,
            on_update: None,
        }
    }

    /// Relation to a collection named literally.
    pub fn to(collection: impl Into<String>) -> Self {
        Self::with_target(RelationTarget::Name(collection.into()))
    }

    /// Relation whose target is produced by an accessor at build time.
    pub fn lazy(accessor: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
        Self::with_target(RelationTarget::Accessor(Arc::new(accessor)))
    }

    /// Polymorphic relation over `(discriminator, collection)` pairs.
    pub fn polymorphic(targets: &[(&str, &str)]) -> Self {
        Self::with_target(RelationTarget::Polymorphic(
            targets
                .iter()
                .map(|(tag, collection)| (tag.to_string(), collection.to_string()))
                .collect(),
        ))
    }

    pub fn has_many(mut self) -> Self {
        self.has_many = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn through(mut self, junction: impl Into<String>) -> Self {
        self.has_many = true;
        self.through = Some(junction.into());
        self
    }

    pub fn source_field(mut self, column: impl Into<String>) -> Self {
        self.source_field = Some(column.into());
        self
    }

    pub fn target_field(mut self, column: impl Into<String>) -> Self {
        self.target_field = Some(column.into());
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    pub fn morph_name(mut self, name: impl Into<String>) -> Self {
        self.morph_name = Some(name.into());
        self
    }

    pub fn relation_name(mut self, name: impl Into<String>) -> Self {
        self.relation_name = Some(name.into());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = Some(action);
        self
    }
}
