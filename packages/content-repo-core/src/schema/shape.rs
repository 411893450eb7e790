//! Record shapes derived from a collection's fields.
//!
//! Select, insert and update shapes all come from the one field map. Create
//! validation reads requiredness from the insert shape.

use indexmap::IndexMap;
use serde::Serialize;

use crate::relation::RelationConfig;
use crate::schema::collection::CollectionDefinition;
use crate::schema::deriver::{CollectionSchema, CREATED_AT, DELETED_AT, UPDATED_AT};

/// One attribute of a record shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapeField {
    pub name: String,
    /// Field type name, `relation:<kind>` for relations
    #[serde(rename = "type")]
    pub value_type: String,
    pub optional: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub localized: bool,
}

impl ShapeField {
    fn new(name: &str, value_type: impl Into<String>, optional: bool) -> Self {
        Self {
            name: name.to_string(),
            value_type: value_type.into(),
            optional,
            localized: false,
        }
    }
}

/// Record shapes of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordShapes {
    pub select: Vec<ShapeField>,
    pub insert: Vec<ShapeField>,
    pub update: Vec<ShapeField>,
}

impl RecordShapes {
    /// Names create must receive.
    pub fn required_on_insert(&self) -> impl Iterator<Item = &str> {
        self.insert
            .iter()
            .filter(|f| !f.optional)
            .map(|f| f.name.as_str())
    }
}

/// Derives the shapes of a collection.
pub fn derive_shapes(
    collection: &CollectionDefinition,
    schema: &CollectionSchema,
    relations: &IndexMap<String, RelationConfig>,
) -> RecordShapes {
    let mut select = Vec::new();
    let mut insert = Vec::new();
    let mut update = Vec::new();

    if !collection.fields.iter().any(|f| f.primary_key) {
        select.push(ShapeField::new(&schema.primary_key, "id", false));
    }

    for field in &collection.fields {
        let value_type = match relations.get(&field.name) {
            Some(relation) => format!("relation:{}", relation.kind.as_str()),
            None => field.kind.clone(),
        };
        if field.output {
            let mut shaped =
                ShapeField::new(&field.name, value_type.clone(), field.nullable || field.localized);
            shaped.localized = field.localized;
            select.push(shaped);
        }
        if field.input && !field.is_virtual() {
            let mut shaped =
                ShapeField::new(&field.name, value_type.clone(), field.is_optional_on_insert());
            shaped.localized = field.localized;
            insert.push(shaped);
            if !field.primary_key {
                let mut shaped = ShapeField::new(&field.name, value_type, true);
                shaped.localized = field.localized;
                update.push(shaped);
            }
        }
    }

    if collection.options.timestamps {
        select.push(ShapeField::new(CREATED_AT, "date", false));
        select.push(ShapeField::new(UPDATED_AT, "date", false));
    }
    if collection.options.soft_delete {
        select.push(ShapeField::new(DELETED_AT, "date", true));
    }

    RecordShapes {
        select,
        insert,
        update,
    }
}
