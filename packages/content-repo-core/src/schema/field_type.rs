//! Field type trait and the name-keyed registry of field kinds.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RepoError, Result};
use crate::relation::RelationConfig;
use crate::schema::field::FieldDefinition;
use crate::store::Column;

/// Query operator usable in `where` clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    Contains,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::NotIn => "notIn",
            Operator::Like => "like",
            Operator::Contains => "contains",
            Operator::IsNull => "isNull",
            Operator::IsNotNull => "isNotNull",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "in" => Operator::In,
            "notIn" => Operator::NotIn,
            "like" => Operator::Like,
            "contains" => Operator::Contains,
            "isNull" => Operator::IsNull,
            "isNotNull" => Operator::IsNotNull,
            _ => return None,
        })
    }
}

/// Pluggable field kind.
///
/// A field type decides the physical columns of a field, validates written
/// values, and lists the operators a `where` clause may apply to it.
pub trait FieldType: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Physical columns for the field: zero, one or two.
    ///
    /// Relation fields receive their resolved configuration.
    fn to_columns(&self, field: &FieldDefinition, relation: Option<&RelationConfig>)
        -> Vec<Column>;

    /// Validates a non-null written value. Returns a message on failure.
    fn validate(&self, field: &FieldDefinition, value: &Value) -> std::result::Result<(), String>;

    /// Operators accepted in `where` clauses.
    fn operators(&self) -> &[Operator];

    /// Descriptive metadata for tooling.
    fn metadata(&self, field: &FieldDefinition) -> Map<String, Value> {
        let mut metadata = field.metadata.clone();
        metadata.insert("type".into(), Value::String(self.name().to_string()));
        metadata
    }

    /// Returns true if values are stored as JSON documents.
    fn is_json(&self) -> bool {
        false
    }
}

/// Registry of field types by name.
#[derive(Default, Clone)]
pub struct FieldTypeRegistry {
    types: HashMap<String, Arc<dyn FieldType>>,
}

impl FieldTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Creates a registry holding the built-in field types.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        super::builtin_types::register_builtin_types(&mut registry)?;
        Ok(registry)
    }

    /// Registers a field type.
    ///
    /// # Returns
    /// `Err` if a type with the same name is already registered.
    pub fn register(&mut self, field_type: Arc<dyn FieldType>) -> Result<()> {
        let name = field_type.name().to_string();
        if self.types.contains_key(&name) {
            return Err(RepoError::Config(format!(
                "field type '{}' is already registered",
                name
            )));
        }
        self.types.insert(name, field_type);
        Ok(())
    }

    /// Retrieves a field type by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn FieldType>> {
        self.types.get(name).cloned()
    }

    /// Retrieves the field type of a field, naming the field on failure.
    pub fn for_field(&self, collection: &str, field: &FieldDefinition) -> Result<Arc<dyn FieldType>> {
        self.get(&field.kind)
            .ok_or_else(|| RepoError::UnknownFieldType {
                collection: collection.to_string(),
                field: field.name.clone(),
                kind: field.kind.clone(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Returns registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for FieldTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTypeRegistry")
            .field("types", &self.names())
            .finish()
    }
}
