use std::sync::Arc;

use serde_json::{Map, Value};

use super::field::FieldDefinition;
use super::field_type::{FieldType, FieldTypeRegistry, Operator};
use crate::relation::{RelationConfig, RelationKind};
use crate::store::{Column, ColumnType};
use crate::upload::UploadValue;

const TEXT_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::In,
    Operator::NotIn,
    Operator::Like,
    Operator::Contains,
    Operator::IsNull,
    Operator::IsNotNull,
];

const ORDERED_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::Gt,
    Operator::Gte,
    Operator::Lt,
    Operator::Lte,
    Operator::In,
    Operator::NotIn,
    Operator::IsNull,
    Operator::IsNotNull,
];

const EQUALITY_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::In,
    Operator::NotIn,
    Operator::IsNull,
    Operator::IsNotNull,
];

const DOCUMENT_OPERATORS: &[Operator] = &[Operator::Contains, Operator::IsNull, Operator::IsNotNull];

const RELATION_OPERATORS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::In,
    Operator::NotIn,
    Operator::Contains,
    Operator::IsNull,
    Operator::IsNotNull,
];

/// Builds the single column of a scalar field.
fn single_column(field: &FieldDefinition, column_type: ColumnType) -> Vec<Column> {
    let mut column = Column::new(&field.name, field.column_type.unwrap_or(column_type));
    if !field.nullable {
        column = column.not_null();
    }
    if let Some(default) = &field.default {
        column = column.with_default(default.clone());
    }
    vec![column]
}

/// Field type backed by one column and a value check.
struct ScalarType {
    name: &'static str,
    column_type: ColumnType,
    operators: &'static [Operator],
    json: bool,
    check: fn(&FieldDefinition, &Value) -> Result<(), String>,
}

impl FieldType for ScalarType {
    fn name(&self) -> &str {
        self.name
    }

    fn to_columns(&self, field: &FieldDefinition, _relation: Option<&RelationConfig>) -> Vec<Column> {
        single_column(field, self.column_type)
    }

    fn validate(&self, field: &FieldDefinition, value: &Value) -> Result<(), String> {
        (self.check)(field, value)
    }

    fn operators(&self) -> &[Operator] {
        self.operators
    }

    fn metadata(&self, field: &FieldDefinition) -> Map<String, Value> {
        let mut metadata = field.metadata.clone();
        metadata.insert("type".into(), Value::String(self.name.to_string()));
        if !field.options.is_empty() {
            metadata.insert("options".into(), Value::from(field.options.clone()));
        }
        metadata
    }

    fn is_json(&self) -> bool {
        self.json
    }
}

fn check_string(_: &FieldDefinition, value: &Value) -> Result<(), String> {
    if value.is_string() {
        Ok(())
    } else {
        Err(format!("expected a string, got {value}"))
    }
}

fn check_email(field: &FieldDefinition, value: &Value) -> Result<(), String> {
    check_string(field, value)?;
    let email = value.as_str().unwrap_or_default();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(format!("'{email}' is not a valid email address")),
    }
}

fn check_number(_: &FieldDefinition, value: &Value) -> Result<(), String> {
    if value.is_number() {
        Ok(())
    } else {
        Err(format!("expected a number, got {value}"))
    }
}

fn check_integer(field: &FieldDefinition, value: &Value) -> Result<(), String> {
    let column_type = field.column_type.unwrap_or(ColumnType::Integer);
    if column_type.accepts(value) {
        Ok(())
    } else {
        Err(format!("expected {}, got {value}", column_type.as_str()))
    }
}

fn check_boolean(_: &FieldDefinition, value: &Value) -> Result<(), String> {
    if value.is_boolean() {
        Ok(())
    } else {
        Err(format!("expected a boolean, got {value}"))
    }
}

fn check_date(_: &FieldDefinition, value: &Value) -> Result<(), String> {
    if ColumnType::Timestamp.accepts(value) {
        Ok(())
    } else {
        Err(format!("expected an RFC 3339 timestamp, got {value}"))
    }
}

fn check_select(field: &FieldDefinition, value: &Value) -> Result<(), String> {
    match value.as_str() {
        Some(option) if field.options.iter().any(|o| o == option) => Ok(()),
        _ => Err(format!(
            "{value} is not one of [{}]",
            field.options.join(", ")
        )),
    }
}

fn check_any(_: &FieldDefinition, _: &Value) -> Result<(), String> {
    Ok(())
}

fn check_object(_: &FieldDefinition, value: &Value) -> Result<(), String> {
    if value.is_object() {
        Ok(())
    } else {
        Err(format!("expected an object, got {value}"))
    }
}

fn check_array(_: &FieldDefinition, value: &Value) -> Result<(), String> {
    if value.is_array() {
        Ok(())
    } else {
        Err(format!("expected an array, got {value}"))
    }
}

fn check_upload(_: &FieldDefinition, value: &Value) -> Result<(), String> {
    serde_json::from_value::<UploadValue>(value.clone())
        .map(|_| ())
        .map_err(|e| format!("invalid upload: {e}"))
}

/// Relation columns follow the resolved relation kind.
struct RelationType;

impl FieldType for RelationType {
    fn name(&self) -> &str {
        "relation"
    }

    fn to_columns(&self, field: &FieldDefinition, relation: Option<&RelationConfig>) -> Vec<Column> {
        let Some(relation) = relation else {
            return Vec::new();
        };
        let finish = |column: Column| {
            if field.nullable {
                column
            } else {
                column.not_null()
            }
        };
        match relation.kind {
            RelationKind::BelongsTo => relation
                .fields
                .iter()
                .map(|name| finish(Column::new(name, relation.key_type)))
                .collect(),
            RelationKind::MorphTo => match relation.fields.as_slice() {
                [type_column, id_column] => vec![
                    finish(Column::new(type_column, ColumnType::Text)),
                    finish(Column::new(id_column, relation.key_type)),
                ],
                _ => Vec::new(),
            },
            RelationKind::Multiple => relation
                .fields
                .iter()
                .map(|name| finish(Column::new(name, ColumnType::Json)))
                .collect(),
            RelationKind::HasMany | RelationKind::ManyToMany | RelationKind::MorphMany => Vec::new(),
        }
    }

    // Relation payloads are checked while the mutation is parsed.
    fn validate(&self, _field: &FieldDefinition, _value: &Value) -> Result<(), String> {
        Ok(())
    }

    fn operators(&self) -> &[Operator] {
        RELATION_OPERATORS
    }
}

/// Computed on read; owns no column.
struct VirtualType;

impl FieldType for VirtualType {
    fn name(&self) -> &str {
        "virtual"
    }

    fn to_columns(&self, _field: &FieldDefinition, _relation: Option<&RelationConfig>) -> Vec<Column> {
        Vec::new()
    }

    fn validate(&self, field: &FieldDefinition, _value: &Value) -> Result<(), String> {
        Err(format!("'{}' is computed and cannot be written", field.name))
    }

    fn operators(&self) -> &[Operator] {
        EQUALITY_OPERATORS
    }
}

fn scalar(
    name: &'static str,
    column_type: ColumnType,
    operators: &'static [Operator],
    check: fn(&FieldDefinition, &Value) -> Result<(), String>,
) -> Arc<dyn FieldType> {
    Arc::new(ScalarType {
        name,
        column_type,
        operators,
        json: column_type == ColumnType::Json,
        check,
    })
}

/// Registers the built-in field types.
pub fn register_builtin_types(registry: &mut FieldTypeRegistry) -> crate::error::Result<()> {
    let builtins: Vec<Arc<dyn FieldType>> = vec![
        scalar("text", ColumnType::Text, TEXT_OPERATORS, check_string),
        scalar("textarea", ColumnType::Text, TEXT_OPERATORS, check_string),
        scalar("email", ColumnType::Text, TEXT_OPERATORS, check_email),
        scalar("number", ColumnType::Real, ORDERED_OPERATORS, check_number),
        scalar("integer", ColumnType::Integer, ORDERED_OPERATORS, check_integer),
        scalar("boolean", ColumnType::Boolean, EQUALITY_OPERATORS, check_boolean),
        scalar("date", ColumnType::Timestamp, ORDERED_OPERATORS, check_date),
        scalar("select", ColumnType::Text, EQUALITY_OPERATORS, check_select),
        scalar("json", ColumnType::Json, DOCUMENT_OPERATORS, check_any),
        scalar("object", ColumnType::Json, DOCUMENT_OPERATORS, check_object),
        scalar("array", ColumnType::Json, DOCUMENT_OPERATORS, check_array),
        scalar("upload", ColumnType::Json, DOCUMENT_OPERATORS, check_upload),
        Arc::new(RelationType),
        Arc::new(VirtualType),
    ];
    for field_type in builtins {
        registry.register(field_type)?;
    }
    Ok(())
}
