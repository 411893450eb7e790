//! Column definitions within a table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical column type.
///
/// The store keeps every value as JSON; the column type decides which JSON
/// values a column accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Uuid,
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    BigInt,
    /// 16-bit integer
    SmallInt,
    Real,
    Boolean,
    /// RFC 3339 timestamp string
    Timestamp,
    Json,
}

impl ColumnType {
    /// Returns the type name used in schema dumps and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Uuid => "uuid",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::SmallInt => "smallint",
            ColumnType::Real => "real",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        }
    }

    /// Returns true for the integer family.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::BigInt | ColumnType::SmallInt
        )
    }

    /// Checks whether a non-null value can be stored in a column of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ColumnType::Text => value.is_string(),
            ColumnType::Uuid => value
                .as_str()
                .is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()),
            ColumnType::Integer => value
                .as_i64()
                .is_some_and(|v| i32::try_from(v).is_ok()),
            ColumnType::BigInt => value.as_i64().is_some(),
            ColumnType::SmallInt => value
                .as_i64()
                .is_some_and(|v| i16::try_from(v).is_ok()),
            ColumnType::Real => value.is_number(),
            ColumnType::Boolean => value.is_boolean(),
            ColumnType::Timestamp => value
                .as_str()
                .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
            ColumnType::Json => true,
        }
    }

    /// Converts a key to this type when only its representation differs:
    /// integers kept in text columns, and numeric text read back as integers.
    /// Other values are returned unchanged.
    pub fn coerce_key(&self, value: &Value) -> Value {
        match (self, value) {
            (ColumnType::Text, Value::Number(n)) => Value::String(n.to_string()),
            (ty, Value::String(s)) if ty.is_integer() => s
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| value.clone()),
            _ => value.clone(),
        }
    }
}

/// Value generated by the store when an insert leaves the column empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generated {
    /// Per-table monotonic sequence starting at 1
    AutoIncrement,
    /// Random v4 UUID
    Uuid,
}

/// Column definition within a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Logical type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether NULL is accepted
    pub nullable: bool,
    /// Whether this column is the table's primary key
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
    /// Store-side value generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<Generated>,
    /// Default applied when an insert omits the column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Column {
    /// Creates a nullable column with no default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            generated: None,
            default: None,
        }
    }

    /// Marks the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column as primary key (implies NOT NULL).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Sets store-side value generation.
    pub fn generated(mut self, generated: Generated) -> Self {
        self.generated = Some(generated);
        self
    }

    /// Sets the default value.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Clones this column's logical type into a new referencing column.
    ///
    /// The result keeps the type and width but drops primary-key status,
    /// generation and default, so a child table's parent-id column always
    /// matches whatever primary key is in effect on the parent.
    pub fn clone_for_reference(&self, name: impl Into<String>) -> Column {
        Column::new(name, self.column_type).not_null()
    }
}
