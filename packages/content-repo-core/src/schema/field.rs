//! Field definitions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::access::{FieldAccess, FieldRule};
use crate::relation::RelationOptions;
use crate::store::{ColumnType, Generated};
use crate::Record;

/// How a localized JSON field stores its per-locale values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalizationMode {
    /// The whole value is replaced per locale
    #[default]
    Whole,
    /// The structure lives in the main row, locales carry override fragments
    Nested,
}

/// Read-time computation for a virtual field.
#[derive(Clone)]
pub struct ComputeFn(pub Arc<dyn Fn(&Record) -> Value + Send + Sync>);

impl fmt::Debug for ComputeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComputeFn(<fn>)")
    }
}

/// One logical attribute of a collection.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    /// Field name, unique within the collection
    pub name: String,
    /// Field type name in the field type registry
    pub kind: String,
    /// Must be present (and non-null) on create
    pub required: bool,
    /// Whether null is accepted
    pub nullable: bool,
    /// Value used when create omits the field
    pub default: Option<Value>,
    /// Whether values are stored per locale
    pub localized: bool,
    /// Storage of localized JSON values
    pub localization: LocalizationMode,
    /// Accepted in write payloads
    pub input: bool,
    /// Present in read results
    pub output: bool,
    /// Replaces the generated primary key
    pub primary_key: bool,
    /// Store-side generation for a declared primary key
    pub generated: Option<Generated>,
    /// Unique across the collection
    pub unique: bool,
    /// Overrides the column type chosen by the field type
    pub column_type: Option<ColumnType>,
    /// Allowed values for `select`
    pub options: Vec<String>,
    /// Field-level access rules
    pub access: FieldAccess,
    /// Relation metadata, unevaluated until the registry is built
    pub relation: Option<RelationOptions>,
    /// Computation for virtual fields
    pub compute: Option<ComputeFn>,
    /// Free-form metadata passed through to the field type
    pub metadata: Map<String, Value>,
}

impl FieldDefinition {
    /// Creates a field of the given registered kind.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            required: false,
            nullable: true,
            default: None,
            localized: false,
            localization: LocalizationMode::Whole,
            input: true,
            output: true,
            primary_key: false,
            generated: None,
            unique: false,
            column_type: None,
            options: Vec::new(),
            access: FieldAccess::default(),
            relation: None,
            compute: None,
            metadata: Map::new(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, "text")
    }

    pub fn textarea(name: impl Into<String>) -> Self {
        Self::new(name, "textarea")
    }

    pub fn email(name: impl Into<String>) -> Self {
        Self::new(name, "email")
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, "number")
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, "integer")
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, "boolean")
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, "date")
    }

    /// Enumerated text field.
    pub fn select(name: impl Into<String>, options: &[&str]) -> Self {
        let mut field = Self::new(name, "select");
        field.options = options.iter().map(|o| o.to_string()).collect();
        field
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, "json")
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, "object")
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, "array")
    }

    pub fn upload(name: impl Into<String>) -> Self {
        Self::new(name, "upload")
    }

    /// Relation field; the target is evaluated when the registry is built.
    pub fn relation(name: impl Into<String>, options: RelationOptions) -> Self {
        let mut field = Self::new(name, "relation");
        field.relation = Some(options);
        field
    }

    /// Read-only field computed from the assembled record.
    pub fn virtual_field(
        name: impl Into<String>,
        compute: impl Fn(&Record) -> Value + Send + Sync + 'static,
    ) -> Self {
        let mut field = Self::new(name, "virtual");
        field.input = false;
        field.compute = Some(ComputeFn(Arc::new(compute)));
        field
    }

    /// Marks the field required (implies not null).
    pub fn required(mut self) -> Self {
        self.required = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Stores the whole value per locale.
    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    /// Stores the structure in the main row with per-locale overrides.
    pub fn localized_nested(mut self) -> Self {
        self.localized = true;
        self.localization = LocalizationMode::Nested;
        self
    }

    /// Declares this field as the collection's primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn generated(mut self, generated: Generated) -> Self {
        self.generated = Some(generated);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn column_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = Some(column_type);
        self
    }

    /// Excludes the field from write payloads.
    pub fn read_only(mut self) -> Self {
        self.input = false;
        self
    }

    /// Excludes the field from read results.
    pub fn hidden(mut self) -> Self {
        self.output = false;
        self
    }

    pub fn read_access(mut self, rule: FieldRule) -> Self {
        self.access.read = rule;
        self
    }

    pub fn write_access(mut self, rule: FieldRule) -> Self {
        self.access.write = rule;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns true for fields computed on read.
    pub fn is_virtual(&self) -> bool {
        self.compute.is_some()
    }

    /// Returns true if create may omit the field.
    pub fn is_optional_on_insert(&self) -> bool {
        !self.required || self.default.is_some() || self.generated.is_some()
    }
}
