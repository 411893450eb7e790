//! Collection declarations and their derived physical layout.

mod builtin_types;
mod collection;
mod deriver;
mod field;
mod field_type;
mod shape;

pub use builtin_types::register_builtin_types;
pub use collection::{
    CollectionDefinition, CollectionOptions, GlobalDefinition, Versioning, WorkflowOptions,
    DRAFT_STAGE,
};
pub use deriver::{
    derive_collection, primary_key_column, resolve_title, CollectionSchema, DerivedTables,
    FieldStorage, TitleSource,
};
pub use field::{ComputeFn, FieldDefinition, LocalizationMode};
pub use field_type::{FieldType, FieldTypeRegistry, Operator};
pub use shape::{derive_shapes, RecordShapes, ShapeField};

/// Column names shared by derived tables.
pub mod columns {
    pub use super::deriver::{
        CREATED_AT, DELETED_AT, LOCALE, LOCALIZED_BLOB, PARENT_ID, UPDATED_AT, VERSION_CREATED_AT,
        VERSION_ID, VERSION_NUMBER, VERSION_OPERATION, VERSION_PARENT, VERSION_STAGE,
        VERSION_USER_ID,
    };
}
