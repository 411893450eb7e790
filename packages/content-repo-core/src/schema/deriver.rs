//! Physical table derivation.
//!
//! A collection derives up to four tables:
//! - Main: primary key, non-localized fields, timestamps, soft-delete marker
//! - I18n: one row per (record, locale) holding localized columns
//! - Versions: append-only snapshots of the main columns
//! - I18n-Versions: snapshots of the I18n rows, per version and locale
//!
//! Every parent-id column clones the type of the primary key in effect.

use indexmap::IndexMap;
use serde::Serialize;

use crate::config::IdStrategy;
use crate::error::{RepoError, Result};
use crate::relation::{RelationConfig, RelationKind};
use crate::schema::collection::CollectionDefinition;
use crate::schema::field::{FieldDefinition, LocalizationMode};
use crate::schema::field_type::FieldTypeRegistry;
use crate::store::{Column, ColumnType, ForeignKey, Generated, ReferentialAction, TableSchema};

pub const PARENT_ID: &str = "parentId";
pub const LOCALE: &str = "locale";
/// Per-locale override fragments of nested-mode fields
pub const LOCALIZED_BLOB: &str = "_localized";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const DELETED_AT: &str = "deletedAt";
pub const VERSION_ID: &str = "versionId";
/// Parent id column of the versions table
pub const VERSION_PARENT: &str = "id";
pub const VERSION_NUMBER: &str = "versionNumber";
pub const VERSION_OPERATION: &str = "versionOperation";
pub const VERSION_USER_ID: &str = "versionUserId";
pub const VERSION_CREATED_AT: &str = "versionCreatedAt";
pub const VERSION_STAGE: &str = "versionStage";

const RESERVED: &[&str] = &[
    PARENT_ID,
    LOCALE,
    LOCALIZED_BLOB,
    CREATED_AT,
    UPDATED_AT,
    DELETED_AT,
    VERSION_ID,
    VERSION_NUMBER,
    VERSION_OPERATION,
    VERSION_USER_ID,
    VERSION_CREATED_AT,
    VERSION_STAGE,
];

/// Where a field's value lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "in")]
pub enum FieldStorage {
    /// Columns on the main table
    Main { columns: Vec<String> },
    /// Column on the I18n table, whole value per locale
    Localized { column: String },
    /// Main column holding the structure, I18n blob holding overrides
    Nested { column: String },
    /// Stored on another table (hasMany, manyToMany, morphMany)
    Related,
    /// Virtual field computed on read
    Computed,
}

/// Source of a record's human-readable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "field")]
pub enum TitleSource {
    PrimaryKey(String),
    Field(String),
    /// Read through the I18n accessor
    Localized(String),
    Virtual(String),
}

impl TitleSource {
    /// Name of the record attribute carrying the title.
    pub fn attribute(&self) -> &str {
        match self {
            TitleSource::PrimaryKey(name)
            | TitleSource::Field(name)
            | TitleSource::Localized(name)
            | TitleSource::Virtual(name) => name,
        }
    }
}

/// Tables derived from one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedTables {
    pub main: TableSchema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i18n: Option<TableSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<TableSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i18n_versions: Option<TableSchema>,
}

impl DerivedTables {
    /// Tables in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        std::iter::once(&self.main)
            .chain(self.i18n.as_ref())
            .chain(self.versions.as_ref())
            .chain(self.i18n_versions.as_ref())
    }
}

/// Derived physical layout of a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub collection: String,
    pub tables: DerivedTables,
    /// Primary key column of the main table
    pub primary_key: String,
    /// Storage of each field, in declaration order
    pub storage: IndexMap<String, FieldStorage>,
    pub title: TitleSource,
    /// Main columns copied into version snapshots
    #[serde(skip)]
    pub snapshot_columns: Vec<String>,
    /// Whole-mode columns of the I18n table
    #[serde(skip)]
    pub localized_columns: Vec<String>,
}

impl CollectionSchema {
    pub fn has_i18n(&self) -> bool {
        self.tables.i18n.is_some()
    }

    pub fn is_versioned(&self) -> bool {
        self.tables.versions.is_some()
    }

    pub fn has_nested_fields(&self) -> bool {
        self.storage
            .values()
            .any(|s| matches!(s, FieldStorage::Nested { .. }))
    }
}

/// Returns the primary key column in effect for a collection.
///
/// A declared primary-key field suppresses the generated `id`.
pub fn primary_key_column(
    collection: &CollectionDefinition,
    registry: &FieldTypeRegistry,
    default_strategy: IdStrategy,
) -> Result<Column> {
    let declared: Vec<&FieldDefinition> =
        collection.fields.iter().filter(|f| f.primary_key).collect();
    match declared.as_slice() {
        [] => Ok(match collection.options.id_strategy.unwrap_or(default_strategy) {
            IdStrategy::Uuid => Column::new("id", ColumnType::Uuid)
                .primary_key()
                .generated(Generated::Uuid),
            IdStrategy::Serial => Column::new("id", ColumnType::BigInt)
                .primary_key()
                .generated(Generated::AutoIncrement),
        }),
        [field] => {
            if field.localized || field.relation.is_some() || field.is_virtual() {
                return Err(RepoError::invalid(
                    &collection.name,
                    format!("primary key '{}' must be a plain stored field", field.name),
                ));
            }
            let field_type = registry.for_field(&collection.name, field)?;
            match field_type.to_columns(field, None).as_slice() {
                [column] => {
                    let mut column = Column::new(&column.name, column.column_type).primary_key();
                    if let Some(generated) = field.generated {
                        column = column.generated(generated);
                    }
                    Ok(column)
                }
                _ => Err(RepoError::invalid(
                    &collection.name,
                    format!("primary key '{}' must map to exactly one column", field.name),
                )),
            }
        }
        _ => Err(RepoError::invalid(
            &collection.name,
            "more than one primary key field is declared",
        )),
    }
}

/// Resolves the declared title into the attribute that provides it.
pub fn resolve_title(collection: &CollectionDefinition, key: &Column) -> Result<TitleSource> {
    let Some(title) = &collection.title else {
        return Ok(TitleSource::PrimaryKey(key.name.clone()));
    };
    if *title == key.name {
        return Ok(TitleSource::PrimaryKey(key.name.clone()));
    }
    match collection.get_field(title) {
        Some(field) if field.is_virtual() => Ok(TitleSource::Virtual(title.clone())),
        Some(field) if field.localized => Ok(TitleSource::Localized(title.clone())),
        Some(_) => Ok(TitleSource::Field(title.clone())),
        None => Err(RepoError::UnknownTitleField {
            collection: collection.name.clone(),
            field: title.clone(),
        }),
    }
}

/// Copy of a column without constraints, for side and snapshot tables.
fn relaxed(column: &Column) -> Column {
    Column::new(&column.name, column.column_type)
}

fn finish(collection: &str, table: TableSchema) -> Result<TableSchema> {
    table
        .validate()
        .map_err(|e| RepoError::invalid(collection, e.to_string()))?;
    tracing::debug!(
        collection,
        table = %table.name,
        columns = ?table.column_names(),
        "derived table"
    );
    Ok(table)
}

fn check_field_names(collection: &CollectionDefinition, key: &Column) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for field in &collection.fields {
        if !seen.insert(field.name.as_str()) {
            return Err(RepoError::invalid(
                &collection.name,
                format!("field '{}' is declared twice", field.name),
            ));
        }
        let clashes_with_key = field.name == key.name && !field.primary_key;
        let clashes_with_versions = field.name == VERSION_PARENT && !field.primary_key;
        if RESERVED.contains(&field.name.as_str()) || clashes_with_key || clashes_with_versions {
            return Err(RepoError::invalid(
                &collection.name,
                format!("field name '{}' is reserved", field.name),
            ));
        }
        if field.localized && (field.relation.is_some() || field.is_virtual()) {
            return Err(RepoError::invalid(
                &collection.name,
                format!("field '{}' cannot be localized", field.name),
            ));
        }
    }
    Ok(())
}

/// Derives the physical layout of a collection.
///
/// # Arguments
/// * `collection` - Collection definition
/// * `registry` - Field types used to produce columns
/// * `relations` - Resolved relations of this collection
/// * `key` - Primary key column in effect
pub fn derive_collection(
    collection: &CollectionDefinition,
    registry: &FieldTypeRegistry,
    relations: &IndexMap<String, RelationConfig>,
    key: &Column,
) -> Result<CollectionSchema> {
    check_field_names(collection, key)?;
    let name = collection.name.as_str();
    let options = &collection.options;

    let mut main = TableSchema::new(name);
    main.push_column(key.clone());
    let mut storage = IndexMap::new();
    let mut localized_columns: Vec<Column> = Vec::new();

    for field in &collection.fields {
        let field_type = registry.for_field(name, field)?;
        if field.primary_key {
            storage.insert(
                field.name.clone(),
                FieldStorage::Main {
                    columns: vec![key.name.clone()],
                },
            );
            continue;
        }
        if field.is_virtual() {
            storage.insert(field.name.clone(), FieldStorage::Computed);
            continue;
        }

        if let Some(relation) = relations.get(&field.name) {
            let columns = field_type.to_columns(field, Some(relation));
            if columns.is_empty() {
                storage.insert(field.name.clone(), FieldStorage::Related);
                continue;
            }
            if relation.kind == RelationKind::BelongsTo && relation.constrained {
                if let (Some(target), Some(references)) =
                    (&relation.target_collection, &relation.references)
                {
                    main.push_foreign_key(ForeignKey {
                        columns: relation.fields.clone(),
                        references_table: target.clone(),
                        references_columns: vec![references.clone()],
                        on_delete: relation.on_delete,
                        on_update: relation.on_update,
                    });
                }
            }
            storage.insert(
                field.name.clone(),
                FieldStorage::Main {
                    columns: columns.iter().map(|c| c.name.clone()).collect(),
                },
            );
            for column in columns {
                main.push_column(column);
            }
            continue;
        }

        let columns = field_type.to_columns(field, None);
        let nested = field.localized
            && field.localization == LocalizationMode::Nested
            && field_type.is_json();
        if field.localized && !nested {
            let column = columns.first().map(|c| c.name.clone()).unwrap_or_default();
            localized_columns.extend(columns.iter().map(relaxed));
            storage.insert(field.name.clone(), FieldStorage::Localized { column });
            continue;
        }

        if nested {
            let column = columns.first().map(|c| c.name.clone()).unwrap_or_default();
            storage.insert(field.name.clone(), FieldStorage::Nested { column });
        } else {
            storage.insert(
                field.name.clone(),
                FieldStorage::Main {
                    columns: columns.iter().map(|c| c.name.clone()).collect(),
                },
            );
        }
        if field.unique {
            let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
            main.push_index(&names, true);
        }
        for column in columns {
            main.push_column(column);
        }
    }

    if options.timestamps {
        main.push_column(Column::new(CREATED_AT, ColumnType::Timestamp).not_null());
        main.push_column(Column::new(UPDATED_AT, ColumnType::Timestamp).not_null());
    }
    if options.soft_delete {
        main.push_column(Column::new(DELETED_AT, ColumnType::Timestamp));
        main.push_index(&[DELETED_AT], false);
    }

    let snapshot_columns: Vec<Column> = main
        .columns
        .iter()
        .filter(|c| !c.primary_key && c.name != DELETED_AT)
        .map(relaxed)
        .collect();

    let needs_i18n = storage
        .values()
        .any(|s| matches!(s, FieldStorage::Localized { .. } | FieldStorage::Nested { .. }));

    let i18n = if needs_i18n {
        let mut table = TableSchema::new(format!("{name}_i18n"));
        push_serial_key(&mut table);
        table.push_column(key.clone_for_reference(PARENT_ID));
        table.push_column(Column::new(LOCALE, ColumnType::Text).not_null());
        for column in &localized_columns {
            table.push_column(column.clone());
        }
        table.push_column(Column::new(LOCALIZED_BLOB, ColumnType::Json));
        table.push_foreign_key(ForeignKey {
            columns: vec![PARENT_ID.to_string()],
            references_table: name.to_string(),
            references_columns: vec![key.name.clone()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::Cascade,
        });
        table.push_index(&[PARENT_ID, LOCALE], true);
        Some(finish(name, table)?)
    } else {
        None
    };

    let versioning = options.versioning.is_enabled();
    let versions = if versioning {
        let mut table = TableSchema::new(format!("{name}_versions"));
        table.push_column(
            Column::new(VERSION_ID, ColumnType::BigInt)
                .primary_key()
                .generated(Generated::AutoIncrement),
        );
        table.push_column(key.clone_for_reference(VERSION_PARENT));
        table.push_column(Column::new(VERSION_NUMBER, ColumnType::Integer).not_null());
        table.push_column(Column::new(VERSION_OPERATION, ColumnType::Text).not_null());
        table.push_column(Column::new(VERSION_USER_ID, ColumnType::Json));
        table.push_column(Column::new(VERSION_CREATED_AT, ColumnType::Timestamp).not_null());
        if options.versioning.workflow().is_some() {
            table.push_column(Column::new(VERSION_STAGE, ColumnType::Text));
        }
        for column in &snapshot_columns {
            table.push_column(column.clone());
        }
        table.push_index(&[VERSION_PARENT, VERSION_NUMBER], true);
        Some(finish(name, table)?)
    } else {
        None
    };

    let i18n_versions = if versioning && needs_i18n {
        let mut table = TableSchema::new(format!("{name}_i18n_versions"));
        push_serial_key(&mut table);
        table.push_column(key.clone_for_reference(PARENT_ID));
        table.push_column(Column::new(VERSION_NUMBER, ColumnType::Integer).not_null());
        table.push_column(Column::new(LOCALE, ColumnType::Text).not_null());
        for column in &localized_columns {
            table.push_column(column.clone());
        }
        table.push_column(Column::new(LOCALIZED_BLOB, ColumnType::Json));
        table.push_index(&[PARENT_ID, VERSION_NUMBER, LOCALE], true);
        Some(finish(name, table)?)
    } else {
        None
    };

    let main = finish(name, main)?;
    let title = resolve_title(collection, key)?;

    Ok(CollectionSchema {
        collection: name.to_string(),
        tables: DerivedTables {
            main,
            i18n,
            versions,
            i18n_versions,
        },
        primary_key: key.name.clone(),
        storage,
        title,
        snapshot_columns: snapshot_columns.into_iter().map(|c| c.name).collect(),
        localized_columns: localized_columns.into_iter().map(|c| c.name).collect(),
    })
}

fn push_serial_key(table: &mut TableSchema) {
    table.push_column(
        Column::new("id", ColumnType::BigInt)
            .primary_key()
            .generated(Generated::AutoIncrement),
    );
}
