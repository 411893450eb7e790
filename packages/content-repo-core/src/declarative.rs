//! Collection declarations read from JSON.
//!
//! Mirrors the builder API for everything that is plain data. Predicates,
//! hooks and virtual fields need closures and are only available through
//! `RepositoryBuilder`.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::access::{AccessRule, CollectionAccess, FieldRule};
use crate::config::{IdStrategy, RepoConfig};
use crate::error::{RepoError, Result};
use crate::registry::{Repository, RepositoryBuilder};
use crate::relation::RelationOptions;
use crate::schema::{
    CollectionDefinition, FieldDefinition, GlobalDefinition, LocalizationMode, Versioning,
};
use crate::store::{ColumnType, Generated, ReferentialAction};

/// Declarations file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionsFile {
    /// Format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Engine configuration; defaults apply when absent
    #[serde(default)]
    pub config: Option<RepoConfig>,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
    #[serde(default)]
    pub globals: Vec<GlobalSpec>,
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Collection-level rule as data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleSpec {
    #[default]
    Allow,
    Deny,
    /// Allowed for callers holding the role
    Role(String),
}

impl RuleSpec {
    fn into_rule(self) -> AccessRule {
        match self {
            RuleSpec::Allow => AccessRule::Allow,
            RuleSpec::Deny => AccessRule::Deny,
            RuleSpec::Role(role) => AccessRule::role(role),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessSpec {
    pub create: RuleSpec,
    pub read: RuleSpec,
    pub update: RuleSpec,
    pub delete: RuleSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default)]
    pub soft_delete: bool,
    /// `"off"`, `"plain"` or `{"workflow": {"stages": [...], "initialStage": ...}}`
    #[serde(default)]
    pub versioning: Versioning,
    #[serde(default)]
    pub max_versions: Option<usize>,
    #[serde(default)]
    pub id_strategy: Option<IdStrategy>,
    #[serde(default)]
    pub access: AccessSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GlobalSpec {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub versioning: Versioning,
    #[serde(default)]
    pub max_versions: Option<usize>,
    #[serde(default)]
    pub read: RuleSpec,
    #[serde(default)]
    pub update: RuleSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    /// Field type name; `relation` is implied by `relation`
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub localized: bool,
    #[serde(default)]
    pub localization: LocalizationMode,
    #[serde(default = "default_true")]
    pub input: bool,
    #[serde(default = "default_true")]
    pub output: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub generated: Option<Generated>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub column_type: Option<ColumnType>,
    /// Allowed values of a `select`
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub relation: Option<RelationSpec>,
    /// Role required to read the field
    #[serde(default)]
    pub read_role: Option<String>,
    /// Role required to write the field
    #[serde(default)]
    pub write_role: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RelationSpec {
    /// Target collection
    pub target: Option<String>,
    /// Discriminator to collection, for polymorphic relations
    pub targets: IndexMap<String, String>,
    pub has_many: bool,
    pub multiple: bool,
    pub through: Option<String>,
    pub source_field: Option<String>,
    pub target_field: Option<String>,
    pub foreign_key: Option<String>,
    pub morph_name: Option<String>,
    pub relation_name: Option<String>,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
}

impl RelationSpec {
    fn into_options(self, collection: &str, field: &str) -> Result<RelationOptions> {
        let mut options = match (self.target, self.targets.is_empty()) {
            (Some(target), true) => RelationOptions::to(target),
            (None, false) => {
                let pairs: Vec<(&str, &str)> = self
                    .targets
                    .iter()
                    .map(|(tag, target)| (tag.as_str(), target.as_str()))
                    .collect();
                RelationOptions::polymorphic(&pairs)
            }
            _ => {
                return Err(RepoError::Config(format!(
                    "relation '{field}' in '{collection}' needs exactly one of 'target' or 'targets'"
                )))
            }
        };
        options.has_many = self.has_many || self.through.is_some();
        options.multiple = self.multiple;
        options.through = self.through;
        options.source_field = self.source_field;
        options.target_field = self.target_field;
        options.foreign_key = self.foreign_key;
        options.morph_name = self.morph_name;
        options.relation_name = self.relation_name;
        options.on_delete = self.on_delete;
        options.on_update = self.on_update;
        Ok(options)
    }
}

impl FieldSpec {
    fn into_definition(self, collection: &str) -> Result<FieldDefinition> {
        let mut field = match self.relation {
            Some(relation) => {
                let options = relation.into_options(collection, &self.name)?;
                FieldDefinition::relation(self.name, options)
            }
            None => FieldDefinition::new(self.name, self.kind.unwrap_or_else(|| "text".into())),
        };
        field.required = self.required;
        field.nullable = self.nullable && !self.required;
        field.default = self.default;
        field.localized = self.localized;
        field.localization = self.localization;
        field.input = self.input;
        field.output = self.output;
        field.primary_key = self.primary_key;
        field.generated = self.generated;
        field.unique = self.unique;
        field.column_type = self.column_type;
        field.options = self.options;
        field.metadata = self.metadata;
        if let Some(role) = self.read_role {
            field.access.read = FieldRule::Role(role);
        }
        if let Some(role) = self.write_role {
            field.access.write = FieldRule::Role(role);
        }
        Ok(field)
    }
}

fn definitions(collection: &str, fields: Vec<FieldSpec>) -> Result<Vec<FieldDefinition>> {
    fields
        .into_iter()
        .map(|field| field.into_definition(collection))
        .collect()
}

impl CollectionSpec {
    pub fn into_definition(self) -> Result<CollectionDefinition> {
        let mut collection = CollectionDefinition::new(self.name);
        collection.fields = definitions(&collection.name, self.fields)?;
        collection.title = self.title;
        collection.options.timestamps = self.timestamps;
        collection.options.soft_delete = self.soft_delete;
        collection.options.versioning = self.versioning;
        collection.options.max_versions = self.max_versions;
        collection.options.id_strategy = self.id_strategy;
        collection.access = CollectionAccess {
            create: self.access.create.into_rule(),
            read: self.access.read.into_rule(),
            update: self.access.update.into_rule(),
            delete: self.access.delete.into_rule(),
        };
        Ok(collection)
    }
}

impl GlobalSpec {
    pub fn into_definition(self) -> Result<GlobalDefinition> {
        let mut global = GlobalDefinition::new(self.name);
        global.fields = definitions(&global.name, self.fields)?;
        global.versioning = self.versioning;
        global.max_versions = self.max_versions;
        global.read = self.read.into_rule();
        global.update = self.update.into_rule();
        Ok(global)
    }
}

impl CollectionsFile {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RepoError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RepoError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
            .map_err(|e| RepoError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Converts the declarations into a builder.
    pub fn into_builder(self) -> Result<RepositoryBuilder> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let mut builder = RepositoryBuilder::new(config);
        for collection in self.collections {
            builder.add_collection(collection.into_definition()?);
        }
        for global in self.globals {
            builder.add_global(global.into_definition()?);
        }
        Ok(builder)
    }

    pub fn build(self) -> Result<Repository> {
        self.into_builder()?.build()
    }
}
