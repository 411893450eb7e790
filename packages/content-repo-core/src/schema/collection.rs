//! Collection and global definitions.

use serde::{Deserialize, Serialize};

use crate::access::{AccessRule, CollectionAccess};
use crate::config::IdStrategy;
use crate::hooks::Hooks;
use crate::schema::field::FieldDefinition;

/// Stage every workflow has, read from the live record.
pub const DRAFT_STAGE: &str = "draft";

/// Named stages layered on top of versioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOptions {
    /// Declared stages; `draft` is always included
    pub stages: Vec<String>,
    /// Stage tagged on versions produced by ordinary mutations
    pub initial_stage: String,
}

impl WorkflowOptions {
    pub fn new(stages: &[&str], initial_stage: &str) -> Self {
        Self {
            stages: stages.iter().map(|s| s.to_string()).collect(),
            initial_stage: initial_stage.to_string(),
        }
    }

    /// Returns the stages with `draft` first and duplicates removed.
    pub fn normalized_stages(&self) -> Vec<String> {
        let mut stages = vec![DRAFT_STAGE.to_string()];
        for stage in &self.stages {
            if !stages.contains(stage) {
                stages.push(stage.clone());
            }
        }
        stages
    }

    pub fn has_stage(&self, stage: &str) -> bool {
        stage == DRAFT_STAGE || self.stages.iter().any(|s| s == stage)
    }
}

/// Versioning policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Versioning {
    #[default]
    Off,
    Plain,
    Workflow(WorkflowOptions),
}

impl Versioning {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Versioning::Off)
    }

    pub fn workflow(&self) -> Option<&WorkflowOptions> {
        match self {
            Versioning::Workflow(workflow) => Some(workflow),
            _ => None,
        }
    }
}

/// Collection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Adds `createdAt` / `updatedAt`
    pub timestamps: bool,
    /// Adds `deletedAt`; delete marks instead of removing
    pub soft_delete: bool,
    pub versioning: Versioning,
    /// Oldest versions beyond this count are trimmed
    pub max_versions: Option<usize>,
    /// Overrides the repository default for the generated key
    pub id_strategy: Option<IdStrategy>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            timestamps: true,
            soft_delete: false,
            versioning: Versioning::Off,
            max_versions: None,
            id_strategy: None,
        }
    }
}

/// Declared record type.
#[derive(Debug, Clone)]
pub struct CollectionDefinition {
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDefinition>,
    /// Field used as a human-readable label
    pub title: Option<String>,
    pub options: CollectionOptions,
    pub access: CollectionAccess,
    pub hooks: Hooks,
}

impl CollectionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            title: None,
            options: CollectionOptions::default(),
            access: CollectionAccess::default(),
            hooks: Hooks::default(),
        }
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn title(mut self, field: impl Into<String>) -> Self {
        self.title = Some(field.into());
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.options.timestamps = enabled;
        self
    }

    pub fn soft_delete(mut self) -> Self {
        self.options.soft_delete = true;
        self
    }

    pub fn versioned(mut self) -> Self {
        self.options.versioning = Versioning::Plain;
        self
    }

    pub fn workflow(mut self, stages: &[&str], initial_stage: &str) -> Self {
        self.options.versioning = Versioning::Workflow(WorkflowOptions::new(stages, initial_stage));
        self
    }

    pub fn max_versions(mut self, max: usize) -> Self {
        self.options.max_versions = Some(max);
        self
    }

    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.options.id_strategy = Some(strategy);
        self
    }

    pub fn access(mut self, access: CollectionAccess) -> Self {
        self.access = access;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Returns the field with the given name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if any field stores per-locale values.
    pub fn has_localized_fields(&self) -> bool {
        self.fields.iter().any(|f| f.localized)
    }
}

/// Singleton record type.
///
/// Stored like a collection of at most one record, with the same
/// localization, versioning and workflow behavior.
#[derive(Debug, Clone)]
pub struct GlobalDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub versioning: Versioning,
    pub max_versions: Option<usize>,
    pub read: AccessRule,
    pub update: AccessRule,
    pub hooks: Hooks,
}

impl GlobalDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            versioning: Versioning::Off,
            max_versions: None,
            read: AccessRule::Allow,
            update: AccessRule::Allow,
            hooks: Hooks::default(),
        }
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn versioned(mut self) -> Self {
        self.versioning = Versioning::Plain;
        self
    }

    pub fn workflow(mut self, stages: &[&str], initial_stage: &str) -> Self {
        self.versioning = Versioning::Workflow(WorkflowOptions::new(stages, initial_stage));
        self
    }

    pub fn max_versions(mut self, max: usize) -> Self {
        self.max_versions = Some(max);
        self
    }

    pub fn read_access(mut self, rule: AccessRule) -> Self {
        self.read = rule;
        self
    }

    pub fn update_access(mut self, rule: AccessRule) -> Self {
        self.update = rule;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Collection backing the global.
    ///
    /// Creating the singleton is gated by the update rule; deleting it is
    /// never allowed through the global surface.
    pub(crate) fn into_collection(self) -> CollectionDefinition {
        let mut collection = CollectionDefinition::new(self.name);
        collection.fields = self.fields;
        collection.options.versioning = self.versioning;
        collection.options.max_versions = self.max_versions;
        collection.access = CollectionAccess {
            create: self.update.clone(),
            read: self.read,
            update: self.update,
            delete: AccessRule::Deny,
        };
        collection.hooks = self.hooks;
        collection
    }
}
