//! Repository builder and the immutable collection registry.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::RepoConfig;
use crate::crud::Collection;
use crate::error::{RepoError, Result};
use crate::global::Global;
use crate::jobs::{InMemoryJobQueue, JobQueue};
use crate::relation::{resolve_relations, RelationConfig};
use crate::schema::{
    derive_collection, derive_shapes, primary_key_column, CollectionDefinition, CollectionSchema,
    FieldDefinition, FieldType, FieldTypeRegistry, GlobalDefinition, RecordShapes,
};
use crate::store::Store;
use crate::upload::StorageDriver;

/// Optional capability composed into a builder at construction time.
///
/// Extensions are applied once per name when the repository is built; adding
/// an extension with a name already present has no effect.
pub trait BuilderExtension: Send + Sync {
    /// Unique extension name.
    fn name(&self) -> &str;

    /// Adds field types, collections or decorations to the builder.
    fn extend(&self, builder: &mut RepositoryBuilder) -> Result<()>;
}

/// Everything the engine knows about one collection after the build.
#[derive(Debug)]
pub struct CollectionRuntime {
    pub definition: CollectionDefinition,
    pub schema: CollectionSchema,
    pub relations: IndexMap<String, RelationConfig>,
    pub shapes: RecordShapes,
    /// Backs a global rather than a collection
    pub is_global: bool,
}

impl CollectionRuntime {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.definition.get_field(name)
    }
}

/// Collects definitions and builds a `Repository`.
pub struct RepositoryBuilder {
    config: RepoConfig,
    field_types: FieldTypeRegistry,
    collections: Vec<CollectionDefinition>,
    globals: Vec<GlobalDefinition>,
    extensions: IndexMap<String, Arc<dyn BuilderExtension>>,
    jobs: Option<Arc<dyn JobQueue>>,
    storage: Option<Arc<dyn StorageDriver>>,
    errors: Vec<RepoError>,
}

impl RepositoryBuilder {
    pub fn new(config: RepoConfig) -> Self {
        let mut errors = Vec::new();
        let field_types = FieldTypeRegistry::with_builtins().unwrap_or_else(|e| {
            errors.push(e);
            FieldTypeRegistry::new()
        });
        Self {
            config,
            field_types,
            collections: Vec::new(),
            globals: Vec::new(),
            extensions: IndexMap::new(),
            jobs: None,
            storage: None,
            errors,
        }
    }

    pub fn collection(mut self, definition: CollectionDefinition) -> Self {
        self.add_collection(definition);
        self
    }

    pub fn global(mut self, definition: GlobalDefinition) -> Self {
        self.add_global(definition);
        self
    }

    /// Registers a custom field type; a duplicate name fails the build.
    pub fn field_type(mut self, field_type: Arc<dyn FieldType>) -> Self {
        if let Err(e) = self.register_field_type(field_type) {
            self.errors.push(e);
        }
        self
    }

    pub fn job_queue(mut self, jobs: Arc<dyn JobQueue>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn storage_driver(mut self, storage: Arc<dyn StorageDriver>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn extension(mut self, extension: Arc<dyn BuilderExtension>) -> Self {
        let name = extension.name().to_string();
        self.extensions.entry(name).or_insert(extension);
        self
    }

    pub fn add_collection(&mut self, definition: CollectionDefinition) {
        self.collections.push(definition);
    }

    pub fn add_global(&mut self, definition: GlobalDefinition) {
        self.globals.push(definition);
    }

    pub fn register_field_type(&mut self, field_type: Arc<dyn FieldType>) -> Result<()> {
        self.field_types.register(field_type)
    }

    /// Mutable access to a collection added so far.
    pub fn collection_mut(&mut self, name: &str) -> Option<&mut CollectionDefinition> {
        self.collections.iter_mut().find(|c| c.name == name)
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Resolves relations, derives every table and creates it in a fresh store.
    pub fn build(mut self) -> Result<Repository> {
        self.config.validate()?;

        let extensions = std::mem::take(&mut self.extensions);
        for (name, extension) in &extensions {
            extension.extend(&mut self)?;
            tracing::debug!(extension = %name, "applied builder extension");
        }
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let mut definitions: IndexMap<String, (CollectionDefinition, bool)> = IndexMap::new();
        let declared = self
            .collections
            .into_iter()
            .map(|c| (c, false))
            .chain(self.globals.into_iter().map(|g| (g.into_collection(), true)));
        for (definition, is_global) in declared {
            if definitions.contains_key(&definition.name) {
                return Err(RepoError::DuplicateCollection(definition.name));
            }
            definitions.insert(definition.name.clone(), (definition, is_global));
        }

        let mut keys = IndexMap::with_capacity(definitions.len());
        for (name, (definition, _)) in &definitions {
            for field in &definition.fields {
                self.field_types.for_field(name, field)?;
            }
            if let Some(workflow) = definition.options.versioning.workflow() {
                if !workflow.has_stage(&workflow.initial_stage) {
                    return Err(RepoError::UnknownStage {
                        collection: name.clone(),
                        stage: workflow.initial_stage.clone(),
                    });
                }
            }
            let key = primary_key_column(definition, &self.field_types, self.config.id_strategy)?;
            keys.insert(name.clone(), key);
        }

        let plain: IndexMap<String, CollectionDefinition> = definitions
            .iter()
            .map(|(name, (definition, _))| (name.clone(), definition.clone()))
            .collect();
        let mut relations = resolve_relations(&plain, &keys)?;

        let store = Store::new();
        let mut collections = IndexMap::with_capacity(definitions.len());
        for (name, (definition, is_global)) in definitions {
            let relations = relations.shift_remove(&name).unwrap_or_default();
            let key = &keys[&name];
            let schema = derive_collection(&definition, &self.field_types, &relations, key)?;
            for table in schema.tables.iter() {
                store.create_table(table.clone())?;
            }
            let shapes = derive_shapes(&definition, &schema, &relations);
            collections.insert(
                name,
                CollectionRuntime {
                    definition,
                    schema,
                    relations,
                    shapes,
                    is_global,
                },
            );
        }

        tracing::info!(
            collections = collections.len(),
            tables = store.table_count(),
            "repository built"
        );

        Ok(Repository {
            config: self.config,
            store,
            field_types: self.field_types,
            collections,
            jobs: self
                .jobs
                .unwrap_or_else(|| Arc::new(InMemoryJobQueue::new())),
            storage: self.storage,
        })
    }
}

impl fmt::Debug for RepositoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryBuilder")
            .field("collections", &self.collections.len())
            .field("globals", &self.globals.len())
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Built repository: immutable registry over a shared store.
pub struct Repository {
    config: RepoConfig,
    store: Store,
    field_types: FieldTypeRegistry,
    collections: IndexMap<String, CollectionRuntime>,
    jobs: Arc<dyn JobQueue>,
    storage: Option<Arc<dyn StorageDriver>>,
}

impl Repository {
    pub fn builder(config: RepoConfig) -> RepositoryBuilder {
        RepositoryBuilder::new(config)
    }

    /// Operations on a collection.
    pub fn collection(&self, name: &str) -> Result<Collection<'_>> {
        match self.collections.get(name) {
            Some(runtime) if !runtime.is_global => Ok(Collection::new(self, runtime)),
            _ => Err(RepoError::CollectionNotFound(name.to_string())),
        }
    }

    /// Operations on a global.
    pub fn global(&self, name: &str) -> Result<Global<'_>> {
        match self.collections.get(name) {
            Some(runtime) if runtime.is_global => Ok(Global::new(Collection::new(self, runtime))),
            _ => Err(RepoError::CollectionNotFound(name.to_string())),
        }
    }

    /// Collection or global runtime by name.
    pub fn runtime(&self, name: &str) -> Result<&CollectionRuntime> {
        self.collections
            .get(name)
            .ok_or_else(|| RepoError::CollectionNotFound(name.to_string()))
    }

    pub(crate) fn any_collection(&self, name: &str) -> Result<Collection<'_>> {
        Ok(Collection::new(self, self.runtime(name)?))
    }

    /// Collection names in registration order.
    pub fn collection_names(&self) -> Vec<&str> {
        self.collections
            .values()
            .filter(|c| !c.is_global)
            .map(|c| c.name())
            .collect()
    }

    pub fn global_names(&self) -> Vec<&str> {
        self.collections
            .values()
            .filter(|c| c.is_global)
            .map(|c| c.name())
            .collect()
    }

    /// Every collection and global runtime in registration order.
    pub fn runtimes(&self) -> impl Iterator<Item = &CollectionRuntime> {
        self.collections.values()
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn field_types(&self) -> &FieldTypeRegistry {
        &self.field_types
    }

    pub fn jobs(&self) -> &Arc<dyn JobQueue> {
        &self.jobs
    }

    pub(crate) fn storage(&self) -> Option<&Arc<dyn StorageDriver>> {
        self.storage.as_ref()
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .field("tables", &self.store.table_count())
            .finish()
    }
}
