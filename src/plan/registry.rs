//! Entity types known to the indexing core and the callbacks bound to them.

use crate::error::{GriddleError, Result};
use crate::types::{Document, EntityHandle, EntityKey};
use crate::work::item::DirtyPaths;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Turns an entity instance into a document payload.
pub trait DocumentContributor: Send + Sync {
    fn contribute(&self, entity: &EntityHandle, document: &mut Document) -> Result<()>;

    /// Routing key sent with the entity's work items. `None` routes by id.
    fn routing_key(&self, _entity: &EntityHandle) -> Option<String> {
        None
    }
}

impl<F> DocumentContributor for F
where
    F: Fn(&EntityHandle, &mut Document) -> Result<()> + Send + Sync,
{
    fn contribute(&self, entity: &EntityHandle, document: &mut Document) -> Result<()> {
        self(entity, document)
    }
}

/// How one entity type maps onto an index.
#[derive(Clone)]
pub struct EntityTypeBinding {
    entity_type: String,
    index: Option<String>,
    identifier_mapping: bool,
    contributor: Option<Arc<dyn DocumentContributor>>,
    indexed_paths: Option<BTreeSet<String>>,
}

impl EntityTypeBinding {
    pub fn indexed(
        entity_type: impl Into<String>,
        index: impl Into<String>,
        contributor: impl DocumentContributor + 'static,
    ) -> Self {
        EntityTypeBinding {
            entity_type: entity_type.into(),
            index: Some(index.into()),
            identifier_mapping: true,
            contributor: Some(Arc::new(contributor)),
            indexed_paths: None,
        }
    }

    /// A type that is never indexed itself but is embedded in indexed types.
    pub fn contained(entity_type: impl Into<String>) -> Self {
        EntityTypeBinding {
            entity_type: entity_type.into(),
            index: None,
            identifier_mapping: true,
            contributor: None,
            indexed_paths: None,
        }
    }

    pub fn without_identifier_mapping(mut self) -> Self {
        self.identifier_mapping = false;
        self
    }

    /// Declares which property paths end up in the document. Updates that
    /// touch none of them are skipped.
    pub fn with_indexed_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexed_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    pub fn has_identifier_mapping(&self) -> bool {
        self.identifier_mapping
    }

    pub fn contributor(&self) -> Option<&Arc<dyn DocumentContributor>> {
        self.contributor.as_ref()
    }

    pub fn affects_document(&self, dirty: &DirtyPaths) -> bool {
        match (&self.indexed_paths, dirty) {
            (None, _) | (_, DirtyPaths::All) => true,
            (Some(indexed), DirtyPaths::Paths(paths)) => paths.iter().any(|p| indexed.contains(p)),
        }
    }
}

impl std::fmt::Debug for EntityTypeBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityTypeBinding")
            .field("entity_type", &self.entity_type)
            .field("index", &self.index)
            .field("identifier_mapping", &self.identifier_mapping)
            .field("indexed_paths", &self.indexed_paths)
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct EntityTypeRegistry {
    bindings: HashMap<String, Arc<EntityTypeBinding>>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents are identified by tenant and id only, so an index holds a
    /// single indexed entity type.
    pub fn register(&mut self, binding: EntityTypeBinding) -> Result<()> {
        if self.bindings.contains_key(binding.entity_type()) {
            return Err(GriddleError::Config(format!(
                "entity type {} registered twice",
                binding.entity_type()
            )));
        }
        if let Some(index) = binding.index() {
            let claimed = self
                .bindings
                .values()
                .find(|other| other.index() == Some(index));
            if let Some(other) = claimed {
                return Err(GriddleError::Config(format!(
                    "index {} is already bound to entity type {}, cannot bind {}",
                    index,
                    other.entity_type(),
                    binding.entity_type()
                )));
            }
        }
        self.bindings
            .insert(binding.entity_type().to_string(), Arc::new(binding));
        Ok(())
    }

    pub fn get(&self, entity_type: &str) -> Result<&Arc<EntityTypeBinding>> {
        self.bindings
            .get(entity_type)
            .ok_or_else(|| GriddleError::UnknownEntityType(entity_type.to_string()))
    }

    /// Names of every index some registered type writes to.
    pub fn indexes(&self) -> BTreeSet<&str> {
        self.bindings.values().filter_map(|b| b.index()).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// An entity that embeds a changed entity and must be reindexed with it.
#[derive(Clone)]
pub struct ContainingEntity {
    pub key: EntityKey,
    pub entity: EntityHandle,
}

impl ContainingEntity {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>, entity: EntityHandle) -> Self {
        ContainingEntity {
            key: EntityKey::new(entity_type, id),
            entity,
        }
    }
}

/// Finds the entities to reindex because `changed` changed.
pub trait ReindexResolver: Send + Sync {
    fn resolve(
        &self,
        changed: &EntityKey,
        entity: Option<&EntityHandle>,
        dirty: &DirtyPaths,
    ) -> Vec<ContainingEntity>;
}

impl<F> ReindexResolver for F
where
    F: Fn(&EntityKey, Option<&EntityHandle>, &DirtyPaths) -> Vec<ContainingEntity> + Send + Sync,
{
    fn resolve(
        &self,
        changed: &EntityKey,
        entity: Option<&EntityHandle>,
        dirty: &DirtyPaths,
    ) -> Vec<ContainingEntity> {
        self(changed, entity, dirty)
    }
}
