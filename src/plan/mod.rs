//! Per-session indexing plans.
//!
//! A plan coalesces every operation recorded against the same entity and,
//! on [`IndexingPlan::execute`], turns the net effect into at most one work
//! item per entity. Plans are single-session objects and take `&mut self`.

mod entity;
pub mod registry;

pub use registry::{
    ContainingEntity, DocumentContributor, EntityTypeBinding, EntityTypeRegistry, ReindexResolver,
};

use crate::error::{GriddleError, Result};
use crate::types::{Document, EntityHandle, EntityKey, TenantId};
use crate::work::coordinator::{ExecutionCoordinator, PlanExecution};
use crate::work::item::{WorkItem, WorkKind};
use crate::work::policy::{CommitStrategy, RefreshStrategy};
use entity::PendingEntityWork;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Collaborators a plan needs; shared by every plan of a mapping.
#[derive(Clone)]
pub struct PlanContext {
    pub registry: Arc<EntityTypeRegistry>,
    pub coordinator: ExecutionCoordinator,
    pub resolver: Option<Arc<dyn ReindexResolver>>,
}

pub struct IndexingPlan {
    id: Uuid,
    context: PlanContext,
    tenant_id: Option<TenantId>,
    commit: CommitStrategy,
    refresh: RefreshStrategy,
    entries: IndexMap<EntityKey, PendingEntityWork>,
}

impl IndexingPlan {
    pub fn new(context: PlanContext, tenant_id: Option<TenantId>) -> Self {
        IndexingPlan {
            id: Uuid::new_v4(),
            context,
            tenant_id,
            commit: CommitStrategy::None,
            refresh: RefreshStrategy::None,
            entries: IndexMap::new(),
        }
    }

    pub fn with_commit_strategy(mut self, commit: CommitStrategy) -> Self {
        self.commit = commit;
        self
    }

    pub fn with_refresh_strategy(mut self, refresh: RefreshStrategy) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Entities with pending work, cancelled ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&mut self, entity_type: &str, id: String) -> Result<&mut PendingEntityWork> {
        self.context.registry.get(entity_type)?;
        Ok(self
            .entries
            .entry(EntityKey::new(entity_type, id))
            .or_default())
    }

    pub fn add(&mut self, entity_type: &str, id: impl Into<String>, entity: EntityHandle) -> Result<()> {
        self.entry(entity_type, id.into())?.add(entity);
        Ok(())
    }

    pub fn update(
        &mut self,
        entity_type: &str,
        id: impl Into<String>,
        entity: EntityHandle,
    ) -> Result<()> {
        self.entry(entity_type, id.into())?.update(entity, None);
        Ok(())
    }

    /// Update restricted to the given property paths.
    pub fn update_paths<I, S>(
        &mut self,
        entity_type: &str,
        id: impl Into<String>,
        entity: EntityHandle,
        dirty_paths: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: BTreeSet<String> = dirty_paths.into_iter().map(Into::into).collect();
        self.entry(entity_type, id.into())?
            .update(entity, Some(paths));
        Ok(())
    }

    pub fn delete(
        &mut self,
        entity_type: &str,
        id: impl Into<String>,
        entity: Option<EntityHandle>,
    ) -> Result<()> {
        self.entry(entity_type, id.into())?.delete(entity);
        Ok(())
    }

    /// Deletes the document by id, whatever else was recorded for it.
    pub fn purge(&mut self, entity_type: &str, id: impl Into<String>) -> Result<()> {
        self.purge_with(entity_type, id.into(), None)
    }

    pub fn purge_routed(
        &mut self,
        entity_type: &str,
        id: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Result<()> {
        self.purge_with(entity_type, id.into(), Some(routing_key.into()))
    }

    fn purge_with(&mut self, entity_type: &str, id: String, routing_key: Option<String>) -> Result<()> {
        let binding = self.context.registry.get(entity_type)?;
        if !binding.has_identifier_mapping() {
            return Err(GriddleError::MissingIdentifierMapping(
                entity_type.to_string(),
            ));
        }
        self.entry(entity_type, id)?.purge(routing_key);
        Ok(())
    }

    /// Reindex `entity` because something it embeds changed.
    pub fn update_because_of_contained(
        &mut self,
        entity_type: &str,
        id: impl Into<String>,
        entity: EntityHandle,
    ) -> Result<()> {
        self.entry(entity_type, id.into())?
            .update_because_of_contained(entity);
        Ok(())
    }

    /// Runs reindex resolution once for every entity that asked for it.
    pub fn prepare(&mut self) -> Result<()> {
        let mut requests = Vec::new();
        for (key, work) in self.entries.iter_mut() {
            if work.take_resolution_request() {
                requests.push((key.clone(), work.entity().cloned(), work.dirty_paths()));
            }
        }

        let Some(resolver) = self.context.resolver.clone() else {
            return Ok(());
        };
        for (key, entity, dirty) in requests {
            for containing in resolver.resolve(&key, entity.as_ref(), &dirty) {
                self.update_because_of_contained(
                    &containing.key.entity_type,
                    containing.key.id,
                    containing.entity,
                )?;
            }
        }
        Ok(())
    }

    /// Resolves every pending entity and submits the work. Nothing is
    /// submitted when an error is returned. The plan is empty afterwards
    /// either way.
    pub fn execute(&mut self) -> Result<PlanExecution> {
        let prepared = self.prepare();
        let entries = std::mem::take(&mut self.entries);
        prepared?;

        let mut items = Vec::with_capacity(entries.len());
        for (key, work) in entries {
            if let Some(item) = self.resolve(key, &work)? {
                items.push(item);
            }
        }

        if items.is_empty() {
            tracing::debug!(plan = %self.id, "nothing to index");
            return Ok(PlanExecution::empty());
        }
        tracing::debug!(plan = %self.id, items = items.len(), "submitting indexing plan");
        self.context
            .coordinator
            .submit(items, self.commit, self.refresh)
    }

    /// Drops every pending operation without submitting anything.
    pub fn discard(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(plan = %self.id, entities = self.entries.len(), "discarding plan");
        }
        self.entries.clear();
    }

    fn resolve(&self, key: EntityKey, work: &PendingEntityWork) -> Result<Option<WorkItem>> {
        let Some(kind) = work.resolves_to() else {
            return Ok(None);
        };
        let binding = self.context.registry.get(&key.entity_type)?;
        let Some(index) = binding.index() else {
            return Ok(None);
        };
        let tenant = self.tenant_id.clone();
        let contributor = binding.contributor();

        let routing_key = match (work.routing_key(), contributor, work.entity()) {
            (Some(explicit), _, _) => Some(explicit.to_string()),
            (None, Some(contributor), Some(entity)) => contributor.routing_key(entity),
            _ => None,
        };

        if kind == WorkKind::Delete {
            return Ok(Some(WorkItem::delete(index, tenant, key, routing_key)));
        }

        let dirty = work.dirty_paths();
        if kind == WorkKind::Update
            && !work.updated_because_of_contained()
            && !binding.affects_document(&dirty)
        {
            tracing::trace!(plan = %self.id, entity = %key, "no indexed path changed");
            return Ok(None);
        }

        let document = self.contribute(&key, binding, work)?;
        Ok(Some(match kind {
            WorkKind::Add => WorkItem::add(index, tenant, key, routing_key, document),
            _ => WorkItem::update(index, tenant, key, routing_key, document, dirty),
        }))
    }

    fn contribute(
        &self,
        key: &EntityKey,
        binding: &EntityTypeBinding,
        work: &PendingEntityWork,
    ) -> Result<Document> {
        let contribution_error = |message: String| GriddleError::DocumentContribution {
            entity: key.to_string(),
            message,
        };
        let contributor = binding
            .contributor()
            .ok_or_else(|| contribution_error("no document contributor".to_string()))?;
        let entity = work
            .entity()
            .ok_or_else(|| contribution_error("no entity instance".to_string()))?;

        let mut document = Document::new(key.id.clone());
        contributor
            .contribute(entity, &mut document)
            .map_err(|e| match e {
                GriddleError::DocumentContribution { .. } => e,
                other => contribution_error(other.to_string()),
            })?;
        Ok(document)
    }
}

impl Drop for IndexingPlan {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(
                plan = %self.id,
                entities = self.entries.len(),
                "plan dropped with unexecuted work"
            );
        }
    }
}
