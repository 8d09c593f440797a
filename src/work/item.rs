use crate::types::{Document, EntityKey, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Add,
    Update,
    Delete,
    PurgeAll,
    Optimize,
    Flush,
}

impl WorkKind {
    /// Index-wide work targets every shard instead of one routed document.
    pub fn is_index_wide(self) -> bool {
        matches!(self, WorkKind::PurgeAll | WorkKind::Optimize | WorkKind::Flush)
    }

    /// Whether executing this kind leaves uncommitted changes in the writer.
    pub fn leaves_uncommitted(self) -> bool {
        matches!(
            self,
            WorkKind::Add | WorkKind::Update | WorkKind::Delete | WorkKind::PurgeAll
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkKind::Add => "ADD",
            WorkKind::Update => "UPDATE",
            WorkKind::Delete => "DELETE",
            WorkKind::PurgeAll => "PURGE_ALL",
            WorkKind::Optimize => "OPTIMIZE",
            WorkKind::Flush => "FLUSH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyPaths {
    All,
    Paths(BTreeSet<String>),
}

impl DirtyPaths {
    pub fn is_all(&self) -> bool {
        matches!(self, DirtyPaths::All)
    }

    pub fn contains(&self, path: &str) -> bool {
        match self {
            DirtyPaths::All => true,
            DirtyPaths::Paths(paths) => paths.contains(path),
        }
    }
}

/// One document-level (or index-wide) mutation, immutable once built.
#[derive(Debug, Clone)]
pub struct WorkItem {
    kind: WorkKind,
    index: String,
    tenant_id: Option<TenantId>,
    entity: Option<EntityKey>,
    routing_key: Option<String>,
    document: Option<Document>,
    dirty_paths: Option<DirtyPaths>,
}

impl WorkItem {
    pub fn add(
        index: impl Into<String>,
        tenant_id: Option<TenantId>,
        entity: EntityKey,
        routing_key: Option<String>,
        document: Document,
    ) -> Self {
        WorkItem {
            kind: WorkKind::Add,
            index: index.into(),
            tenant_id,
            entity: Some(entity),
            routing_key,
            document: Some(document),
            dirty_paths: Some(DirtyPaths::All),
        }
    }

    pub fn update(
        index: impl Into<String>,
        tenant_id: Option<TenantId>,
        entity: EntityKey,
        routing_key: Option<String>,
        document: Document,
        dirty_paths: DirtyPaths,
    ) -> Self {
        WorkItem {
            kind: WorkKind::Update,
            index: index.into(),
            tenant_id,
            entity: Some(entity),
            routing_key,
            document: Some(document),
            dirty_paths: Some(dirty_paths),
        }
    }

    pub fn delete(
        index: impl Into<String>,
        tenant_id: Option<TenantId>,
        entity: EntityKey,
        routing_key: Option<String>,
    ) -> Self {
        WorkItem {
            kind: WorkKind::Delete,
            index: index.into(),
            tenant_id,
            entity: Some(entity),
            routing_key,
            document: None,
            dirty_paths: None,
        }
    }

    /// Deletes every document of the index, or only the tenant's documents.
    pub fn purge_all(index: impl Into<String>, tenant_id: Option<TenantId>) -> Self {
        Self::index_wide(WorkKind::PurgeAll, index, tenant_id)
    }

    pub fn optimize(index: impl Into<String>) -> Self {
        Self::index_wide(WorkKind::Optimize, index, None)
    }

    pub fn flush(index: impl Into<String>) -> Self {
        Self::index_wide(WorkKind::Flush, index, None)
    }

    fn index_wide(kind: WorkKind, index: impl Into<String>, tenant_id: Option<TenantId>) -> Self {
        WorkItem {
            kind,
            index: index.into(),
            tenant_id,
            entity: None,
            routing_key: None,
            document: None,
            dirty_paths: None,
        }
    }

    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn entity(&self) -> Option<&EntityKey> {
        self.entity.as_ref()
    }

    pub fn document_id(&self) -> Option<&str> {
        self.entity.as_ref().map(|e| e.id.as_str())
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn dirty_paths(&self) -> Option<&DirtyPaths> {
        self.dirty_paths.as_ref()
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.index)?;
        if let Some(entity) = &self.entity {
            write!(f, "/{}", entity)?;
        }
        if let Some(tenant) = &self.tenant_id {
            write!(f, " (tenant {})", tenant)?;
        }
        Ok(())
    }
}
