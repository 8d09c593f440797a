use crate::error::Result;
use crate::types::TenantId;
use crate::work::coordinator::{ExecutionCoordinator, PlanExecution};
use crate::work::item::WorkItem;
use crate::work::policy::{CommitStrategy, RefreshStrategy};

/// Index-wide operations, applied to every shard of one index.
#[derive(Clone)]
pub struct IndexWorkspace {
    index: String,
    tenant_id: Option<TenantId>,
    coordinator: ExecutionCoordinator,
}

impl IndexWorkspace {
    pub fn new(
        coordinator: ExecutionCoordinator,
        index: impl Into<String>,
        tenant_id: Option<TenantId>,
    ) -> Self {
        IndexWorkspace {
            index: index.into(),
            tenant_id,
            coordinator,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Deletes every document of the index, or only the workspace tenant's.
    pub fn purge(&self, commit: CommitStrategy, refresh: RefreshStrategy) -> Result<PlanExecution> {
        let item = WorkItem::purge_all(self.index.clone(), self.tenant_id.clone());
        self.coordinator
            .submit_index_wide(&self.index, Some(item), commit, refresh)
    }

    pub fn merge_segments(&self) -> Result<PlanExecution> {
        let item = WorkItem::optimize(self.index.clone());
        self.coordinator.submit_index_wide(
            &self.index,
            Some(item),
            CommitStrategy::None,
            RefreshStrategy::None,
        )
    }

    pub fn flush(&self) -> Result<PlanExecution> {
        let item = WorkItem::flush(self.index.clone());
        self.coordinator.submit_index_wide(
            &self.index,
            Some(item),
            CommitStrategy::None,
            RefreshStrategy::None,
        )
    }

    pub fn refresh(&self) -> Result<PlanExecution> {
        self.coordinator.submit_index_wide(
            &self.index,
            None,
            CommitStrategy::None,
            RefreshStrategy::Force,
        )
    }
}
