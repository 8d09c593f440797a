use crate::sharding::ShardTarget;
use crate::types::EntityKey;
use crate::work::item::WorkItem;
use crate::work::policy::{CommitStrategy, RefreshStrategy};
use crate::work::report::ExecutionReport;
use tokio::sync::oneshot;

pub type WorkSetCompletion = oneshot::Receiver<ExecutionReport>;

/// Ordered work items for a single shard, submitted to its queue as a unit.
pub struct WorkSet {
    target: ShardTarget,
    items: Vec<WorkItem>,
    commit: CommitStrategy,
    refresh: RefreshStrategy,
    completion: oneshot::Sender<ExecutionReport>,
}

impl WorkSet {
    pub fn new(
        target: ShardTarget,
        items: Vec<WorkItem>,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> (Self, WorkSetCompletion) {
        let (tx, rx) = oneshot::channel();
        let set = WorkSet {
            target,
            items,
            commit,
            refresh,
            completion: tx,
        };
        (set, rx)
    }

    pub fn target(&self) -> &ShardTarget {
        &self.target
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn commit_strategy(&self) -> CommitStrategy {
        self.commit
    }

    pub fn refresh_strategy(&self) -> RefreshStrategy {
        self.refresh
    }

    pub fn entities(&self) -> Vec<EntityKey> {
        self.items.iter().filter_map(|i| i.entity().cloned()).collect()
    }

    /// Resolves the completion handle. A caller that stopped waiting is not an error.
    pub(crate) fn complete(self, report: ExecutionReport) {
        let _ = self.completion.send(report);
    }
}

impl std::fmt::Debug for WorkSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkSet")
            .field("target", &self.target)
            .field("items", &self.items.len())
            .field("commit", &self.commit)
            .field("refresh", &self.refresh)
            .finish()
    }
}
