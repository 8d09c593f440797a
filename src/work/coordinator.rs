//! Fans resolved work items out to shard queues and merges the outcome.

use crate::error::{GriddleError, Result};
use crate::sharding::{ShardRouter, ShardTarget};
use crate::types::EntityKey;
use crate::work::item::WorkItem;
use crate::work::policy::{CommitStrategy, RefreshStrategy};
use crate::work::queue::SerialWorkQueue;
use crate::work::report::{
    EntityIndexingFailureContext, ExecutionReport, FailureContext, FailureHandler,
    LoggingFailureHandler,
};
use crate::work::set::{WorkSet, WorkSetCompletion};
use std::collections::BTreeMap;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

/// Read-only view of the indexes and their shard queues.
pub trait QueueLookup: Send + Sync {
    fn router(&self, index: &str) -> Option<Arc<ShardRouter>>;

    /// Shards that index-wide work must reach. Every shard unless they
    /// share one storage.
    fn index_wide_targets(&self, index: &str) -> Option<Vec<ShardTarget>> {
        self.router(index).map(|router| router.all_targets())
    }

    fn queue(&self, target: &ShardTarget) -> Option<Arc<SerialWorkQueue>>;
}

#[derive(Clone)]
pub struct ExecutionCoordinator {
    lookup: Arc<dyn QueueLookup>,
    failure_handler: Arc<dyn FailureHandler>,
}

impl ExecutionCoordinator {
    pub fn new(lookup: Arc<dyn QueueLookup>, failure_handler: Arc<dyn FailureHandler>) -> Self {
        ExecutionCoordinator {
            lookup,
            failure_handler,
        }
    }

    pub fn failure_handler(&self) -> &Arc<dyn FailureHandler> {
        &self.failure_handler
    }

    /// Routes every item, keeping relative order per shard. Fails before
    /// anything is submitted if any item cannot be routed.
    pub fn group(&self, items: Vec<WorkItem>) -> Result<BTreeMap<ShardTarget, Vec<WorkItem>>> {
        let mut routers: BTreeMap<String, Arc<ShardRouter>> = BTreeMap::new();
        let mut grouped: BTreeMap<ShardTarget, Vec<WorkItem>> = BTreeMap::new();

        for item in items {
            if item.kind().is_index_wide() {
                return Err(GriddleError::UnroutableWork(item.to_string()));
            }
            let router = match routers.get(item.index()) {
                Some(router) => Arc::clone(router),
                None => {
                    let router = self
                        .lookup
                        .router(item.index())
                        .ok_or_else(|| GriddleError::IndexNotFound(item.index().to_string()))?;
                    routers.insert(item.index().to_string(), Arc::clone(&router));
                    router
                }
            };
            let document_id = item.document_id().unwrap_or_default();
            let target = router.route(document_id, item.routing_key())?;
            grouped.entry(target).or_default().push(item);
        }

        Ok(grouped)
    }

    pub fn submit(
        &self,
        items: Vec<WorkItem>,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> Result<PlanExecution> {
        let grouped = self.group(items)?;
        Ok(self.submit_grouped(grouped, commit, refresh))
    }

    /// Sends `item` to every shard of `index` (once for shared remote
    /// storage); `None` submits an empty set, which only runs the
    /// commit/refresh obligations.
    pub fn submit_index_wide(
        &self,
        index: &str,
        item: Option<WorkItem>,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> Result<PlanExecution> {
        let grouped = self
            .lookup
            .index_wide_targets(index)
            .ok_or_else(|| GriddleError::IndexNotFound(index.to_string()))?
            .into_iter()
            .map(|target| (target, item.iter().cloned().collect()))
            .collect();
        Ok(self.submit_grouped(grouped, commit, refresh))
    }

    /// Submits one work set per target without waiting. Rejections are
    /// reported by the queue and show up as failed shard results.
    pub fn submit_grouped(
        &self,
        grouped: BTreeMap<ShardTarget, Vec<WorkItem>>,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> PlanExecution {
        let mut pending = Vec::with_capacity(grouped.len());

        for (target, items) in grouped {
            let (set, completion) = WorkSet::new(target.clone(), items, commit, refresh);
            let entities = set.entities();
            match self.lookup.queue(&target) {
                Some(queue) => {
                    if let Err(e) = queue.submit(set) {
                        tracing::warn!("[Q {}] submission failed: {}", target, e);
                    }
                }
                None => {
                    // The index disappeared between routing and submission.
                    let error = GriddleError::IndexNotFound(target.index.clone());
                    self.failure_handler
                        .handle_entities(EntityIndexingFailureContext {
                            error: error.clone(),
                            failing_operation: format!("Submitting work set to {}", target),
                            failing_entities: entities.clone(),
                        });
                    set.complete(ExecutionReport::failed(entities.clone(), error));
                }
            }
            pending.push(PendingShard {
                target,
                entities,
                completion,
            });
        }

        PlanExecution {
            pending,
            failure_handler: Arc::clone(&self.failure_handler),
        }
    }
}

struct PendingShard {
    target: ShardTarget,
    entities: Vec<EntityKey>,
    completion: WorkSetCompletion,
}

/// Handle on a submitted plan. The writes proceed whether or not this is
/// awaited; awaiting yields the merged report of every shard.
pub struct PlanExecution {
    pending: Vec<PendingShard>,
    failure_handler: Arc<dyn FailureHandler>,
}

impl PlanExecution {
    /// An execution that submitted nothing; resolves to success.
    pub fn empty() -> Self {
        PlanExecution {
            pending: Vec::new(),
            failure_handler: Arc::new(LoggingFailureHandler),
        }
    }

    pub fn submitted_work_sets(&self) -> usize {
        self.pending.len()
    }

    pub fn targets(&self) -> Vec<ShardTarget> {
        self.pending.iter().map(|p| p.target.clone()).collect()
    }

    /// Waits for every shard, never stopping at the first failure. The
    /// merged error is the first one in shard order.
    pub async fn wait(self) -> ExecutionReport {
        let mut merged = ExecutionReport::success();
        for shard in self.pending {
            let report = match shard.completion.await {
                Ok(report) => report,
                Err(_) => {
                    // The worker went away without completing the set.
                    let error = GriddleError::WorkerCrashed(format!(
                        "{}: work set dropped without completion",
                        shard.target
                    ));
                    let failing_operation = format!("Work set on queue {}", shard.target);
                    if shard.entities.is_empty() {
                        self.failure_handler.handle(FailureContext {
                            error: error.clone(),
                            failing_operation,
                        });
                    } else {
                        self.failure_handler
                            .handle_entities(EntityIndexingFailureContext {
                                error: error.clone(),
                                failing_operation,
                                failing_entities: shard.entities.clone(),
                            });
                    }
                    ExecutionReport::failed(shard.entities, error)
                }
            };
            merged.merge(report);
        }
        merged
    }
}

impl IntoFuture for PlanExecution {
    type Output = ExecutionReport;
    type IntoFuture = Pin<Box<dyn Future<Output = ExecutionReport> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl std::fmt::Debug for PlanExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecution")
            .field("targets", &self.targets())
            .finish()
    }
}
