//! Serial per-shard work queue.
//!
//! One tokio task per queue drains submitted work sets in FIFO order. Sets
//! already waiting in the channel are grouped into batches of at most
//! `max_bulk_size` items; every set still runs fail-fast on its own, and the
//! forced commit/refresh of the batch runs once before any completion
//! handle of that batch resolves.

use crate::backend::{ShardWriter, UnwindGuard};
use crate::config::IndexingConfig;
use crate::error::{GriddleError, Result};
use crate::work::item::WorkKind;
use crate::work::policy::PolicyEnforcer;
use crate::work::report::{
    EntityIndexingFailureContext, ExecutionReport, FailureContext, FailureHandler,
};
use crate::work::set::WorkSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Executing,
    /// The last batch contained a failure; cleared when the next batch starts.
    Failed,
}

impl QueueState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => QueueState::Executing,
            2 => QueueState::Failed,
            _ => QueueState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            QueueState::Idle => 0,
            QueueState::Executing => 1,
            QueueState::Failed => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub max_bulk_size: usize,
    pub commit_interval: Option<Duration>,
}

impl From<&IndexingConfig> for QueueConfig {
    fn from(config: &IndexingConfig) -> Self {
        QueueConfig {
            capacity: config.queue_size,
            max_bulk_size: config.max_bulk_size,
            commit_interval: config.commit_interval(),
        }
    }
}

pub struct SerialWorkQueue {
    name: String,
    sender: mpsc::Sender<WorkSet>,
    capacity: usize,
    state: Arc<AtomicU8>,
    failure_handler: Arc<dyn FailureHandler>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl SerialWorkQueue {
    /// Spawns the queue's worker on the current tokio runtime.
    pub fn start(
        name: impl Into<String>,
        writer: Box<dyn ShardWriter>,
        config: QueueConfig,
        failure_handler: Arc<dyn FailureHandler>,
    ) -> Self {
        let name = name.into();
        let capacity = config.capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Arc::new(AtomicU8::new(QueueState::Idle.as_u8()));

        let worker = QueueWorker {
            name: name.clone(),
            writer: Box::new(UnwindGuard::new(name.clone(), writer)),
            policy: PolicyEnforcer::new(config.commit_interval),
            failure_handler: Arc::clone(&failure_handler),
            state: Arc::clone(&state),
            max_bulk_size: config.max_bulk_size.max(1),
        };
        let handle = tokio::spawn(worker.run(rx, shutdown_rx));

        SerialWorkQueue {
            name,
            sender: tx,
            capacity,
            state,
            failure_handler,
            shutdown: Mutex::new(Some(shutdown_tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> QueueState {
        QueueState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Work sets waiting in the channel, not counting the batch in flight.
    pub fn pending(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Enqueues without waiting. A rejected set is completed as failed and
    /// reported before the error is returned.
    pub fn submit(&self, set: WorkSet) -> Result<()> {
        match self.sender.try_send(set) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(set)) => {
                let error = GriddleError::QueueFull {
                    queue: self.name.clone(),
                    capacity: self.capacity,
                };
                tracing::warn!("[Q {}] rejecting work set: queue full", self.name);
                report_set_failure(&self.name, self.failure_handler.as_ref(), set, error.clone());
                Err(error)
            }
            Err(mpsc::error::TrySendError::Closed(set)) => {
                let error = GriddleError::QueueClosed(self.name.clone());
                report_set_failure(&self.name, self.failure_handler.as_ref(), set, error.clone());
                Err(error)
            }
        }
    }

    /// Stops the worker after the batch in flight; queued work sets are
    /// failed, then the writer's final commit runs. Calling twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let shutdown = self.shutdown.lock().ok().and_then(|mut s| s.take());
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let error = GriddleError::WorkerCrashed(format!("{}: {}", self.name, e));
                    self.failure_handler.handle(FailureContext {
                        error: error.clone(),
                        failing_operation: format!("Closing queue {}", self.name),
                    });
                    Err(error)
                }
            },
            None => Ok(()),
        }
    }
}

impl Drop for SerialWorkQueue {
    fn drop(&mut self) {
        if let Ok(mut shutdown) = self.shutdown.lock() {
            if let Some(tx) = shutdown.take() {
                let _ = tx.send(());
            }
        }
    }
}

fn report_set_failure(
    queue: &str,
    failure_handler: &dyn FailureHandler,
    set: WorkSet,
    error: GriddleError,
) {
    let entities = set.entities();
    let failing_operation = format!("Work set of {} item(s) on queue {}", set.len(), queue);
    if entities.is_empty() {
        failure_handler.handle(FailureContext {
            error: error.clone(),
            failing_operation,
        });
    } else {
        failure_handler.handle_entities(EntityIndexingFailureContext {
            error: error.clone(),
            failing_operation,
            failing_entities: entities.clone(),
        });
    }
    set.complete(ExecutionReport::failed(entities, error));
}

enum Received {
    Set(WorkSet),
    Deadline,
    Closed,
}

struct QueueWorker {
    name: String,
    writer: Box<dyn ShardWriter>,
    policy: PolicyEnforcer,
    failure_handler: Arc<dyn FailureHandler>,
    state: Arc<AtomicU8>,
    max_bulk_size: usize,
}

impl QueueWorker {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<WorkSet>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<()> {
        tracing::info!("[Q {}] worker started", self.name);

        loop {
            let deadline = self.policy.next_deadline();
            let received = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                received = next_message(&mut rx, deadline) => received,
            };

            match received {
                Received::Set(first) => {
                    let batch = self.drain_batch(first, &mut rx);
                    self.execute_batch(batch).await;
                }
                Received::Deadline => {
                    tracing::debug!("[Q {}] scheduled commit", self.name);
                    if let Err(e) = self.policy.scheduled_commit(self.writer.as_mut()).await {
                        self.failure_handler.handle(FailureContext {
                            error: e,
                            failing_operation: format!("Scheduled commit on queue {}", self.name),
                        });
                    }
                }
                Received::Closed => break,
            }
        }

        self.shutdown(rx).await
    }

    fn set_state(&self, state: QueueState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn drain_batch(&self, first: WorkSet, rx: &mut mpsc::Receiver<WorkSet>) -> Vec<WorkSet> {
        let mut size = first.len().max(1);
        let mut batch = vec![first];
        while size < self.max_bulk_size {
            match rx.try_recv() {
                Ok(set) => {
                    size += set.len().max(1);
                    batch.push(set);
                }
                Err(_) => break,
            }
        }
        batch
    }

    async fn execute_batch(&mut self, batch: Vec<WorkSet>) {
        self.set_state(QueueState::Executing);
        tracing::debug!("[Q {}] executing batch of {} work set(s)", self.name, batch.len());

        if let Err(e) = self.policy.before_work_set(self.writer.as_mut()).await {
            self.failure_handler.handle(FailureContext {
                error: e,
                failing_operation: format!("Scheduled commit on queue {}", self.name),
            });
        }

        let mut executed = Vec::with_capacity(batch.len());
        for set in batch {
            let error = self.execute_set(&set).await;
            if error.is_none() {
                self.policy
                    .after_successful_work_set(set.commit_strategy(), set.refresh_strategy());
            }
            executed.push((set, error));
        }

        let outcome = self.policy.end_batch(self.writer.as_mut()).await;
        if let Some(e) = &outcome.commit_error {
            tracing::error!("[Q {}] forced commit failed: {}", self.name, e);
        }
        if let Some(e) = &outcome.refresh_error {
            tracing::error!("[Q {}] forced refresh failed: {}", self.name, e);
        }

        let results: Vec<(WorkSet, Option<GriddleError>)> = executed
            .into_iter()
            .map(|(set, error)| {
                let error = error
                    .or_else(|| outcome.error_for(set.commit_strategy(), set.refresh_strategy()));
                (set, error)
            })
            .collect();

        // The state is published before any completion resolves.
        let failed = results.iter().any(|(_, error)| error.is_some());
        self.set_state(if failed {
            QueueState::Failed
        } else {
            QueueState::Idle
        });

        for (set, error) in results {
            match error {
                None => set.complete(ExecutionReport::success()),
                Some(e) => report_set_failure(&self.name, self.failure_handler.as_ref(), set, e),
            }
        }
    }

    /// Runs the items in order, stopping at the first failure.
    async fn execute_set(&mut self, set: &WorkSet) -> Option<GriddleError> {
        for (position, item) in set.items().iter().enumerate() {
            if let Err(e) = self.writer.execute(item).await {
                tracing::warn!(
                    "[Q {}] {} failed at item {}/{}: {}; skipping the rest of the work set",
                    self.name,
                    item,
                    position + 1,
                    set.len(),
                    e
                );
                return Some(e);
            }
            if item.kind().leaves_uncommitted() {
                self.policy.record_write();
            } else if item.kind() == WorkKind::Flush {
                self.policy.mark_committed();
            }
        }
        None
    }

    async fn shutdown(mut self, mut rx: mpsc::Receiver<WorkSet>) -> Result<()> {
        rx.close();
        let mut abandoned = 0usize;
        while let Ok(set) = rx.try_recv() {
            abandoned += 1;
            report_set_failure(
                &self.name,
                self.failure_handler.as_ref(),
                set,
                GriddleError::QueueClosed(self.name.clone()),
            );
        }
        tracing::info!(
            "[Q {}] shutting down, {} queued work set(s) abandoned",
            self.name,
            abandoned
        );

        let result = self.writer.close().await;
        match &result {
            Ok(()) => self.policy.mark_committed(),
            Err(e) => self.failure_handler.handle(FailureContext {
                error: e.clone(),
                failing_operation: format!("Final commit on queue {}", self.name),
            }),
        }
        self.set_state(QueueState::Idle);
        result
    }
}

async fn next_message(rx: &mut mpsc::Receiver<WorkSet>, deadline: Option<Instant>) -> Received {
    match deadline {
        Some(at) => match timeout_at(at, rx.recv()).await {
            Ok(Some(set)) => Received::Set(set),
            Ok(None) => Received::Closed,
            Err(_) => Received::Deadline,
        },
        None => match rx.recv().await {
            Some(set) => Received::Set(set),
            None => Received::Closed,
        },
    }
}
