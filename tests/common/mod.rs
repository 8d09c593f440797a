#![allow(dead_code)]

use async_trait::async_trait;
use griddle::backend::ShardWriter;
use griddle::types::{Document, EntityHandle, EntityKey};
use griddle::work::{
    DirtyPaths, EntityIndexingFailureContext, FailureContext, FailureHandler, WorkItem, WorkKind,
};
use griddle::{
    DocumentContributor, EntityTypeBinding, GriddleError, IndexingConfig, SearchMapping,
    SearchMappingBuilder, ShardTarget, ShardingStrategy,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ============================================================
// Entities
// ============================================================

pub struct Book {
    pub title: String,
    pub author: Option<String>,
}

pub fn book(title: &str) -> EntityHandle {
    Arc::new(Book {
        title: title.to_string(),
        author: None,
    })
}

pub fn routed_book(title: &str, author: &str) -> EntityHandle {
    Arc::new(Book {
        title: title.to_string(),
        author: Some(author.to_string()),
    })
}

pub fn book_key(id: &str) -> EntityKey {
    EntityKey::new("Book", id)
}

/// Books are routed by author when they have one.
pub struct BookContributor;

impl DocumentContributor for BookContributor {
    fn contribute(&self, entity: &EntityHandle, document: &mut Document) -> griddle::Result<()> {
        let book = entity
            .downcast_ref::<Book>()
            .ok_or_else(|| GriddleError::DocumentContribution {
                entity: document.id.clone(),
                message: "not a Book".to_string(),
            })?;
        document.add_field("title", book.title.as_str());
        if let Some(author) = &book.author {
            document.add_field("author", author.as_str());
        }
        Ok(())
    }

    fn routing_key(&self, entity: &EntityHandle) -> Option<String> {
        entity.downcast_ref::<Book>().and_then(|b| b.author.clone())
    }
}

// ============================================================
// Recording shard writer
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Execute {
        shard: usize,
        kind: WorkKind,
        id: Option<String>,
        tenant: Option<String>,
        routing_key: Option<String>,
        dirty: Option<DirtyPaths>,
    },
    Commit {
        shard: usize,
    },
    Refresh {
        shard: usize,
    },
    Close {
        shard: usize,
    },
}

/// State shared by every [`RecordingWriter`] of a test.
#[derive(Default)]
pub struct WriterTap {
    events: Mutex<Vec<Event>>,
    pub fail_ids: Mutex<HashSet<String>>,
    pub panic_ids: Mutex<HashSet<String>>,
    pub fail_commit: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub fail_close: AtomicBool,
    /// Held by a test to block every writer before it executes an item.
    pub gate: tokio::sync::Mutex<()>,
    /// Notified when a writer starts waiting on the gate.
    pub started: Notify,
}

impl WriterTap {
    pub fn fail_on(&self, id: &str) {
        self.fail_ids.lock().unwrap().insert(id.to_string());
    }

    /// The writer panics instead of returning an error on `id`.
    pub fn panic_on(&self, id: &str) {
        self.panic_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Execute { .. }))
            .collect()
    }

    /// Ids of executed items on `shard`, in execution order.
    pub fn executed_ids(&self, shard: usize) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute {
                    shard: s, id: Some(id), ..
                } if s == shard => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Commit { .. }))
            .count()
    }

    pub fn refreshes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Refresh { .. }))
            .count()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct RecordingWriter {
    shard: usize,
    tap: Arc<WriterTap>,
}

impl RecordingWriter {
    pub fn new(shard: usize, tap: Arc<WriterTap>) -> Self {
        RecordingWriter { shard, tap }
    }

    pub fn boxed(target: &ShardTarget, tap: &Arc<WriterTap>) -> Box<dyn ShardWriter> {
        Box::new(RecordingWriter::new(target.shard, Arc::clone(tap)))
    }
}

#[async_trait]
impl ShardWriter for RecordingWriter {
    async fn execute(&mut self, item: &WorkItem) -> griddle::Result<()> {
        self.tap.started.notify_one();
        let _gate = self.tap.gate.lock().await;

        self.tap.record(Event::Execute {
            shard: self.shard,
            kind: item.kind(),
            id: item.document_id().map(str::to_string),
            tenant: item.tenant_id().map(str::to_string),
            routing_key: item.routing_key().map(str::to_string),
            dirty: item.dirty_paths().cloned(),
        });
        let panicking = item
            .document_id()
            .is_some_and(|id| self.tap.panic_ids.lock().unwrap().contains(id));
        if panicking {
            panic!("engine blew up on {}", item);
        }
        let failing = item
            .document_id()
            .is_some_and(|id| self.tap.fail_ids.lock().unwrap().contains(id));
        if failing {
            return Err(GriddleError::WriteRejected(format!("{} rejected", item)));
        }
        Ok(())
    }

    async fn commit(&mut self) -> griddle::Result<()> {
        self.tap.record(Event::Commit { shard: self.shard });
        if self.tap.fail_commit.load(Ordering::SeqCst) {
            return Err(GriddleError::Commit("disk full".to_string()));
        }
        Ok(())
    }

    async fn refresh(&mut self) -> griddle::Result<()> {
        self.tap.record(Event::Refresh { shard: self.shard });
        if self.tap.fail_refresh.load(Ordering::SeqCst) {
            return Err(GriddleError::Refresh("reader unavailable".to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) -> griddle::Result<()> {
        self.tap.record(Event::Close { shard: self.shard });
        if self.tap.fail_close.load(Ordering::SeqCst) {
            return Err(GriddleError::Commit("final commit failed".to_string()));
        }
        Ok(())
    }
}

// ============================================================
// Failure handler
// ============================================================

#[derive(Default)]
pub struct CollectingFailureHandler {
    pub index_failures: Mutex<Vec<FailureContext>>,
    pub entity_failures: Mutex<Vec<EntityIndexingFailureContext>>,
}

impl CollectingFailureHandler {
    /// Every entity reported as uncertain, in report order.
    pub fn failing_entities(&self) -> Vec<EntityKey> {
        self.entity_failures
            .lock()
            .unwrap()
            .iter()
            .flat_map(|c| c.failing_entities.clone())
            .collect()
    }

    pub fn index_failure_count(&self) -> usize {
        self.index_failures.lock().unwrap().len()
    }
}

impl FailureHandler for CollectingFailureHandler {
    fn handle(&self, context: FailureContext) {
        self.index_failures.lock().unwrap().push(context);
    }

    fn handle_entities(&self, context: EntityIndexingFailureContext) {
        self.entity_failures.lock().unwrap().push(context);
    }
}

// ============================================================
// Harness
// ============================================================

pub struct Harness {
    pub mapping: SearchMapping,
    pub tap: Arc<WriterTap>,
    pub failures: Arc<CollectingFailureHandler>,
}

/// No scheduled commits, so commit events only come from forced commits.
pub fn quiet_config(queue_count: usize) -> IndexingConfig {
    IndexingConfig {
        queue_count,
        commit_interval_ms: 0,
        ..Default::default()
    }
}

/// Mapping with `Book` bound to a `books` index backed by recording writers.
pub fn setup(
    config: IndexingConfig,
    strategy: Option<ShardingStrategy>,
    customize: impl FnOnce(SearchMappingBuilder) -> SearchMappingBuilder,
) -> Harness {
    let tap = Arc::new(WriterTap::default());
    let failures = Arc::new(CollectingFailureHandler::default());

    let builder = SearchMapping::builder()
        .config(config)
        .failure_handler(failures.clone())
        .register(EntityTypeBinding::indexed("Book", "books", BookContributor));
    let mapping = customize(builder).build().unwrap();

    let writer_tap = Arc::clone(&tap);
    mapping
        .manager()
        .create_index_with("books", strategy, |target| {
            Ok(RecordingWriter::boxed(target, &writer_tap))
        })
        .unwrap();

    Harness {
        mapping,
        tap,
        failures,
    }
}

pub fn setup_sharded(shards: usize) -> Harness {
    setup(quiet_config(shards), None, |b| b)
}
