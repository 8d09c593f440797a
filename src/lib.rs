//! # Griddle
//!
//! The write side of an ORM-to-search-engine integration: entity lifecycle
//! events become index mutations, delivered to the engine through serial
//! per-shard work queues with explicit commit and refresh guarantees.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use griddle::types::{Document, EntityHandle};
//! use griddle::{CommitStrategy, EntityTypeBinding, IndexingConfig, SearchMapping};
//! use std::sync::Arc;
//!
//! struct Book {
//!     title: String,
//! }
//!
//! fn book_document(entity: &EntityHandle, doc: &mut Document) -> griddle::Result<()> {
//!     if let Some(book) = entity.downcast_ref::<Book>() {
//!         doc.add_field("title", book.title.as_str());
//!     }
//!     Ok(())
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> griddle::Result<()> {
//! griddle::init_tracing();
//!
//! let mapping = SearchMapping::builder()
//!     .config(IndexingConfig { queue_count: 2, ..Default::default() })
//!     .base_path("./data")
//!     .register(EntityTypeBinding::indexed("Book", "books", book_document))
//!     .build()?;
//! mapping.manager().create_embedded_index("books", None)?;
//!
//! // One plan per unit of work; operations on the same entity coalesce.
//! let mut plan = mapping
//!     .create_plan(None)
//!     .with_commit_strategy(CommitStrategy::Force);
//! plan.add("Book", "1", Arc::new(Book { title: "Dune".into() }))?;
//! plan.update_paths("Book", "1", Arc::new(Book { title: "Dune Messiah".into() }), ["title"])?;
//!
//! let report = plan.execute()?.await;
//! assert!(report.is_success());
//!
//! mapping.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Dependencies | Use case |
//! |---------|-------------|----------|
//! | `embedded` | tantivy | [`backend::TantivyShardWriter`], on-disk or in-RAM shards |
//! | `remote` | reqwest | [`backend::RemoteShardWriter`] for Elasticsearch-compatible stores |
//!
//! Both are enabled by default. Without either, indexes are created with
//! [`IndexManager::create_index_with`] and a custom [`backend::ShardWriter`].

pub mod backend;
pub mod config;
pub mod error;
pub mod index;
pub mod mapping;
pub mod plan;
pub mod sharding;
pub mod types;
pub mod work;

pub use config::IndexingConfig;
pub use error::{GriddleError, Result};
pub use index::{IndexManager, IndexWorkspace};
pub use mapping::{SearchMapping, SearchMappingBuilder};
pub use plan::{
    ContainingEntity, DocumentContributor, EntityTypeBinding, EntityTypeRegistry, IndexingPlan,
    ReindexResolver,
};
pub use sharding::{ShardRouter, ShardTarget, ShardingStrategy};
pub use work::{
    CommitStrategy, ExecutionReport, FailureHandler, LoggingFailureHandler, PlanExecution,
    RefreshStrategy,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
