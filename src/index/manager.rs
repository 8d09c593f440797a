use crate::backend::ShardWriter;
use crate::config::IndexingConfig;
use crate::error::{GriddleError, Result};
use crate::sharding::{ShardRouter, ShardTarget, ShardingStrategy};
use crate::work::coordinator::QueueLookup;
use crate::work::queue::{QueueConfig, SerialWorkQueue};
use crate::work::report::FailureHandler;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "embedded")]
type ShardIndexes = Vec<tantivy::Index>;
#[cfg(not(feature = "embedded"))]
type ShardIndexes = Vec<()>;

struct ManagedIndex {
    router: Arc<ShardRouter>,
    queues: Vec<Arc<SerialWorkQueue>>,
    /// Every shard writes to one remote index, so index-wide work runs once.
    shared_storage: bool,
    /// Empty unless the shards are embedded.
    shard_indexes: ShardIndexes,
}

/// Owner of every index's shard queues.
///
/// Each shard gets one [`SerialWorkQueue`] and one [`ShardWriter`] that only
/// that queue touches. The coordinator sees the manager through
/// [`QueueLookup`] only.
///
/// Index creation spawns queue workers, so it must run inside a tokio
/// runtime.
pub struct IndexManager {
    base_path: Option<PathBuf>,
    config: IndexingConfig,
    failure_handler: Arc<dyn FailureHandler>,
    indexes: DashMap<String, Arc<ManagedIndex>>,
}

impl IndexManager {
    /// Manager whose embedded indexes live in RAM.
    pub fn new(config: IndexingConfig, failure_handler: Arc<dyn FailureHandler>) -> Arc<Self> {
        Arc::new(IndexManager {
            base_path: None,
            config,
            failure_handler,
            indexes: DashMap::new(),
        })
    }

    /// Embedded shards are stored in `{base_path}/{index}/{shard}/`.
    pub fn with_base_path<P: AsRef<Path>>(
        base_path: P,
        config: IndexingConfig,
        failure_handler: Arc<dyn FailureHandler>,
    ) -> Arc<Self> {
        Arc::new(IndexManager {
            base_path: Some(base_path.as_ref().to_path_buf()),
            config,
            failure_handler,
            indexes: DashMap::new(),
        })
    }

    pub fn config(&self) -> &IndexingConfig {
        &self.config
    }

    /// Hash sharding over `queue_count` shards, or a single shard.
    pub fn default_strategy(&self) -> ShardingStrategy {
        if self.config.queue_count > 1 {
            ShardingStrategy::Hash {
                shards: self.config.queue_count,
            }
        } else {
            ShardingStrategy::None
        }
    }

    #[cfg(feature = "embedded")]
    pub fn create_embedded_index(
        &self,
        name: &str,
        strategy: Option<ShardingStrategy>,
    ) -> Result<Arc<ShardRouter>> {
        use crate::backend::TantivyShardWriter;

        let router = self.new_router(name, strategy)?;
        let mut writers: Vec<Box<dyn ShardWriter>> = Vec::with_capacity(router.shard_count());
        let mut shard_indexes = Vec::with_capacity(router.shard_count());
        for shard in 0..router.shard_count() {
            let queue_name = queue_name(&router, shard);
            let writer = match &self.base_path {
                Some(base) => TantivyShardWriter::create_in_dir(
                    &queue_name,
                    base.join(name).join(router.shard_name(shard)),
                    self.config.writer_memory_bytes,
                )?,
                None => {
                    TantivyShardWriter::create_in_ram(&queue_name, self.config.writer_memory_bytes)?
                }
            };
            shard_indexes.push(writer.index().clone());
            writers.push(Box::new(writer));
        }
        self.install(router, writers, shard_indexes, false)
    }

    /// Every queue of the index writes to the same remote index; the store
    /// shards internally using the forwarded routing key.
    #[cfg(feature = "remote")]
    pub fn create_remote_index(
        &self,
        name: &str,
        client: reqwest::Client,
        base_url: &str,
        strategy: Option<ShardingStrategy>,
    ) -> Result<Arc<ShardRouter>> {
        use crate::backend::RemoteShardWriter;

        let router = self.new_router(name, strategy)?;
        let mut writers: Vec<Box<dyn ShardWriter>> = Vec::with_capacity(router.shard_count());
        for shard in 0..router.shard_count() {
            writers.push(Box::new(RemoteShardWriter::new(
                queue_name(&router, shard),
                client.clone(),
                base_url,
                name,
            )?));
        }
        self.install(router, writers, Vec::new(), true)
    }

    /// Creates an index whose shard writers come from `factory`, called once
    /// per shard in shard order.
    pub fn create_index_with<F>(
        &self,
        name: &str,
        strategy: Option<ShardingStrategy>,
        mut factory: F,
    ) -> Result<Arc<ShardRouter>>
    where
        F: FnMut(&ShardTarget) -> Result<Box<dyn ShardWriter>>,
    {
        let router = self.new_router(name, strategy)?;
        let writers = router
            .all_targets()
            .iter()
            .map(&mut factory)
            .collect::<Result<Vec<_>>>()?;
        self.install(router, writers, Vec::new(), false)
    }

    fn new_router(&self, name: &str, strategy: Option<ShardingStrategy>) -> Result<ShardRouter> {
        if self.indexes.contains_key(name) {
            return Err(GriddleError::IndexAlreadyExists(name.to_string()));
        }
        ShardRouter::new(name, strategy.unwrap_or_else(|| self.default_strategy()))
    }

    fn install(
        &self,
        router: ShardRouter,
        writers: Vec<Box<dyn ShardWriter>>,
        shard_indexes: ShardIndexes,
        shared_storage: bool,
    ) -> Result<Arc<ShardRouter>> {
        let router = Arc::new(router);
        let name = router.index().to_string();
        match self.indexes.entry(name.clone()) {
            Entry::Occupied(_) => Err(GriddleError::IndexAlreadyExists(name)),
            Entry::Vacant(vacant) => {
                let queue_config = QueueConfig::from(&self.config);
                let queues = writers
                    .into_iter()
                    .enumerate()
                    .map(|(shard, writer)| {
                        Arc::new(SerialWorkQueue::start(
                            queue_name(&router, shard),
                            writer,
                            queue_config.clone(),
                            Arc::clone(&self.failure_handler),
                        ))
                    })
                    .collect::<Vec<_>>();
                tracing::info!("Index {} created with {} shard(s)", name, queues.len());
                vacant.insert(Arc::new(ManagedIndex {
                    router: Arc::clone(&router),
                    queues,
                    shared_storage,
                    shard_indexes,
                }));
                Ok(router)
            }
        }
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn contains_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub fn queues(&self, name: &str) -> Vec<Arc<SerialWorkQueue>> {
        self.indexes
            .get(name)
            .map(|index| index.queues.clone())
            .unwrap_or_default()
    }

    /// The tantivy index behind an embedded shard, for searching.
    #[cfg(feature = "embedded")]
    pub fn embedded_shard(&self, target: &ShardTarget) -> Option<tantivy::Index> {
        self.indexes
            .get(&target.index)
            .and_then(|index| index.shard_indexes.get(target.shard).cloned())
    }

    /// Stops accepting work for the index, drains its queues and runs the
    /// final commits. Returns the first shard's close error.
    pub async fn close_index(&self, name: &str) -> Result<()> {
        let (_, index) = self
            .indexes
            .remove(name)
            .ok_or_else(|| GriddleError::IndexNotFound(name.to_string()))?;
        let mut first_error = None;
        for queue in &index.queues {
            if let Err(e) = queue.close().await {
                tracing::error!("[Q {}] close failed: {}", queue.name(), e);
                first_error.get_or_insert(e);
            }
        }
        tracing::info!("Index {} closed", name);
        first_error.map_or(Ok(()), Err)
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for name in self.index_names() {
            if let Err(e) = self.close_index(&name).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl QueueLookup for IndexManager {
    fn router(&self, index: &str) -> Option<Arc<ShardRouter>> {
        self.indexes.get(index).map(|i| Arc::clone(&i.router))
    }

    fn index_wide_targets(&self, index: &str) -> Option<Vec<ShardTarget>> {
        self.indexes.get(index).map(|i| {
            let mut targets = i.router.all_targets();
            if i.shared_storage {
                targets.truncate(1);
            }
            targets
        })
    }

    fn queue(&self, target: &ShardTarget) -> Option<Arc<SerialWorkQueue>> {
        self.indexes
            .get(&target.index)
            .and_then(|i| i.queues.get(target.shard).cloned())
    }
}

fn queue_name(router: &ShardRouter, shard: usize) -> String {
    format!("{}#{}", router.index(), router.shard_name(shard))
}
