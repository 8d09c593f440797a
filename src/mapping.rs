use crate::config::IndexingConfig;
use crate::error::{GriddleError, Result};
use crate::index::{IndexManager, IndexWorkspace};
use crate::plan::{EntityTypeBinding, EntityTypeRegistry, IndexingPlan, PlanContext, ReindexResolver};
use crate::work::coordinator::ExecutionCoordinator;
use crate::work::report::{FailureHandler, LoggingFailureHandler};
use std::path::PathBuf;
use std::sync::Arc;

/// Entry point tying the type registry, the index manager and the
/// coordinator together.
///
/// ```rust,no_run
/// use griddle::{EntityTypeBinding, SearchMapping};
/// use griddle::types::{Document, EntityHandle};
/// use std::sync::Arc;
///
/// # async fn run() -> griddle::Result<()> {
/// fn contribute(entity: &EntityHandle, doc: &mut Document) -> griddle::Result<()> {
///     if let Some(title) = entity.downcast_ref::<String>() {
///         doc.add_field("title", title.as_str());
///     }
///     Ok(())
/// }
///
/// let mapping = SearchMapping::builder()
///     .register(EntityTypeBinding::indexed("Book", "books", contribute))
///     .build()?;
/// mapping.manager().create_embedded_index("books", None)?;
///
/// let mut plan = mapping.create_plan(None);
/// plan.add("Book", "1", Arc::new("Dune".to_string()))?;
/// let report = plan.execute()?.await;
/// assert!(report.is_success());
/// mapping.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct SearchMapping {
    manager: Arc<IndexManager>,
    context: PlanContext,
}

impl SearchMapping {
    pub fn builder() -> SearchMappingBuilder {
        SearchMappingBuilder::default()
    }

    pub fn config(&self) -> &IndexingConfig {
        self.manager.config()
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    pub fn registry(&self) -> &EntityTypeRegistry {
        &self.context.registry
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.context.coordinator
    }

    /// New plan using the configured commit and refresh strategies.
    pub fn create_plan(&self, tenant_id: Option<&str>) -> IndexingPlan {
        let config = self.manager.config();
        IndexingPlan::new(self.context.clone(), tenant_id.map(str::to_string))
            .with_commit_strategy(config.commit_strategy)
            .with_refresh_strategy(config.refresh_strategy)
    }

    pub fn create_workspace(&self, index: &str, tenant_id: Option<&str>) -> Result<IndexWorkspace> {
        if !self.manager.contains_index(index) {
            return Err(GriddleError::IndexNotFound(index.to_string()));
        }
        Ok(IndexWorkspace::new(
            self.context.coordinator.clone(),
            index,
            tenant_id.map(str::to_string),
        ))
    }

    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down search mapping");
        self.manager.shutdown().await
    }
}

#[derive(Default)]
pub struct SearchMappingBuilder {
    config: Option<IndexingConfig>,
    base_path: Option<PathBuf>,
    bindings: Vec<EntityTypeBinding>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
    resolver: Option<Arc<dyn ReindexResolver>>,
}

impl SearchMappingBuilder {
    /// Defaults to [`IndexingConfig::from_env`].
    pub fn config(mut self, config: IndexingConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Directory for embedded indexes; RAM when unset.
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    pub fn register(mut self, binding: EntityTypeBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    pub fn reindex_resolver(mut self, resolver: Arc<dyn ReindexResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Result<SearchMapping> {
        let config = self.config.unwrap_or_else(IndexingConfig::from_env);
        config.validate()?;

        let mut registry = EntityTypeRegistry::new();
        for binding in self.bindings {
            registry.register(binding)?;
        }

        let failure_handler = self
            .failure_handler
            .unwrap_or_else(|| Arc::new(LoggingFailureHandler));
        let manager = match self.base_path {
            Some(path) => IndexManager::with_base_path(path, config, Arc::clone(&failure_handler)),
            None => IndexManager::new(config, Arc::clone(&failure_handler)),
        };
        let coordinator = ExecutionCoordinator::new(manager.clone(), failure_handler);

        Ok(SearchMapping {
            manager,
            context: PlanContext {
                registry: Arc::new(registry),
                coordinator,
                resolver: self.resolver,
            },
        })
    }
}
