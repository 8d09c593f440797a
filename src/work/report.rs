//! Execution reports and failure handling.

use crate::error::{GriddleError, Result};
use crate::types::EntityKey;
use indexmap::IndexSet;

/// Outcome of one or more executed work sets.
///
/// `failing_entities` lists the entities whose index state is uncertain.
/// When several shards fail, `error` holds the first error in shard
/// iteration order (index name, then shard number).
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    failing_entities: IndexSet<EntityKey>,
    error: Option<GriddleError>,
}

impl ExecutionReport {
    pub fn success() -> Self {
        ExecutionReport::default()
    }

    pub fn failed(entities: impl IntoIterator<Item = EntityKey>, error: GriddleError) -> Self {
        ExecutionReport {
            failing_entities: entities.into_iter().collect(),
            error: Some(error),
        }
    }

    pub fn failing_entities(&self) -> Vec<EntityKey> {
        self.failing_entities.iter().cloned().collect()
    }

    pub fn failing_entity_count(&self) -> usize {
        self.failing_entities.len()
    }

    pub fn is_failing(&self, entity: &EntityKey) -> bool {
        self.failing_entities.contains(entity)
    }

    pub fn error(&self) -> Option<&GriddleError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failing_entities.is_empty()
    }

    /// Folds `other` into `self`; the error already held wins.
    pub fn merge(&mut self, other: ExecutionReport) {
        self.failing_entities.extend(other.failing_entities);
        if self.error.is_none() {
            self.error = other.error;
        }
    }

    pub fn merge_all(reports: impl IntoIterator<Item = ExecutionReport>) -> ExecutionReport {
        reports
            .into_iter()
            .fold(ExecutionReport::success(), |mut merged, report| {
                merged.merge(report);
                merged
            })
    }

    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Index-level failure: no particular entity is involved.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub error: GriddleError,
    pub failing_operation: String,
}

/// Failure that left the listed entities in an uncertain index state.
#[derive(Debug, Clone)]
pub struct EntityIndexingFailureContext {
    pub error: GriddleError,
    pub failing_operation: String,
    pub failing_entities: Vec<EntityKey>,
}

/// Receives every failure the indexing core observes, with enough context to
/// reindex the affected entities. Retries, if any, are decided here.
pub trait FailureHandler: Send + Sync {
    fn handle(&self, context: FailureContext);

    fn handle_entities(&self, context: EntityIndexingFailureContext);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFailureHandler;

impl FailureHandler for LoggingFailureHandler {
    fn handle(&self, context: FailureContext) {
        tracing::error!(
            error_code = context.error.error_code(),
            "{} failed: {}",
            context.failing_operation,
            context.error
        );
    }

    fn handle_entities(&self, context: EntityIndexingFailureContext) {
        let entities: Vec<String> = context
            .failing_entities
            .iter()
            .map(|e| e.to_string())
            .collect();
        tracing::error!(
            error_code = context.error.error_code(),
            failing_entities = entities.len(),
            "{} failed: {}; index state uncertain for [{}]",
            context.failing_operation,
            context.error,
            entities.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> EntityKey {
        EntityKey::new("Book", id)
    }

    #[test]
    fn test_merge_keeps_first_error_and_unions_entities() {
        let reports = vec![
            ExecutionReport::success(),
            ExecutionReport::failed(vec![key("1"), key("2")], GriddleError::Commit("a".into())),
            ExecutionReport::failed(vec![key("2"), key("3")], GriddleError::Refresh("b".into())),
        ];
        let merged = ExecutionReport::merge_all(reports);

        assert_eq!(merged.failing_entities(), vec![key("1"), key("2"), key("3")]);
        assert!(matches!(merged.error(), Some(GriddleError::Commit(_))));
        assert!(!merged.is_success());
    }

    #[test]
    fn test_merge_of_successes_is_success() {
        let merged = ExecutionReport::merge_all(vec![
            ExecutionReport::success(),
            ExecutionReport::success(),
        ]);
        assert!(merged.is_success());
        assert!(merged.into_result().is_ok());
    }
}
