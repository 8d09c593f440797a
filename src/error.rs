use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GriddleError {
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Entity type {0} has no identifier mapping")]
    MissingIdentifierMapping(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Missing routing key for explicitly sharded index {0}")]
    MissingRoutingKey(String),

    #[error("Routing key {routing_key} does not name a shard of index {index}")]
    UnknownShard { index: String, routing_key: String },

    #[error("Index-wide work cannot be routed by document: {0}")]
    UnroutableWork(String),

    #[error("Document contribution failed for {entity}: {message}")]
    DocumentContribution { entity: String, message: String },

    #[error("Work queue {queue} full ({capacity} work sets pending)")]
    QueueFull { queue: String, capacity: usize },

    #[error("Work queue closed: {0}")]
    QueueClosed(String),

    #[error("Work queue worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Refresh failed: {0}")]
    Refresh(String),

    #[error("Write rejected: {0}")]
    WriteRejected(String),

    #[error("Remote store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Tantivy error: {0}")]
    Tantivy(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GriddleError>;

impl From<std::io::Error> for GriddleError {
    fn from(e: std::io::Error) -> Self {
        GriddleError::Io(e.to_string())
    }
}

#[cfg(feature = "embedded")]
impl From<tantivy::TantivyError> for GriddleError {
    fn from(e: tantivy::TantivyError) -> Self {
        GriddleError::Tantivy(e.to_string())
    }
}

#[cfg(feature = "remote")]
impl From<reqwest::Error> for GriddleError {
    fn from(e: reqwest::Error) -> Self {
        GriddleError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for GriddleError {
    fn from(e: serde_json::Error) -> Self {
        GriddleError::Json(e.to_string())
    }
}

impl GriddleError {
    /// Configuration errors are raised synchronously and are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GriddleError::UnknownEntityType(_)
                | GriddleError::MissingIdentifierMapping(_)
                | GriddleError::IndexNotFound(_)
                | GriddleError::IndexAlreadyExists(_)
                | GriddleError::MissingRoutingKey(_)
                | GriddleError::UnknownShard { .. }
                | GriddleError::UnroutableWork(_)
                | GriddleError::Config(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            GriddleError::UnknownEntityType(_) => "unknown_entity_type",
            GriddleError::MissingIdentifierMapping(_) => "missing_identifier_mapping",
            GriddleError::IndexNotFound(_) => "index_not_found",
            GriddleError::IndexAlreadyExists(_) => "index_already_exists",
            GriddleError::MissingRoutingKey(_) => "missing_routing_key",
            GriddleError::UnknownShard { .. } => "unknown_shard",
            GriddleError::UnroutableWork(_) => "unroutable_work",
            GriddleError::DocumentContribution { .. } => "document_contribution",
            GriddleError::QueueFull { .. } => "queue_full",
            GriddleError::QueueClosed(_) => "queue_closed",
            GriddleError::WorkerCrashed(_) => "worker_crashed",
            GriddleError::Commit(_) => "commit_failed",
            GriddleError::Refresh(_) => "refresh_failed",
            GriddleError::WriteRejected(_) => "write_rejected",
            GriddleError::Remote { .. } => "remote_error",
            GriddleError::Http(_) => "http_error",
            GriddleError::Io(_) => "io_error",
            GriddleError::Tantivy(_) => "tantivy_error",
            GriddleError::Json(_) => "json_error",
            GriddleError::Config(_) => "config_error",
        }
    }
}
