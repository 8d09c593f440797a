//! Index lifecycle: shard queues per index and index-wide operations.

pub mod manager;
pub mod workspace;

pub use manager::IndexManager;
pub use workspace::IndexWorkspace;
