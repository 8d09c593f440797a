//! Engine write executors.
//!
//! A [`ShardWriter`] is owned by exactly one serial work queue and is never
//! touched outside that queue's worker.

#[cfg(feature = "embedded")]
pub mod embedded;
#[cfg(feature = "remote")]
pub mod remote;

use crate::error::{GriddleError, Result};
use crate::work::item::WorkItem;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

#[async_trait]
pub trait ShardWriter: Send {
    /// Hand one work item to the engine.
    async fn execute(&mut self, item: &WorkItem) -> Result<()>;

    /// Make everything written so far durable.
    async fn commit(&mut self) -> Result<()>;

    /// Make everything written so far visible to new searches.
    async fn refresh(&mut self) -> Result<()>;

    /// Final commit when the owning queue shuts down.
    async fn close(&mut self) -> Result<()> {
        self.commit().await
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}

/// Wraps the writer a queue owns so a panicking engine call fails the work
/// in flight with [`GriddleError::WorkerCrashed`] instead of killing the
/// worker task.
pub(crate) struct UnwindGuard {
    name: String,
    inner: Box<dyn ShardWriter>,
}

impl UnwindGuard {
    pub fn new(name: impl Into<String>, inner: Box<dyn ShardWriter>) -> Self {
        UnwindGuard {
            name: name.into(),
            inner,
        }
    }

    async fn guard<F>(name: &str, operation: &str, call: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::error!("[Q {}] PANIC during {}: {}", name, operation, msg);
                Err(GriddleError::WorkerCrashed(format!(
                    "{}: {} panicked: {}",
                    name, operation, msg
                )))
            }
        }
    }
}

#[async_trait]
impl ShardWriter for UnwindGuard {
    async fn execute(&mut self, item: &WorkItem) -> Result<()> {
        Self::guard(&self.name, "execute", self.inner.execute(item)).await
    }

    async fn commit(&mut self) -> Result<()> {
        Self::guard(&self.name, "commit", self.inner.commit()).await
    }

    async fn refresh(&mut self) -> Result<()> {
        Self::guard(&self.name, "refresh", self.inner.refresh()).await
    }

    async fn close(&mut self) -> Result<()> {
        Self::guard(&self.name, "close", self.inner.close()).await
    }
}

#[cfg(feature = "embedded")]
pub use embedded::TantivyShardWriter;
#[cfg(feature = "remote")]
pub use remote::RemoteShardWriter;
