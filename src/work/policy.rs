//! Commit and refresh policy enforcement for one serial work queue.

use crate::backend::ShardWriter;
use crate::error::{GriddleError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStrategy {
    /// Leave durability to the scheduled commit.
    #[default]
    None,
    /// Commit before the work set's completion resolves.
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStrategy {
    #[default]
    None,
    /// Refresh before the work set's completion resolves.
    Force,
}

impl FromStr for CommitStrategy {
    type Err = GriddleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CommitStrategy::None),
            "force" => Ok(CommitStrategy::Force),
            other => Err(GriddleError::Config(format!(
                "unknown commit strategy: {}",
                other
            ))),
        }
    }
}

impl FromStr for RefreshStrategy {
    type Err = GriddleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RefreshStrategy::None),
            "force" => Ok(RefreshStrategy::Force),
            other => Err(GriddleError::Config(format!(
                "unknown refresh strategy: {}",
                other
            ))),
        }
    }
}

/// Result of the end-of-batch hook.
#[derive(Debug, Default)]
pub(crate) struct BatchOutcome {
    pub commit_error: Option<GriddleError>,
    pub refresh_error: Option<GriddleError>,
}

impl BatchOutcome {
    /// Error a successful work set inherits from the end-of-batch hook, if any.
    pub fn error_for(&self, commit: CommitStrategy, refresh: RefreshStrategy) -> Option<GriddleError> {
        if let Some(e) = &self.commit_error {
            if commit == CommitStrategy::Force || refresh == RefreshStrategy::Force {
                return Some(e.clone());
            }
        }
        if refresh == RefreshStrategy::Force {
            return self.refresh_error.clone();
        }
        None
    }
}

/// Tracks durability and visibility obligations of a queue.
pub(crate) struct PolicyEnforcer {
    commit_interval: Option<Duration>,
    uncommitted_since: Option<Instant>,
    commit_requested: bool,
    refresh_requested: bool,
}

impl PolicyEnforcer {
    pub fn new(commit_interval: Option<Duration>) -> Self {
        PolicyEnforcer {
            commit_interval,
            uncommitted_since: None,
            commit_requested: false,
            refresh_requested: false,
        }
    }

    pub fn has_uncommitted(&self) -> bool {
        self.uncommitted_since.is_some()
    }

    pub fn record_write(&mut self) {
        if self.uncommitted_since.is_none() {
            self.uncommitted_since = Some(Instant::now());
        }
    }

    pub fn mark_committed(&mut self) {
        self.uncommitted_since = None;
    }

    /// When the scheduled commit is due, if one is pending at all.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.commit_interval, self.uncommitted_since) {
            (Some(interval), Some(since)) => Some(since + interval),
            _ => None,
        }
    }

    fn scheduled_commit_due(&self, now: Instant) -> bool {
        self.next_deadline().is_some_and(|deadline| deadline <= now)
    }

    /// Applies a scheduled commit left over from previous batches.
    pub async fn before_work_set(&mut self, writer: &mut dyn ShardWriter) -> Result<()> {
        if self.scheduled_commit_due(Instant::now()) {
            self.scheduled_commit(writer).await
        } else {
            Ok(())
        }
    }

    pub async fn scheduled_commit(&mut self, writer: &mut dyn ShardWriter) -> Result<()> {
        match writer.commit().await {
            Ok(()) => {
                self.mark_committed();
                Ok(())
            }
            Err(e) => {
                // retry after another full interval rather than spinning
                self.uncommitted_since = Some(Instant::now());
                Err(e)
            }
        }
    }

    pub fn after_successful_work_set(&mut self, commit: CommitStrategy, refresh: RefreshStrategy) {
        self.commit_requested |= commit == CommitStrategy::Force;
        self.refresh_requested |= refresh == RefreshStrategy::Force;
    }

    /// Runs the forced commit, then the forced refresh unless the commit failed.
    pub async fn end_batch(&mut self, writer: &mut dyn ShardWriter) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        if self.commit_requested {
            match writer.commit().await {
                Ok(()) => self.mark_committed(),
                Err(e) => outcome.commit_error = Some(e),
            }
        }

        if self.refresh_requested && outcome.commit_error.is_none() {
            if let Err(e) = writer.refresh().await {
                outcome.refresh_error = Some(e);
            }
        }

        self.commit_requested = false;
        self.refresh_requested = false;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::item::WorkItem;
    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingWriter {
        commits: usize,
        refreshes: usize,
        fail_commit: bool,
        fail_refresh: bool,
    }

    #[async_trait]
    impl ShardWriter for CountingWriter {
        async fn execute(&mut self, _item: &WorkItem) -> Result<()> {
            Ok(())
        }

        async fn commit(&mut self) -> Result<()> {
            self.commits += 1;
            if self.fail_commit {
                return Err(GriddleError::Commit("disk full".into()));
            }
            Ok(())
        }

        async fn refresh(&mut self) -> Result<()> {
            self.refreshes += 1;
            if self.fail_refresh {
                return Err(GriddleError::Refresh("reader closed".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("FORCE".parse::<CommitStrategy>().unwrap(), CommitStrategy::Force);
        assert_eq!(" none ".parse::<RefreshStrategy>().unwrap(), RefreshStrategy::None);
        assert!("sometimes".parse::<CommitStrategy>().is_err());
    }

    #[tokio::test]
    async fn test_no_obligation_no_calls() {
        let mut writer = CountingWriter::default();
        let mut policy = PolicyEnforcer::new(None);
        policy.after_successful_work_set(CommitStrategy::None, RefreshStrategy::None);
        let outcome = policy.end_batch(&mut writer).await;
        assert!(outcome.commit_error.is_none());
        assert_eq!(writer.commits, 0);
        assert_eq!(writer.refreshes, 0);
    }

    #[tokio::test]
    async fn test_forced_commit_and_refresh_run_once_per_batch() {
        let mut writer = CountingWriter::default();
        let mut policy = PolicyEnforcer::new(None);
        policy.record_write();
        policy.after_successful_work_set(CommitStrategy::Force, RefreshStrategy::None);
        policy.after_successful_work_set(CommitStrategy::Force, RefreshStrategy::Force);
        let outcome = policy.end_batch(&mut writer).await;

        assert!(outcome.commit_error.is_none() && outcome.refresh_error.is_none());
        assert_eq!(writer.commits, 1);
        assert_eq!(writer.refreshes, 1);
        assert!(!policy.has_uncommitted());

        let outcome = policy.end_batch(&mut writer).await;
        assert!(outcome.commit_error.is_none());
        assert_eq!(writer.commits, 1, "obligations reset after each batch");
    }

    #[tokio::test]
    async fn test_refresh_skipped_after_commit_failure() {
        let mut writer = CountingWriter {
            fail_commit: true,
            ..Default::default()
        };
        let mut policy = PolicyEnforcer::new(None);
        policy.after_successful_work_set(CommitStrategy::Force, RefreshStrategy::Force);
        let outcome = policy.end_batch(&mut writer).await;

        assert!(outcome.commit_error.is_some());
        assert_eq!(writer.refreshes, 0);
        assert!(outcome
            .error_for(CommitStrategy::None, RefreshStrategy::Force)
            .is_some());
        assert!(outcome
            .error_for(CommitStrategy::None, RefreshStrategy::None)
            .is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_only_hits_refresh_requesters() {
        let mut writer = CountingWriter {
            fail_refresh: true,
            ..Default::default()
        };
        let mut policy = PolicyEnforcer::new(None);
        policy.after_successful_work_set(CommitStrategy::Force, RefreshStrategy::Force);
        let outcome = policy.end_batch(&mut writer).await;

        assert!(outcome
            .error_for(CommitStrategy::Force, RefreshStrategy::None)
            .is_none());
        assert!(matches!(
            outcome.error_for(CommitStrategy::None, RefreshStrategy::Force),
            Some(GriddleError::Refresh(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_commit_deadline() {
        let mut writer = CountingWriter::default();
        let mut policy = PolicyEnforcer::new(Some(Duration::from_millis(100)));
        assert!(policy.next_deadline().is_none());

        policy.record_write();
        let deadline = policy.next_deadline().unwrap();
        policy.before_work_set(&mut writer).await.unwrap();
        assert_eq!(writer.commits, 0, "not due yet");

        tokio::time::sleep_until(deadline).await;
        policy.before_work_set(&mut writer).await.unwrap();
        assert_eq!(writer.commits, 1);
        assert!(policy.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_scheduled_commit_is_rescheduled() {
        let mut writer = CountingWriter {
            fail_commit: true,
            ..Default::default()
        };
        let mut policy = PolicyEnforcer::new(Some(Duration::from_millis(50)));
        policy.record_write();
        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(policy.scheduled_commit(&mut writer).await.is_err());
        let next = policy.next_deadline().unwrap();
        assert!(next > Instant::now());
    }
}
