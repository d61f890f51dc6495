pub mod filter;
pub mod location;
pub mod rate_limit;
pub mod syncer;

use chrono::NaiveDate;
use serde::Serialize;

use crate::reconcile::{MutationStats, ReconcileReport};

pub use filter::ExclusionFilter;
pub use location::{target_page, PageMode};

/// Options controlling a sync operation.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Oldest completion date to fetch completed tasks from.
    pub since: Option<NaiveDate>,
    /// Alternative to `since`: this many days back from today.
    pub days: Option<u32>,
}

impl SyncOptions {
    pub fn since_date(&self) -> Option<NaiveDate> {
        if let Some(d) = self.since {
            Some(d)
        } else {
            self.days
                .map(|days| chrono::Local::now().date_naive() - chrono::Duration::days(days as i64))
        }
    }
}

/// Callbacks fired as a run progresses. All methods default to no-ops.
pub trait SyncProgress: Send + Sync {
    fn on_fetched(&self, _active: usize, _completed: usize) {}

    fn on_comments_progress(&self, _current: usize, _total: usize) {}

    fn on_page_reconciled(&self, _page: &str, _stats: &MutationStats) {}

    fn on_complete(&self, _report: &SyncReport) {}
}

pub struct NoopProgress;

impl SyncProgress for NoopProgress {}

/// Report returned after a sync run completes.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub active_fetched: usize,
    pub completed_fetched: usize,
    /// Tasks dropped by exclusion patterns.
    pub excluded: usize,
    /// Tasks that reached the reconciler.
    pub tasks: usize,
    /// Tasks whose comments could not be fetched.
    pub comment_failures: usize,
    pub reconcile: ReconcileReport,
    pub error: Option<String>,
}

impl SyncReport {
    /// Derive the status from the comment failure count.
    pub fn from_counts(
        active_fetched: usize,
        completed_fetched: usize,
        excluded: usize,
        tasks: usize,
        comment_failures: usize,
        reconcile: ReconcileReport,
    ) -> Self {
        let (status, error) = if comment_failures == 0 {
            (SyncStatus::Success, None)
        } else {
            (
                SyncStatus::PartialFailure,
                Some(format!("comments unavailable for {comment_failures} tasks")),
            )
        };
        Self {
            status,
            active_fetched,
            completed_fetched,
            excluded,
            tasks,
            comment_failures,
            reconcile,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "completed",
            SyncStatus::PartialFailure => "partial_failure",
            SyncStatus::Failed => "failed",
        }
    }
}
