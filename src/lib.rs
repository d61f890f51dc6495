pub mod config;
pub mod date_util;
pub mod document;
pub mod error;
pub mod graph;
pub mod reconcile;
pub mod session;
pub mod storage;
pub mod sync;
pub mod task;
pub mod text;
pub mod todoist;
pub mod url;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use reconcile::{MutationStats, ReconcileReport};
pub use session::{Session, Trigger};
pub use storage::Database;
pub use sync::{NoopProgress, PageMode, SyncOptions, SyncProgress, SyncReport, SyncStatus};

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::SyncRun;

use std::future::Future;

use graph::{LogseqGraph, Throttled};
use storage::repository::{self, RunCounts};
use sync::syncer;

/// Main entry point: owns the settings database and the run session.
pub struct TodoSeq {
    db: Database,
    session: Session,
}

impl TodoSeq {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            session: Session::new(),
        }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> Result<SyncConfig> {
        SyncConfig::load(&self.db).await
    }

    /// Run one sync against Todoist and the configured Logseq graph.
    ///
    /// Returns `Ok(None)` when an automatic trigger finds a run already in
    /// progress. Every run that starts is recorded in the run ledger.
    pub async fn sync(
        &self,
        trigger: Trigger,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<Option<SyncReport>> {
        let Some(_guard) = self.session.begin(trigger)? else {
            return Ok(None);
        };
        let config = self.config().await?;
        log::debug!("Starting {trigger} sync with {config:?}");

        let client = todoist::Client::new(Some(config.require_todoist_token()?.to_string()))?;
        let graph = Throttled::new(
            LogseqGraph::new(&config.logseq_url, config.logseq_token.clone())?,
            config.mutation_delay,
        );

        self.record_run(
            trigger,
            syncer::run_sync(&client, &graph, &config, options, progress),
        )
        .await
        .map(Some)
    }

    /// Await a run and record it in the ledger, failed runs included.
    pub async fn record_run<F>(&self, trigger: Trigger, run: F) -> Result<SyncReport>
    where
        F: Future<Output = Result<SyncReport>>,
    {
        let run_id = self
            .db
            .writer()
            .call(move |conn| repository::insert_sync_run(conn, trigger.as_str()))
            .await?;

        let result = run.await;

        let (status, counts, error) = match &result {
            Ok(report) => (
                report.status.as_str(),
                RunCounts {
                    tasks: report.tasks,
                    created: report.reconcile.totals.created,
                    updated: report.reconcile.totals.updated,
                    deleted: report.reconcile.totals.deleted,
                    retained: report.reconcile.totals.retained,
                },
                report.error.clone(),
            ),
            Err(e) => {
                log::error!("Sync failed: {e}");
                (SyncStatus::Failed.as_str(), RunCounts::default(), Some(e.to_string()))
            }
        };
        self.db
            .writer()
            .call(move |conn| {
                repository::finish_sync_run(conn, run_id, status, &counts, error.as_deref())
            })
            .await?;

        result
    }

    /// Most recent runs first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>> {
        let runs = self
            .db
            .reader()
            .call(move |conn| repository::list_recent_runs(conn, limit))
            .await?;
        Ok(runs)
    }
}
