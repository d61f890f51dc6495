use std::collections::{BTreeMap, HashMap};

use crate::config::SyncConfig;
use crate::document::{build_tree, Lookups};
use crate::error::Result;
use crate::graph::{BlockStore, DesiredBlock};
use crate::reconcile::{reconcile, recorded_dues};
use crate::sync::rate_limit::{fetch_comments, retry_api};
use crate::sync::{target_page, ExclusionFilter, SyncOptions, SyncProgress, SyncReport};
use crate::task::{self, CanonicalTask, Due};
use crate::todoist::types::{value_to_id, RawLabel, RawProject};
use crate::todoist::TaskSource;

/// Run one full sync: fetch, normalize, filter, enrich, build and reconcile.
///
/// Remote reads run concurrently. Any fetch or graph failure aborts the run;
/// a task whose comments cannot be fetched is synced without them.
pub async fn run_sync<T, S>(
    source: &T,
    store: &S,
    config: &SyncConfig,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncReport>
where
    T: TaskSource + ?Sized,
    S: BlockStore + ?Sized,
{
    let since = options.since_date();
    let (projects, labels, active, completed) = tokio::try_join!(
        async { retry_api!(source.projects()) },
        async { retry_api!(source.labels()) },
        async { retry_api!(source.active_tasks()) },
        async { retry_api!(source.completed_tasks(since)) },
    )?;
    log::info!(
        "Fetched {} active and {} completed tasks, {} projects, {} labels",
        active.len(),
        completed.len(),
        projects.len(),
        labels.len()
    );
    progress.on_fetched(active.len(), completed.len());

    let lookups = build_lookups(&projects, &labels);
    let filter = ExclusionFilter::compile(&config.exclude_patterns);
    let (mut tasks, excluded): (Vec<CanonicalTask>, Vec<CanonicalTask>) =
        task::normalize(&active, &completed)
            .into_iter()
            .partition(|t| !filter.is_excluded(&t.title));
    if !excluded.is_empty() {
        log::info!("Excluded {} tasks by title pattern", excluded.len());
    }

    carry_recorded_due(store, &config.page_prefix, &mut tasks).await?;

    let comment_failures = if config.include_comments {
        enrich_comments(source, &mut tasks, progress).await
    } else {
        0
    };

    let desired = group_by_page(&tasks, &lookups, config);
    let outcome = reconcile(store, &desired, &config.page_prefix, &config.aliases, progress).await?;
    log::info!(
        "Reconciled {} pages: {} created, {} updated, {} deleted, {} retained",
        outcome.pages + outcome.pages_cleaned,
        outcome.totals.created,
        outcome.totals.updated,
        outcome.totals.deleted,
        outcome.totals.retained
    );

    let report = SyncReport::from_counts(
        active.len(),
        completed.len(),
        excluded.len(),
        tasks.len(),
        comment_failures,
        outcome,
    );
    progress.on_complete(&report);
    Ok(report)
}

/// Id-to-name tables for projects and labels.
pub fn build_lookups(projects: &[RawProject], labels: &[RawLabel]) -> Lookups {
    let projects: HashMap<String, String> = projects
        .iter()
        .filter_map(|p| Some((value_to_id(p.id.as_ref())?, p.name.clone()?)))
        .collect();
    let labels: HashMap<String, String> = labels
        .iter()
        .filter_map(|l| Some((value_to_id(l.id.as_ref())?, l.name.clone()?)))
        .collect();
    Lookups::new(projects, labels)
}

fn lost_due(task: &CanonicalTask) -> bool {
    task.is_completed() && task.due.is_empty()
}

/// Completed tasks whose due date was cleared remotely take back the due
/// date already written for them, so their title and page stay put. The
/// graph is only read when such a task exists.
pub async fn carry_recorded_due<S: BlockStore + ?Sized>(
    store: &S,
    prefix: &str,
    tasks: &mut [CanonicalTask],
) -> Result<usize> {
    if !tasks.iter().any(lost_due) {
        return Ok(0);
    }
    let recorded = recorded_dues(store, prefix).await?;
    let mut carried = 0;
    for item in tasks.iter_mut() {
        if !lost_due(item) {
            continue;
        }
        if let Some(value) = recorded.get(&item.id) {
            item.due = Due::from_recorded(value);
            carried += 1;
        }
    }
    if carried > 0 {
        log::debug!("Kept the recorded due date of {carried} completed tasks");
    }
    Ok(carried)
}

/// Fetch comments task by task. Returns how many tasks could not be
/// enriched; those keep `comments: None`.
async fn enrich_comments<T: TaskSource + ?Sized>(
    source: &T,
    tasks: &mut [CanonicalTask],
    progress: &dyn SyncProgress,
) -> usize {
    let total = tasks.len();
    let mut failures = 0;
    for (i, item) in tasks.iter_mut().enumerate() {
        progress.on_comments_progress(i + 1, total);
        match fetch_comments(source, item.id.as_str()).await {
            Ok(raw) => item.comments = Some(task::normalize_comments(&item.id, &raw)),
            Err(e) => {
                log::warn!("Failed to fetch comments for task {}: {e}", item.id);
                failures += 1;
            }
        }
    }
    failures
}

/// Desired trees keyed by destination page, each page in task order.
pub fn group_by_page(
    tasks: &[CanonicalTask],
    lookups: &Lookups,
    config: &SyncConfig,
) -> BTreeMap<String, Vec<DesiredBlock>> {
    let mut pages: BTreeMap<String, Vec<DesiredBlock>> = BTreeMap::new();
    for task in tasks {
        let page = target_page(task, lookups, &config.page_prefix, config.page_mode);
        pages
            .entry(page)
            .or_default()
            .push(build_tree(task, lookups, &config.aliases));
    }
    pages
}
