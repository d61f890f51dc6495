//! Converges graph pages onto the desired task trees.
//!
//! Each page is read once, diffed by [`plan::plan_page`] into a list of
//! [`Mutation`]s, and the list is drained through the store by the
//! [`Executor`]. Pages under the sync prefix that received no tasks this
//! run are swept afterwards so tasks that moved away do not linger.

pub mod executor;
pub mod plan;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::AddAssign;

use serde::Serialize;

use crate::document::props::{node_property, DUE_KEY};
use crate::document::{extract_identity, StatusAliases};
use crate::error::Result;
use crate::graph::{page_key, BlockStore, DesiredBlock};
use crate::sync::SyncProgress;
use crate::task::TaskId;

pub use executor::Executor;
pub use plan::{plan_cleanup, plan_page, Mutation, PagePlan};

/// Per-page and per-run mutation tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MutationStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub retained: usize,
    pub skipped: usize,
}

impl MutationStats {
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl AddAssign for MutationStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.retained += other.retained;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Pages that received tasks.
    pub pages: usize,
    /// Untouched prefix pages that were swept.
    pub pages_cleaned: usize,
    #[serde(flatten)]
    pub totals: MutationStats,
}

/// Whether `name` is the prefix page itself or one nested under it.
pub fn matches_prefix(name: &str, prefix: &str) -> bool {
    let name = page_key(name);
    let prefix = page_key(prefix);
    !prefix.is_empty() && (name == prefix || name.starts_with(&format!("{prefix}/")))
}

/// Reconcile every page in `desired`, then sweep prefix pages that did not
/// appear in it.
pub async fn reconcile<S: BlockStore + ?Sized>(
    store: &S,
    desired: &BTreeMap<String, Vec<DesiredBlock>>,
    prefix: &str,
    aliases: &StatusAliases,
    progress: &dyn SyncProgress,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let mut executor = Executor::new(store);
    let mut touched: HashSet<String> = HashSet::new();

    for (name, blocks) in desired {
        let page = store.ensure_page(name).await?;
        let existing = store.page_tree(&page.name).await?;
        let plan = plan_page(&page.name, &existing, blocks, aliases);

        let mut stats = MutationStats {
            retained: plan.retained,
            skipped: plan.skipped,
            ..Default::default()
        };
        executor.apply(&plan.mutations, &mut stats).await?;
        log::debug!(
            "Page {}: {} created, {} updated, {} deleted",
            page.name,
            stats.created,
            stats.updated,
            stats.deleted
        );
        progress.on_page_reconciled(&page.name, &stats);

        touched.insert(page_key(&page.name));
        report.pages += 1;
        report.totals += stats;
        tokio::task::yield_now().await;
    }

    for page in store.list_pages().await? {
        if !matches_prefix(&page.name, prefix) || touched.contains(&page_key(&page.name)) {
            continue;
        }
        let existing = store.page_tree(&page.name).await?;
        let plan = plan_cleanup(&existing, aliases);
        if plan.is_empty() {
            report.totals.retained += plan.retained;
            continue;
        }
        log::info!("Sweeping {} stale entries from {}", plan.mutations.len(), page.name);
        let mut stats = MutationStats {
            retained: plan.retained,
            ..Default::default()
        };
        executor.apply(&plan.mutations, &mut stats).await?;
        progress.on_page_reconciled(&page.name, &stats);
        report.pages_cleaned += 1;
        report.totals += stats;
        tokio::task::yield_now().await;
    }

    Ok(report)
}

/// Due values written on entries under the prefix, keyed by task. The
/// first entry found for a task wins.
pub async fn recorded_dues<S: BlockStore + ?Sized>(
    store: &S,
    prefix: &str,
) -> Result<HashMap<TaskId, String>> {
    let mut dues = HashMap::new();
    for page in store.list_pages().await? {
        if !matches_prefix(&page.name, prefix) {
            continue;
        }
        for block in store.page_tree(&page.name).await? {
            let Some(id) = extract_identity(&block) else {
                continue;
            };
            if let Some(value) = node_property(&block, DUE_KEY) {
                dues.entry(id).or_insert_with(|| value.to_string());
            }
        }
    }
    Ok(dues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{build_tree, Lookups};
    use crate::graph::{Block, MemoryGraph};
    use crate::sync::syncer::carry_recorded_due;
    use crate::sync::NoopProgress;
    use crate::task::{CanonicalTask, Comment, Due, TaskId, TaskStatus};
    use chrono::NaiveDate;

    fn task(id: &str, title: &str) -> CanonicalTask {
        CanonicalTask {
            id: TaskId::from(id),
            title: title.to_string(),
            description: String::new(),
            project_id: None,
            labels: Vec::new(),
            due: Due::default(),
            status: TaskStatus::Active,
            completed_at: None,
            completed_raw: None,
            comments: None,
        }
    }

    fn due(task: &mut CanonicalTask, date: &str) {
        task.due.date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok();
    }

    fn desired(page: &str, tasks: &[CanonicalTask]) -> BTreeMap<String, Vec<DesiredBlock>> {
        let lookups = Lookups::default();
        let aliases = StatusAliases::default();
        let mut map = BTreeMap::new();
        map.insert(
            page.to_string(),
            tasks.iter().map(|t| build_tree(t, &lookups, &aliases)).collect(),
        );
        map
    }

    async fn run(
        graph: &MemoryGraph,
        desired: &BTreeMap<String, Vec<DesiredBlock>>,
    ) -> ReconcileReport {
        reconcile(graph, desired, "Todoist", &StatusAliases::default(), &NoopProgress)
            .await
            .unwrap()
    }

    fn identities(blocks: &[Block]) -> Vec<String> {
        blocks
            .iter()
            .filter_map(crate::document::extract_identity)
            .map(|id| id.0)
            .collect()
    }

    fn child_contents(block: &Block) -> Vec<&str> {
        block.children.iter().map(|c| c.content.as_str()).collect()
    }

    #[test]
    fn test_matches_prefix() {
        assert!(matches_prefix("Todoist", "todoist"));
        assert!(matches_prefix("todoist/2025-01-02", "Todoist"));
        assert!(!matches_prefix("Todoist Archive", "Todoist"));
        assert!(!matches_prefix("Other", "Todoist"));
        assert!(!matches_prefix("Todoist", ""));
    }

    #[tokio::test]
    async fn test_creates_task_tree_on_empty_page() {
        let graph = MemoryGraph::new();
        let mut t = task("1", "Test");
        due(&mut t, "2025-01-02");
        let report = run(&graph, &desired("Todoist", &[t])).await;

        let tree = graph.snapshot("Todoist");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].content, "[[January 2nd, 2025]] Test");
        assert_eq!(
            child_contents(&tree[0]),
            vec![
                "todoist-id:: [1](https://todoist.com/showTask?id=1)",
                "todoist-due:: January 2nd, 2025",
                "todoist-status:: ◼️",
            ]
        );
        assert_eq!(report.totals.created, 4);
        assert_eq!(report.pages, 1);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let graph = MemoryGraph::new();
        let mut a = task("1", "A");
        due(&mut a, "2025-01-02");
        let mut b = task("2", "B");
        b.description = "notes".into();
        b.comments = Some(vec![Comment {
            id: "c1".into(),
            task_id: "2".into(),
            text: "hello".into(),
            posted_at: Some("2025-01-01T10:00:00Z".into()),
        }]);
        let desired = desired("Todoist", &[a, b]);

        run(&graph, &desired).await;
        graph.reset_counts();
        let report = run(&graph, &desired).await;

        assert_eq!(graph.counts().blocks(), 0);
        assert_eq!(report.totals.writes(), 0);
    }

    #[tokio::test]
    async fn test_completed_entries_are_retained() {
        let graph = MemoryGraph::new();
        let mut done = task("1", "Done");
        done.status = TaskStatus::Completed;
        let open = task("2", "Open");
        run(&graph, &desired("Todoist", &[done, open])).await;

        let report = run(&graph, &desired("Todoist", &[])).await;
        let tree = graph.snapshot("Todoist");
        assert_eq!(identities(&tree), vec!["1"]);
        assert_eq!(report.totals.retained, 1);
        assert_eq!(report.totals.deleted, 1);
    }

    #[tokio::test]
    async fn test_completed_entries_survive_alias_change() {
        let graph = MemoryGraph::new();
        let mut done = task("1", "Done");
        done.status = TaskStatus::Completed;
        done.completed_at = NaiveDate::from_ymd_opt(2025, 1, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0);
        run(&graph, &desired("Todoist", &[done])).await;

        let renamed = StatusAliases {
            completed: "DONE".into(),
            ..StatusAliases::default()
        };
        let empty = desired("Todoist", &[]);
        let report = reconcile(&graph, &empty, "Todoist", &renamed, &NoopProgress)
            .await
            .unwrap();

        assert_eq!(identities(&graph.snapshot("Todoist")), vec!["1"]);
        assert_eq!(report.totals.retained, 1);
        assert_eq!(report.totals.deleted, 0);
    }

    #[tokio::test]
    async fn test_completion_updates_status_and_keeps_due() {
        let graph = MemoryGraph::new();
        let mut t = task("1", "Ship");
        due(&mut t, "2025-01-02");
        run(&graph, &desired("Todoist", &[t.clone()])).await;

        t.status = TaskStatus::Completed;
        t.due = Due::default();
        t.completed_at = NaiveDate::from_ymd_opt(2025, 1, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0);
        let mut tasks = vec![t];
        let carried = carry_recorded_due(&graph, "Todoist", &mut tasks).await.unwrap();
        assert_eq!(carried, 1);
        run(&graph, &desired("Todoist", &tasks)).await;

        let tree = graph.snapshot("Todoist");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].content, "[[January 2nd, 2025]] Ship");
        let children = child_contents(&tree[0]);
        assert!(children.contains(&"todoist-due:: January 2nd, 2025"));
        assert!(children.contains(&"todoist-completed:: January 3rd, 2025"));
        assert!(children.contains(&"todoist-status:: ✅"));
        assert_eq!(children.last(), Some(&"todoist-status:: ✅"));
    }

    #[tokio::test]
    async fn test_recorded_dues_read_from_prefix_pages() {
        let graph = MemoryGraph::new();
        let mut t = task("1", "Ship");
        due(&mut t, "2025-01-02");
        run(&graph, &desired("Todoist/2025-01-02", &[t, task("2", "Undated")])).await;
        graph.seed(
            "Elsewhere",
            &[DesiredBlock::with_children(
                "copy",
                vec![
                    DesiredBlock::leaf("todoist-id:: 3"),
                    DesiredBlock::leaf("todoist-due:: May 1st, 2025"),
                ],
            )],
        );

        let dues = recorded_dues(&graph, "Todoist").await.unwrap();
        assert_eq!(dues.len(), 1);
        assert_eq!(dues[&TaskId::from("1")], "January 2nd, 2025");
    }

    #[tokio::test]
    async fn test_comment_refresh_replaces_wrapper() {
        let graph = MemoryGraph::new();
        let comment = |id: &str, at: &str| Comment {
            id: id.into(),
            task_id: "1".into(),
            text: format!("comment {id}"),
            posted_at: Some(at.into()),
        };
        let mut t = task("1", "Talk");
        t.comments = Some(vec![
            comment("c1", "2025-01-01T10:00:00Z"),
            comment("c2", "2025-01-02T10:00:00Z"),
        ]);
        run(&graph, &desired("Todoist", &[t.clone()])).await;

        t.comments
            .as_mut()
            .unwrap()
            .push(comment("c3", "2025-01-03T10:00:00Z"));
        run(&graph, &desired("Todoist", &[t])).await;

        let tree = graph.snapshot("Todoist");
        let wrappers: Vec<&Block> = tree[0]
            .children
            .iter()
            .filter(|c| c.content.starts_with("**Comments**"))
            .collect();
        assert_eq!(wrappers.len(), 1);
        assert!(wrappers[0].content.contains("todoist-comment-count:: 3"));
        assert_eq!(wrappers[0].children.len(), 3);
    }

    #[tokio::test]
    async fn test_relocated_task_moves_between_date_pages() {
        let graph = MemoryGraph::new();
        let mut t = task("1", "Move me");
        due(&mut t, "2025-01-02");
        run(&graph, &desired("Todoist/2025-01-02", &[t.clone()])).await;

        due(&mut t, "2025-01-05");
        let report = run(&graph, &desired("Todoist/2025-01-05", &[t])).await;

        assert!(identities(&graph.snapshot("Todoist/2025-01-02")).is_empty());
        assert_eq!(identities(&graph.snapshot("Todoist/2025-01-05")), vec!["1"]);
        assert_eq!(report.pages_cleaned, 1);
    }

    #[tokio::test]
    async fn test_pages_outside_prefix_are_untouched() {
        let graph = MemoryGraph::new();
        graph.seed(
            "Journal",
            &[DesiredBlock::with_children(
                "copied task",
                vec![DesiredBlock::leaf("todoist-id:: 9")],
            )],
        );
        run(&graph, &desired("Todoist", &[])).await;
        assert_eq!(identities(&graph.snapshot("Journal")), vec!["9"]);
    }

    #[tokio::test]
    async fn test_legacy_flat_entry_is_upgraded_in_place() {
        let graph = MemoryGraph::new();
        graph.seed(
            "Todoist",
            &[DesiredBlock::leaf("Old style\ntodoist-id:: 1\ntodoist-status:: ◼️")],
        );
        let before = graph.snapshot("Todoist")[0].id.clone();
        run(&graph, &desired("Todoist", &[task("1", "Old style")])).await;

        let tree = graph.snapshot("Todoist");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, before);
        assert_eq!(tree[0].content, "[[no due date]] Old style");
        assert_eq!(child_contents(&tree[0]).len(), 2);
    }

    #[tokio::test]
    async fn test_user_content_is_preserved() {
        let graph = MemoryGraph::new();
        graph.seed("Todoist", &[DesiredBlock::leaf("my own notes")]);
        run(&graph, &desired("Todoist", &[task("1", "T")])).await;

        let tree = graph.snapshot("Todoist");
        assert_eq!(tree[0].content, "my own notes");
        assert_eq!(identities(&tree), vec!["1"]);
    }

    #[tokio::test]
    async fn test_placeholder_is_removed() {
        let graph = MemoryGraph::new();
        graph.seed("Todoist", &[DesiredBlock::leaf("No tasks found")]);
        run(&graph, &desired("Todoist", &[task("1", "T")])).await;
        assert_eq!(graph.snapshot("Todoist").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_aborts_run() {
        let graph = MemoryGraph::new();
        graph.ensure_page("Todoist").await.unwrap();
        graph.fail_after(2);
        let result = reconcile(
            &graph,
            &desired("Todoist", &[task("1", "A"), task("2", "B")]),
            "Todoist",
            &StatusAliases::default(),
            &NoopProgress,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(graph.counts().inserted, 2);
    }

    #[tokio::test]
    async fn test_retry_after_partial_create_converges() {
        let graph = MemoryGraph::new();
        graph.ensure_page("Todoist").await.unwrap();
        let mut t = task("1", "Buy milk");
        due(&mut t, "2025-01-02");
        let desired = desired("Todoist", &[t]);

        graph.fail_after(1);
        let failed = reconcile(
            &graph,
            &desired,
            "Todoist",
            &StatusAliases::default(),
            &NoopProgress,
        )
        .await;
        assert!(failed.is_err());

        graph.recover();
        run(&graph, &desired).await;
        graph.reset_counts();
        run(&graph, &desired).await;

        let tree = graph.snapshot("Todoist");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].content, "[[January 2nd, 2025]] Buy milk");
        assert_eq!(
            child_contents(&tree[0]),
            vec![
                "todoist-id:: [1](https://todoist.com/showTask?id=1)",
                "todoist-due:: January 2nd, 2025",
                "todoist-status:: ◼️",
            ]
        );
        assert_eq!(graph.counts().blocks(), 0);
    }
}
