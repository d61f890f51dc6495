//! Builds the block tree a task should have in the graph, independent of
//! what the graph currently holds.

pub mod props;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::date_util;
use crate::graph::DesiredBlock;
use crate::task::{CanonicalTask, Comment};
use crate::text::{format_label_tag, sanitize_text};
use crate::url::task_url;

pub use props::{extract_identity, recorded_status, StatusAliases, TreeNode};
use props::*;

/// Project and label names keyed by id, used to resolve task references.
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    projects: HashMap<String, String>,
    labels: HashMap<String, String>,
    label_names: HashMap<String, String>,
}

impl Lookups {
    pub fn new(projects: HashMap<String, String>, labels: HashMap<String, String>) -> Self {
        let label_names = labels
            .values()
            .map(|name| (name.trim().to_lowercase(), name.clone()))
            .collect();
        Self {
            projects,
            labels,
            label_names,
        }
    }

    pub fn project_name(&self, project_id: &str) -> Option<&str> {
        self.projects.get(project_id).map(String::as_str)
    }

    /// Resolve a label reference by id, then by name, else keep it raw.
    pub fn resolve_label<'a>(&'a self, raw: &'a str) -> &'a str {
        self.labels
            .get(raw)
            .or_else(|| self.label_names.get(&raw.trim().to_lowercase()))
            .map(String::as_str)
            .unwrap_or(raw)
    }

    /// Display name of the task's project: the looked-up name, else the raw
    /// project id.
    pub fn task_project<'a>(&'a self, task: &'a CanonicalTask) -> Option<&'a str> {
        let id = task.project_id.as_deref()?;
        Some(self.project_name(id).unwrap_or(id))
    }
}

/// The calendar day a task is filed under: its due day, else (for completed
/// tasks) its completion day.
pub fn primary_day(task: &CanonicalTask) -> Option<chrono::NaiveDate> {
    task.due.day().or_else(|| {
        if task.is_completed() {
            task.completed_at.map(|dt| dt.date())
        } else {
            None
        }
    })
}

/// Text of the journal link at the start of the title line.
///
/// Explicit due date first, then the raw due string, then the completion
/// date. A completed task keeps showing when it was due, not when it was
/// ticked off.
fn primary_date_label(task: &CanonicalTask) -> String {
    if let Some(day) = task.due.day() {
        return date_util::format_journal_date(day);
    }
    if let Some(raw) = task.due.raw.as_deref() {
        let raw: String = raw.chars().filter(|c| *c != '[' && *c != ']').collect();
        let raw = raw.trim();
        if !raw.is_empty() {
            return raw.to_string();
        }
    }
    if task.is_completed() {
        if let Some(dt) = task.completed_at {
            return date_util::format_journal_date(dt.date());
        }
    }
    NO_DUE_DATE.to_string()
}

/// `#Name` for simple names, `#[[Some Name]]` otherwise.
pub fn project_tag(name: &str) -> Option<String> {
    let name: String = name.chars().filter(|c| *c != '[' && *c != ']').collect();
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let simple = name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '/');
    Some(if simple {
        format!("#{name}")
    } else {
        format!("#[[{name}]]")
    })
}

pub fn title_line(task: &CanonicalTask, lookups: &Lookups) -> String {
    let mut parts = vec![format!("[[{}]]", primary_date_label(task))];
    let title = sanitize_text(&task.title);
    if !title.is_empty() {
        parts.push(title);
    }
    if let Some(tag) = lookups.task_project(task).and_then(project_tag) {
        parts.push(tag);
    }
    parts.join(" ")
}

fn property(key: &str, value: &str) -> DesiredBlock {
    DesiredBlock::leaf(format!("{key}:: {value}"))
}

fn due_value(task: &CanonicalTask) -> Option<String> {
    if let Some(dt) = task.due.datetime {
        return Some(format!(
            "{} {}",
            date_util::format_journal_date(dt.date()),
            dt.format("%H:%M")
        ));
    }
    task.due.date.map(date_util::format_journal_date)
}

fn labels_value(task: &CanonicalTask, lookups: &Lookups) -> Option<String> {
    let mut seen = HashSet::new();
    let tags: Vec<String> = task
        .labels
        .iter()
        .map(|raw| lookups.resolve_label(raw))
        .filter(|name| seen.insert(name.trim().to_lowercase()))
        .filter_map(format_label_tag)
        .collect();
    (!tags.is_empty()).then(|| tags.join(" "))
}

fn completed_value(task: &CanonicalTask) -> Option<String> {
    if !task.is_completed() {
        return None;
    }
    task.completed_at
        .map(|dt| date_util::format_journal_date(dt.date()))
        .or_else(|| {
            task.completed_raw
                .as_deref()
                .map(sanitize_text)
                .filter(|s| !s.is_empty())
        })
}

/// Oldest first; unparseable timestamps last; ties by comment id.
fn compare_comments(a: &Comment, b: &Comment) -> Ordering {
    let ta = a.posted_at.as_deref().and_then(date_util::parse_timestamp);
    let tb = b.posted_at.as_deref().and_then(date_util::parse_timestamp);
    let by_time = match (ta, tb) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time.then_with(|| a.id.cmp(&b.id))
}

fn comment_block(task: &CanonicalTask, comment: &Comment) -> DesiredBlock {
    let mut lines = vec![
        format!("[💬]({}) {}", task_url(task.id.as_str()), sanitize_text(&comment.text))
            .trim_end()
            .to_string(),
        format!("{COMMENT_ID_KEY}:: {}", comment.id),
    ];
    if let Some(raw) = comment.posted_at.as_deref() {
        let posted = date_util::normalize_timestamp(raw).unwrap_or_else(|| sanitize_text(raw));
        if !posted.is_empty() {
            lines.push(format!("{COMMENT_POSTED_KEY}:: {posted}"));
        }
    }
    DesiredBlock::leaf(lines.join("\n"))
}

fn comments_block(task: &CanonicalTask) -> Option<DesiredBlock> {
    let comments = task.comments.as_ref().filter(|c| !c.is_empty())?;
    let mut ordered: Vec<&Comment> = comments.iter().collect();
    ordered.sort_by(|a, b| compare_comments(a, b));
    Some(DesiredBlock::with_children(
        format!("{COMMENTS_HEADER}\n{COMMENT_COUNT_KEY}:: {}", ordered.len()),
        ordered.into_iter().map(|c| comment_block(task, c)).collect(),
    ))
}

/// The full desired tree for one task: title block, property children in
/// fixed order, then the comment wrapper when comments were fetched.
pub fn build_tree(
    task: &CanonicalTask,
    lookups: &Lookups,
    aliases: &StatusAliases,
) -> DesiredBlock {
    let id = task.id.as_str();
    let mut children = vec![property(ID_KEY, &format!("[{id}]({})", task_url(id)))];

    if let Some(due) = due_value(task) {
        children.push(property(DUE_KEY, &due));
    }
    let description = sanitize_text(&task.description);
    if !description.is_empty() {
        children.push(property(DESCRIPTION_KEY, &description));
    }
    if let Some(labels) = labels_value(task, lookups) {
        children.push(property(LABELS_KEY, &labels));
    }
    if let Some(completed) = completed_value(task) {
        children.push(property(COMPLETED_KEY, &completed));
    }
    children.push(property(STATUS_KEY, aliases.alias(task.status)));

    if let Some(comments) = comments_block(task) {
        children.push(comments);
    }

    DesiredBlock::with_children(title_line(task, lookups), children)
}
