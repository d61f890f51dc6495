//! Canonical task model and the merge of active and completed listings.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::date_util;
use crate::text::normalize_whitespace;
use crate::todoist::types::{value_to_id, RawComment, RawDue, RawTask};
use crate::url::is_task_id;

/// Stable external identity of a task, always keyed as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskStatus {
    Active,
    Completed,
    Deleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Deleted => "deleted",
        }
    }
}

/// Due information: a calendar date, an exact time, or only the raw text
/// Todoist showed the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Due {
    pub date: Option<NaiveDate>,
    pub datetime: Option<NaiveDateTime>,
    pub raw: Option<String>,
}

impl Due {
    /// The calendar day this due value falls on, if it resolved at all.
    pub fn day(&self) -> Option<NaiveDate> {
        self.datetime.map(|dt| dt.date()).or(self.date)
    }

    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.datetime.is_none() && self.raw.is_none()
    }

    /// Rebuild a due value from a written `todoist-due` property. Values
    /// that are not journal dates come back as raw text.
    pub fn from_recorded(value: &str) -> Self {
        match date_util::parse_journal_date(value) {
            Some((date, time)) => Due {
                date: Some(date),
                datetime: time.map(|t| date.and_time(t)),
                raw: None,
            },
            None => Due {
                raw: Some(value.trim().to_string()).filter(|s| !s.is_empty()),
                ..Due::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    pub text: String,
    pub posted_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTask {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub project_id: Option<String>,
    pub labels: Vec<String>,
    pub due: Due,
    pub status: TaskStatus,
    pub completed_at: Option<NaiveDateTime>,
    pub completed_raw: Option<String>,
    /// `None` unless comment enrichment ran for this task.
    pub comments: Option<Vec<Comment>>,
}

impl CanonicalTask {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Merge the active and completed listings into one collection keyed by
/// task identity.
///
/// Completed records go in first and active records overwrite them: the two
/// listings are fetched from disjoint endpoints, so an id present in the
/// active listing is the fresher record. Records with no resolvable id are
/// dropped. Output keeps first-seen order.
pub fn normalize(active: &[RawTask], completed: &[RawTask]) -> Vec<CanonicalTask> {
    let mut order: Vec<TaskId> = Vec::new();
    let mut by_id: HashMap<TaskId, CanonicalTask> = HashMap::new();

    let tagged = completed
        .iter()
        .map(|raw| (raw, TaskStatus::Completed))
        .chain(active.iter().map(|raw| (raw, TaskStatus::Active)));

    for (raw, status) in tagged {
        let Some(task) = canonicalize(raw, status) else {
            log::debug!("Dropping task record without identity");
            continue;
        };
        if !by_id.contains_key(&task.id) {
            order.push(task.id.clone());
        }
        by_id.insert(task.id.clone(), task);
    }

    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

/// Resolve the identity of a raw record, trying the completed-listing key
/// first. Ids that could not be read back from a written entry are refused.
pub fn raw_identity(raw: &RawTask) -> Option<TaskId> {
    let id = [&raw.task_id, &raw.item_id, &raw.id, &raw.v2_id]
        .into_iter()
        .find_map(|v| value_to_id(v.as_ref()))?;
    if !is_task_id(&id) {
        log::warn!("Ignoring task with unusable id {id:?}");
        return None;
    }
    Some(TaskId(id))
}

fn canonicalize(raw: &RawTask, status: TaskStatus) -> Option<CanonicalTask> {
    let id = raw_identity(raw)?;
    // Completed records may carry the full task snapshot separately.
    let inner = raw.item_object.as_deref();
    let content = raw
        .content
        .clone()
        .or_else(|| inner.and_then(|i| i.content.clone()));
    let description = raw
        .description
        .clone()
        .or_else(|| inner.and_then(|i| i.description.clone()));

    let title = normalize_whitespace(&content.unwrap_or_default());
    let description = normalize_whitespace(&description.unwrap_or_default());
    let project_id = value_to_id(raw.project_id.as_ref())
        .or_else(|| inner.and_then(|i| value_to_id(i.project_id.as_ref())));
    let labels = raw
        .labels
        .as_ref()
        .or_else(|| inner.and_then(|i| i.labels.as_ref()))
        .map(|values| values.iter().filter_map(|v| value_to_id(Some(v))).collect())
        .unwrap_or_default();
    let due = raw
        .due
        .as_ref()
        .or_else(|| inner.and_then(|i| i.due.as_ref()))
        .map(parse_due)
        .unwrap_or_default();

    let (completed_at, completed_raw) = if status == TaskStatus::Completed {
        let raw_value = raw
            .completed_at
            .clone()
            .or_else(|| inner.and_then(|i| i.completed_at.clone()))
            .filter(|s| !s.trim().is_empty());
        let parsed = raw_value.as_deref().and_then(date_util::parse_timestamp);
        (parsed, raw_value)
    } else {
        (None, None)
    };

    Some(CanonicalTask {
        id,
        title,
        description,
        project_id,
        labels,
        due,
        status,
        completed_at,
        completed_raw,
        comments: None,
    })
}

fn parse_due(raw: &RawDue) -> Due {
    let date_value = raw.date.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let datetime_value = raw
        .datetime
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    // A `date` field can itself hold a full timestamp on older payloads.
    let (date, mut datetime) = match date_value {
        Some(d) if date_util::is_iso_date(d) => (date_util::parse_local_date(d), None),
        Some(d) => {
            let dt = date_util::parse_timestamp(d);
            (dt.map(|dt| dt.date()), dt)
        }
        None => (None, None),
    };
    if let Some(dt) = datetime_value.and_then(date_util::parse_timestamp) {
        datetime = Some(dt);
    }

    let raw_text = raw
        .string
        .as_deref()
        .or(date_value)
        .map(normalize_whitespace)
        .filter(|s| !s.is_empty());

    Due {
        date: date.or(datetime.map(|dt| dt.date())),
        datetime,
        raw: raw_text,
    }
}

/// Convert fetched comments, dropping any without an id.
pub fn normalize_comments(task_id: &TaskId, raw: &[RawComment]) -> Vec<Comment> {
    raw.iter()
        .filter_map(|c| {
            let id = value_to_id(c.id.as_ref())?;
            Some(Comment {
                id,
                task_id: value_to_id(c.task_id.as_ref())
                    .unwrap_or_else(|| task_id.0.clone()),
                text: c.content.clone().unwrap_or_default(),
                posted_at: c.posted_at.clone().filter(|s| !s.trim().is_empty()),
            })
        })
        .collect()
}
