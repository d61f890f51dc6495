//! Wire types for Todoist responses.
//!
//! Every field is optional: the active, completed and sync-style endpoints
//! disagree on shapes and ids arrive as either strings or numbers. Nothing
//! here is trusted until `task::normalize` has looked at it.

use serde::Deserialize;
use serde_json::Value;

/// A task record from any of the task listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTask {
    #[serde(default)]
    pub id: Option<Value>,
    /// Completed listings key the task here; `id` is the completion record.
    #[serde(default)]
    pub task_id: Option<Value>,
    #[serde(default)]
    pub item_id: Option<Value>,
    #[serde(default)]
    pub v2_id: Option<Value>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project_id: Option<Value>,
    #[serde(default)]
    pub labels: Option<Vec<Value>>,
    #[serde(default)]
    pub due: Option<RawDue>,
    #[serde(default)]
    pub completed_at: Option<String>,
    /// Full task snapshot attached to completed records when annotated.
    #[serde(default)]
    pub item_object: Option<Box<RawTask>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDue {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub string: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProject {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLabel {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawComment {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, alias = "item_id")]
    pub task_id: Option<Value>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub posted_at: Option<String>,
}

/// One page of a cursor-paginated listing. Older endpoints return a bare
/// array, which is treated as a single final page.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Paged {
        #[serde(default = "Vec::new")]
        results: Vec<T>,
        #[serde(default, alias = "cursor")]
        next_cursor: Option<String>,
    },
    Bare(Vec<T>),
}

/// One page of the offset-paginated completed listing.
#[derive(Debug, Deserialize)]
pub struct CompletedPage {
    #[serde(default)]
    pub items: Vec<RawTask>,
}

/// Normalise a string-or-number identifier. Blank strings and any other
/// JSON type yield `None`.
pub fn value_to_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_id() {
        assert_eq!(value_to_id(Some(&json!("abc"))).as_deref(), Some("abc"));
        assert_eq!(value_to_id(Some(&json!(123))).as_deref(), Some("123"));
        assert_eq!(value_to_id(Some(&json!("  "))), None);
        assert_eq!(value_to_id(Some(&json!(null))), None);
        assert_eq!(value_to_id(Some(&json!({"a": 1}))), None);
        assert_eq!(value_to_id(None), None);
    }

    #[test]
    fn test_listing_paged() {
        let page: Listing<RawProject> = serde_json::from_value(json!({
            "results": [{"id": "p1", "name": "Inbox"}],
            "next_cursor": "abc"
        }))
        .unwrap();
        match page {
            Listing::Paged {
                results,
                next_cursor,
            } => {
                assert_eq!(results.len(), 1);
                assert_eq!(next_cursor.as_deref(), Some("abc"));
            }
            Listing::Bare(_) => panic!("expected paged listing"),
        }
    }

    #[test]
    fn test_listing_cursor_alias_and_bare() {
        let page: Listing<RawLabel> =
            serde_json::from_value(json!({"results": [], "cursor": null})).unwrap();
        assert!(matches!(page, Listing::Paged { next_cursor: None, .. }));

        let bare: Listing<RawLabel> =
            serde_json::from_value(json!([{"id": 1, "name": "work"}])).unwrap();
        assert!(matches!(bare, Listing::Bare(ref v) if v.len() == 1));
    }

    #[test]
    fn test_raw_task_tolerates_missing_fields() {
        let task: RawTask = serde_json::from_value(json!({"content": "x"})).unwrap();
        assert!(task.id.is_none());
        assert!(task.due.is_none());

        let task: RawTask = serde_json::from_value(json!({
            "task_id": 99,
            "completed_at": "2025-01-03T10:00:00Z",
            "item_object": {"id": 99, "content": "x", "due": {"date": "2025-01-02"}}
        }))
        .unwrap();
        assert_eq!(value_to_id(task.task_id.as_ref()).as_deref(), Some("99"));
        assert!(task.item_object.is_some());
    }
}
