//! Property vocabulary written into blocks, and the accessors that read it
//! back out of existing or desired trees.

use crate::graph::{Block, DesiredBlock};
use crate::task::{TaskId, TaskStatus};
use crate::url::resolve_task_id;

pub const ID_KEY: &str = "todoist-id";
pub const DUE_KEY: &str = "todoist-due";
pub const DESCRIPTION_KEY: &str = "todoist-description";
pub const LABELS_KEY: &str = "todoist-labels";
pub const COMPLETED_KEY: &str = "todoist-completed";
pub const STATUS_KEY: &str = "todoist-status";
pub const COMMENT_COUNT_KEY: &str = "todoist-comment-count";
pub const COMMENT_ID_KEY: &str = "todoist-comment-id";
pub const COMMENT_POSTED_KEY: &str = "todoist-comment-posted";

pub const COMMENTS_HEADER: &str = "**Comments**";
pub const NO_DUE_DATE: &str = "no due date";

/// Sentinel block older versions left on pages with nothing to show.
pub const PLACEHOLDER_TEXT: &str = "No tasks found";

/// Display values for the `todoist-status` property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusAliases {
    pub active: String,
    pub completed: String,
    pub deleted: String,
}

impl Default for StatusAliases {
    fn default() -> Self {
        Self {
            active: "◼️".to_string(),
            completed: "✅".to_string(),
            deleted: "🗑️".to_string(),
        }
    }
}

impl StatusAliases {
    /// The configured alias, or the raw status name when none is set.
    pub fn alias(&self, status: TaskStatus) -> &str {
        let alias = match status {
            TaskStatus::Active => &self.active,
            TaskStatus::Completed => &self.completed,
            TaskStatus::Deleted => &self.deleted,
        };
        let alias = alias.trim();
        if alias.is_empty() {
            status.as_str()
        } else {
            alias
        }
    }

    /// Map a recorded property value back to a status. Both the alias and
    /// the raw name are recognised so changing an alias keeps old entries
    /// readable.
    pub fn parse(&self, value: &str) -> Option<TaskStatus> {
        let value = value.trim();
        [TaskStatus::Completed, TaskStatus::Active, TaskStatus::Deleted]
            .into_iter()
            .find(|s| value == self.alias(*s) || value.eq_ignore_ascii_case(s.as_str()))
    }
}

/// Read access shared by existing blocks and desired trees.
pub trait TreeNode: Sized {
    fn content(&self) -> &str;
    fn child_nodes(&self) -> &[Self];
}

impl TreeNode for Block {
    fn content(&self) -> &str {
        &self.content
    }

    fn child_nodes(&self) -> &[Self] {
        &self.children
    }
}

impl TreeNode for DesiredBlock {
    fn content(&self) -> &str {
        &self.content
    }

    fn child_nodes(&self) -> &[Self] {
        &self.children
    }
}

/// Parse one `key:: value` line. Keys are bare identifiers
/// (alphanumerics, `-`, `_`).
pub fn parse_property(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.trim().split_once("::")?;
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| (key, value.trim()))
}

/// Value of `key` on any line of `content`.
pub fn find_property<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content
        .lines()
        .filter_map(parse_property)
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Key of a block whose whole content is a single property line.
pub fn property_line_key(content: &str) -> Option<&str> {
    let content = content.trim();
    if content.contains('\n') {
        return None;
    }
    parse_property(content).map(|(k, _)| k)
}

/// Look up a property on the node itself, then on each direct child.
pub fn node_property<'a, N: TreeNode>(node: &'a N, key: &str) -> Option<&'a str> {
    find_property(node.content(), key).or_else(|| {
        node.child_nodes()
            .iter()
            .find_map(|child| find_property(child.content(), key))
    })
}

/// Task identity of a root node. The id property may live in the root's
/// own content (flat layout) or in one of its direct children.
pub fn extract_identity<N: TreeNode>(node: &N) -> Option<TaskId> {
    node_property(node, ID_KEY)
        .and_then(resolve_task_id)
        .map(TaskId)
}

pub fn is_comment_wrapper(content: &str) -> bool {
    find_property(content, COMMENT_COUNT_KEY).is_some()
}

/// Status a node records about itself: the status property when it names a
/// known status, otherwise `Completed` if a completion property exists.
/// Entries written under an older alias stay recognisable as completed.
pub fn recorded_status<N: TreeNode>(node: &N, aliases: &StatusAliases) -> Option<TaskStatus> {
    node_property(node, STATUS_KEY)
        .and_then(|value| aliases.parse(value))
        .or_else(|| node_property(node, COMPLETED_KEY).map(|_| TaskStatus::Completed))
}

pub fn is_placeholder(content: &str) -> bool {
    let letters: String = content
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    letters.split_whitespace().collect::<Vec<_>>().join(" ").eq_ignore_ascii_case(PLACEHOLDER_TEXT)
}
