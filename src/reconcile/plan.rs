//! Pure diffing of desired task trees against a page's current blocks.
//!
//! Nothing here performs I/O: the output is an ordered list of
//! [`Mutation`]s for the executor to apply.

use std::collections::{BTreeSet, HashMap};

use crate::document::props::{
    extract_identity, is_comment_wrapper, is_placeholder, property_line_key, recorded_status,
    StatusAliases,
};
use crate::graph::{Block, DesiredBlock, NodeId, Parent, Placement};
use crate::task::{TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create `blocks` as consecutive siblings, the first at `placement`.
    Create {
        placement: Placement,
        blocks: Vec<DesiredBlock>,
    },
    Update {
        id: NodeId,
        content: String,
    },
    Delete {
        id: NodeId,
    },
}

/// Mutations for one page plus what the plan decided along the way.
#[derive(Debug, Clone, Default)]
pub struct PagePlan {
    pub mutations: Vec<Mutation>,
    pub seen: BTreeSet<TaskId>,
    /// Obsolete entries kept because they record a completed task.
    pub retained: usize,
    /// Desired roots without an identity, never written.
    pub skipped: usize,
}

impl PagePlan {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Top-level blocks keyed by task identity. The first block claiming an
/// identity wins; later claimants are listed in `duplicates`.
pub struct ExistingIndex<'a> {
    pub by_id: HashMap<TaskId, &'a Block>,
    pub order: Vec<TaskId>,
    pub duplicates: Vec<(TaskId, &'a Block)>,
}

pub fn index_existing(existing: &[Block]) -> ExistingIndex<'_> {
    let mut index = ExistingIndex {
        by_id: HashMap::new(),
        order: Vec::new(),
        duplicates: Vec::new(),
    };
    for block in existing {
        let Some(id) = extract_identity(block) else {
            continue;
        };
        if index.by_id.contains_key(&id) {
            index.duplicates.push((id, block));
        } else {
            index.order.push(id.clone());
            index.by_id.insert(id, block);
        }
    }
    index
}

/// Diff a page. `page` is the name used for appending new roots.
pub fn plan_page(
    page: &str,
    existing: &[Block],
    desired: &[DesiredBlock],
    aliases: &StatusAliases,
) -> PagePlan {
    let index = index_existing(existing);
    let mut plan = PagePlan::default();

    for root in desired {
        let Some(id) = extract_identity(root) else {
            plan.skipped += 1;
            continue;
        };
        if !plan.seen.insert(id.clone()) {
            log::warn!("Task {id} appears twice for page {page}; keeping the first");
            continue;
        }
        match index.by_id.get(&id) {
            Some(current) => {
                // Children first: a flat entry keeps its inline identity
                // until the identity child exists.
                plan.mutations.extend(plan_children(current, root));
                if current.content != root.content {
                    plan.mutations.push(Mutation::Update {
                        id: current.id.clone(),
                        content: root.content.clone(),
                    });
                }
            }
            None => plan.mutations.push(Mutation::Create {
                placement: Placement::Append(Parent::Page(page.to_string())),
                blocks: vec![root.clone()],
            }),
        }
    }

    remove_obsolete(&index, &mut plan, aliases);
    remove_placeholders(existing, &mut plan);
    plan
}

/// Cleanup for a page that received no tasks this run: every entry not
/// recorded as completed goes, as do placeholders.
pub fn plan_cleanup(existing: &[Block], aliases: &StatusAliases) -> PagePlan {
    let index = index_existing(existing);
    let mut plan = PagePlan::default();
    remove_obsolete(&index, &mut plan, aliases);
    remove_placeholders(existing, &mut plan);
    plan
}

fn is_retained(block: &Block, aliases: &StatusAliases) -> bool {
    recorded_status(block, aliases) == Some(TaskStatus::Completed)
}

fn remove_obsolete(index: &ExistingIndex<'_>, plan: &mut PagePlan, aliases: &StatusAliases) {
    for id in &index.order {
        if plan.seen.contains(id) {
            continue;
        }
        let block = index.by_id[id];
        if is_retained(block, aliases) {
            plan.retained += 1;
            continue;
        }
        log::debug!("Removing obsolete entry for task {id}");
        plan.mutations.push(Mutation::Delete {
            id: block.id.clone(),
        });
    }
    for (id, block) in &index.duplicates {
        if is_retained(block, aliases) {
            log::warn!("Keeping duplicate completed entry for task {id}");
            plan.retained += 1;
            continue;
        }
        log::debug!("Removing duplicate entry for task {id}");
        plan.mutations.push(Mutation::Delete {
            id: block.id.clone(),
        });
    }
}

fn remove_placeholders(existing: &[Block], plan: &mut PagePlan) {
    for block in existing.iter().filter(|b| is_placeholder(&b.content)) {
        plan.mutations.push(Mutation::Delete {
            id: block.id.clone(),
        });
    }
}

/// Reconcile the children of a root that already exists.
///
/// Property lines are matched by key, updated in place and added when
/// missing; properties the desired tree lacks are left alone. The comment
/// wrapper is replaced wholesale when it differs, and never removed when no
/// comments are desired.
fn plan_children(current: &Block, desired: &DesiredBlock) -> Vec<Mutation> {
    let mut mutations = Vec::new();

    let mut existing_props: HashMap<&str, &Block> = HashMap::new();
    for child in &current.children {
        if let Some(key) = property_line_key(&child.content) {
            existing_props.entry(key).or_insert(child);
        }
    }

    let mut anchor: Option<NodeId> = None;
    let mut pending: Vec<DesiredBlock> = Vec::new();
    let flush =
        |pending: &mut Vec<DesiredBlock>, anchor: &Option<NodeId>, out: &mut Vec<Mutation>| {
            if pending.is_empty() {
                return;
            }
            let placement = match anchor {
                Some(id) => Placement::After(id.clone()),
                None => Placement::Prepend(Parent::Block(current.id.clone())),
            };
            out.push(Mutation::Create {
                placement,
                blocks: std::mem::take(pending),
            });
        };

    for child in &desired.children {
        let Some(key) = property_line_key(&child.content) else {
            continue;
        };
        match existing_props.get(key) {
            Some(existing) => {
                flush(&mut pending, &anchor, &mut mutations);
                if existing.content != child.content {
                    mutations.push(Mutation::Update {
                        id: existing.id.clone(),
                        content: child.content.clone(),
                    });
                }
                anchor = Some(existing.id.clone());
            }
            None => pending.push(child.clone()),
        }
    }
    flush(&mut pending, &anchor, &mut mutations);

    let desired_wrapper = desired.children.iter().find(|c| is_comment_wrapper(&c.content));
    if let Some(wrapper) = desired_wrapper {
        let existing_wrappers: Vec<&Block> = current
            .children
            .iter()
            .filter(|c| is_comment_wrapper(&c.content))
            .collect();
        let unchanged = existing_wrappers.len() == 1 && same_tree(existing_wrappers[0], wrapper);
        if !unchanged {
            mutations.extend(existing_wrappers.iter().map(|b| Mutation::Delete {
                id: b.id.clone(),
            }));
            mutations.push(Mutation::Create {
                placement: Placement::Append(Parent::Block(current.id.clone())),
                blocks: vec![wrapper.clone()],
            });
        }
    }

    mutations
}

/// Structural equality of an existing subtree and a desired one.
pub fn same_tree(existing: &Block, desired: &DesiredBlock) -> bool {
    existing.content == desired.content
        && existing.children.len() == desired.children.len()
        && existing
            .children
            .iter()
            .zip(&desired.children)
            .all(|(e, d)| same_tree(e, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: &str, content: &str, children: Vec<Block>) -> Block {
        Block {
            id: NodeId(id.to_string()),
            content: content.to_string(),
            children,
        }
    }

    fn leaf(id: &str, content: &str) -> Block {
        block(id, content, Vec::new())
    }

    fn desired(content: &str, children: &[&str]) -> DesiredBlock {
        DesiredBlock::with_children(
            content,
            children.iter().map(|c| DesiredBlock::leaf(*c)).collect(),
        )
    }

    fn aliases() -> StatusAliases {
        StatusAliases::default()
    }

    #[test]
    fn test_new_task_is_created_on_page() {
        let d = desired("[[x]] Test", &["todoist-id:: 1", "todoist-status:: ◼️"]);
        let plan = plan_page("Todoist", &[], &[d.clone()], &aliases());
        assert_eq!(
            plan.mutations,
            vec![Mutation::Create {
                placement: Placement::Append(Parent::Page("Todoist".into())),
                blocks: vec![d],
            }]
        );
        assert!(plan.seen.contains(&TaskId::from("1")));
    }

    #[test]
    fn test_unkeyed_roots_are_skipped() {
        let plan = plan_page("P", &[], &[desired("no id", &["x:: y"])], &aliases());
        assert!(plan.is_empty());
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn test_unchanged_tree_plans_nothing() {
        let existing = vec![block(
            "b1",
            "[[x]] Test",
            vec![leaf("b2", "todoist-id:: 1"), leaf("b3", "todoist-status:: ◼️")],
        )];
        let d = desired("[[x]] Test", &["todoist-id:: 1", "todoist-status:: ◼️"]);
        assert!(plan_page("P", &existing, &[d], &aliases()).is_empty());
    }

    #[test]
    fn test_changed_title_and_property_are_updated() {
        let existing = vec![block(
            "b1",
            "[[x]] Old",
            vec![leaf("b2", "todoist-id:: 1"), leaf("b3", "todoist-status:: ◼️")],
        )];
        let d = desired("[[x]] New", &["todoist-id:: 1", "todoist-status:: ✅"]);
        let plan = plan_page("P", &existing, &[d], &aliases());
        assert_eq!(
            plan.mutations,
            vec![
                Mutation::Update {
                    id: NodeId("b3".into()),
                    content: "todoist-status:: ✅".into()
                },
                Mutation::Update {
                    id: NodeId("b1".into()),
                    content: "[[x]] New".into()
                },
            ]
        );
    }

    #[test]
    fn test_missing_properties_are_inserted_in_order() {
        let existing = vec![block(
            "b1",
            "t",
            vec![leaf("b2", "todoist-id:: 1"), leaf("b3", "todoist-status:: ◼️")],
        )];
        let d = desired(
            "t",
            &[
                "todoist-id:: 1",
                "todoist-due:: d",
                "todoist-description:: x",
                "todoist-status:: ◼️",
            ],
        );
        let plan = plan_page("P", &existing, &[d], &aliases());
        assert_eq!(
            plan.mutations,
            vec![Mutation::Create {
                placement: Placement::After(NodeId("b2".into())),
                blocks: vec![
                    DesiredBlock::leaf("todoist-due:: d"),
                    DesiredBlock::leaf("todoist-description:: x"),
                ],
            }]
        );
    }

    #[test]
    fn test_flat_legacy_root_gets_properties_before_rewrite() {
        let existing = vec![leaf("b1", "t\ntodoist-id:: 1")];
        let d = desired("t", &["todoist-id:: 1", "todoist-status:: ◼️"]);
        let plan = plan_page("P", &existing, &[d], &aliases());
        assert_eq!(
            plan.mutations,
            vec![
                Mutation::Create {
                    placement: Placement::Prepend(Parent::Block(NodeId("b1".into()))),
                    blocks: vec![
                        DesiredBlock::leaf("todoist-id:: 1"),
                        DesiredBlock::leaf("todoist-status:: ◼️"),
                    ],
                },
                Mutation::Update {
                    id: NodeId("b1".into()),
                    content: "t".into()
                },
            ]
        );
    }

    #[test]
    fn test_extra_existing_properties_and_user_blocks_are_left() {
        let existing = vec![block(
            "b1",
            "t",
            vec![
                leaf("b2", "todoist-id:: 1"),
                leaf("b3", "todoist-due:: old"),
                leaf("u1", "my own note"),
            ],
        )];
        let d = desired("t", &["todoist-id:: 1"]);
        assert!(plan_page("P", &existing, &[d], &aliases()).is_empty());
    }

    #[test]
    fn test_obsolete_active_removed_completed_retained() {
        let existing = vec![
            block(
                "a",
                "t1",
                vec![leaf("a1", "todoist-id:: 1"), leaf("a2", "todoist-status:: ◼️")],
            ),
            block(
                "b",
                "t2",
                vec![leaf("b1", "todoist-id:: 2"), leaf("b2", "todoist-status:: ✅")],
            ),
            block("c", "t3", vec![leaf("c1", "todoist-id:: 3")]),
            leaf("u", "user block without id"),
        ];
        let plan = plan_page("P", &existing, &[], &aliases());
        assert_eq!(
            plan.mutations,
            vec![
                Mutation::Delete { id: NodeId("a".into()) },
                Mutation::Delete { id: NodeId("c".into()) },
            ]
        );
        assert_eq!(plan.retained, 1);
    }

    #[test]
    fn test_placeholders_removed() {
        let existing = vec![leaf("p", "No tasks found"), leaf("u", "keep me")];
        let plan = plan_cleanup(&existing, &aliases());
        assert_eq!(plan.mutations, vec![Mutation::Delete { id: NodeId("p".into()) }]);
    }

    #[test]
    fn test_duplicates_removed_unless_completed() {
        let existing = vec![
            block("a", "t", vec![leaf("a1", "todoist-id:: 1")]),
            block("b", "t", vec![leaf("b1", "todoist-id:: 1")]),
            block("c", "t", vec![leaf("c1", "todoist-id:: 1"), leaf("c2", "todoist-status:: ✅")]),
        ];
        let d = desired("t", &["todoist-id:: 1"]);
        let plan = plan_page("P", &existing, &[d], &aliases());
        assert_eq!(plan.mutations, vec![Mutation::Delete { id: NodeId("b".into()) }]);
        assert_eq!(plan.retained, 1);
    }

    #[test]
    fn test_comment_wrapper_replaced_when_changed() {
        let existing = vec![block(
            "r",
            "t",
            vec![
                leaf("i", "todoist-id:: 1"),
                block(
                    "w",
                    "**Comments**\ntodoist-comment-count:: 1",
                    vec![leaf("c1", "one")],
                ),
                block("w2", "**Comments**\ntodoist-comment-count:: 0", vec![]),
            ],
        )];
        let wrapper = DesiredBlock::with_children(
            "**Comments**\ntodoist-comment-count:: 2",
            vec![DesiredBlock::leaf("one"), DesiredBlock::leaf("two")],
        );
        let d = DesiredBlock::with_children(
            "t",
            vec![DesiredBlock::leaf("todoist-id:: 1"), wrapper.clone()],
        );
        let plan = plan_page("P", &existing, &[d], &aliases());
        assert_eq!(
            plan.mutations,
            vec![
                Mutation::Delete { id: NodeId("w".into()) },
                Mutation::Delete { id: NodeId("w2".into()) },
                Mutation::Create {
                    placement: Placement::Append(Parent::Block(NodeId("r".into()))),
                    blocks: vec![wrapper],
                },
            ]
        );
    }

    #[test]
    fn test_identical_comment_wrapper_kept() {
        let existing = vec![block(
            "r",
            "t",
            vec![
                leaf("i", "todoist-id:: 1"),
                block("w", "**Comments**\ntodoist-comment-count:: 1", vec![leaf("c1", "one")]),
            ],
        )];
        let d = DesiredBlock::with_children(
            "t",
            vec![
                DesiredBlock::leaf("todoist-id:: 1"),
                DesiredBlock::with_children(
                    "**Comments**\ntodoist-comment-count:: 1",
                    vec![DesiredBlock::leaf("one")],
                ),
            ],
        );
        assert!(plan_page("P", &existing, &[d], &aliases()).is_empty());
    }

    #[test]
    fn test_comment_wrapper_left_when_not_desired() {
        let existing = vec![block(
            "r",
            "t",
            vec![
                leaf("i", "todoist-id:: 1"),
                block("w", "**Comments**\ntodoist-comment-count:: 1", vec![leaf("c1", "one")]),
            ],
        )];
        let d = desired("t", &["todoist-id:: 1"]);
        assert!(plan_page("P", &existing, &[d], &aliases()).is_empty());
    }
}
