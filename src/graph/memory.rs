use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{page_key, Block, BlockStore, DesiredBlock, NodeId, PageRef, Parent, Placement};
use crate::error::{Error, Result};

/// Mutation counters, for asserting how much a run wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationCounts {
    pub pages_created: u64,
    pub inserted: u64,
    pub updated: u64,
    pub removed: u64,
}

impl MutationCounts {
    /// Block-level mutations (page creation excluded).
    pub fn blocks(&self) -> u64 {
        self.inserted + self.updated + self.removed
    }
}

#[derive(Default)]
struct State {
    pages: BTreeMap<String, (String, Vec<Block>)>,
    next_id: u64,
    counts: MutationCounts,
    fail_after: Option<u64>,
}

impl State {
    fn fresh_id(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(format!("mem-{}", self.next_id))
    }

    /// Count a mutation, or fail it when the failure budget is spent.
    fn charge(&mut self) -> Result<()> {
        if let Some(left) = self.fail_after {
            if left == 0 {
                return Err(Error::Graph("injected mutation failure".into()));
            }
            self.fail_after = Some(left - 1);
        }
        Ok(())
    }

    fn seed_tree(&mut self, desired: &DesiredBlock) -> Block {
        Block {
            id: self.fresh_id(),
            content: desired.content.clone(),
            children: desired.children.iter().map(|c| self.seed_tree(c)).collect(),
        }
    }
}

/// In-memory graph used by tests and dry runs.
#[derive(Default)]
pub struct MemoryGraph {
    state: Mutex<State>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append blocks to a page without counting them as mutations.
    pub fn seed(&self, page: &str, blocks: &[DesiredBlock]) {
        let mut state = self.lock();
        let seeded: Vec<Block> = blocks.iter().map(|b| state.seed_tree(b)).collect();
        state
            .pages
            .entry(page_key(page))
            .or_insert_with(|| (page.to_string(), Vec::new()))
            .1
            .extend(seeded);
    }

    /// Current tree of a page.
    pub fn snapshot(&self, page: &str) -> Vec<Block> {
        self.lock()
            .pages
            .get(&page_key(page))
            .map(|(_, blocks)| blocks.clone())
            .unwrap_or_default()
    }

    pub fn counts(&self) -> MutationCounts {
        self.lock().counts
    }

    pub fn reset_counts(&self) {
        self.lock().counts = MutationCounts::default();
    }

    /// Make every mutation after the next `n` fail.
    pub fn fail_after(&self, n: u64) {
        self.lock().fail_after = Some(n);
    }

    /// Stop injecting failures.
    pub fn recover(&self) {
        self.lock().fail_after = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn find_mut<'a>(blocks: &'a mut [Block], id: &NodeId) -> Option<&'a mut Block> {
    for block in blocks {
        if &block.id == id {
            return Some(block);
        }
        if let Some(found) = find_mut(&mut block.children, id) {
            return Some(found);
        }
    }
    None
}

/// The sibling list holding `id`, with its index.
fn find_siblings_mut<'a>(
    blocks: &'a mut Vec<Block>,
    id: &NodeId,
) -> Option<(&'a mut Vec<Block>, usize)> {
    if let Some(pos) = blocks.iter().position(|b| &b.id == id) {
        return Some((blocks, pos));
    }
    for block in blocks.iter_mut() {
        if let Some(found) = find_siblings_mut(&mut block.children, id) {
            return Some(found);
        }
    }
    None
}

fn find_in_pages_mut<'a>(
    pages: &'a mut BTreeMap<String, (String, Vec<Block>)>,
    id: &NodeId,
) -> Option<(&'a mut Vec<Block>, usize)> {
    pages
        .values_mut()
        .find_map(|(_, blocks)| find_siblings_mut(blocks, id))
}

#[async_trait]
impl BlockStore for MemoryGraph {
    async fn ensure_page(&self, name: &str) -> Result<PageRef> {
        let mut state = self.lock();
        let key = page_key(name);
        if let Some((existing, _)) = state.pages.get(&key) {
            return Ok(PageRef {
                name: existing.clone(),
            });
        }
        state.charge()?;
        state.counts.pages_created += 1;
        state.pages.insert(key, (name.to_string(), Vec::new()));
        Ok(PageRef {
            name: name.to_string(),
        })
    }

    async fn list_pages(&self) -> Result<Vec<PageRef>> {
        Ok(self
            .lock()
            .pages
            .values()
            .map(|(name, _)| PageRef { name: name.clone() })
            .collect())
    }

    async fn page_tree(&self, page: &str) -> Result<Vec<Block>> {
        Ok(self.snapshot(page))
    }

    async fn insert(&self, placement: &Placement, content: &str) -> Result<NodeId> {
        let mut state = self.lock();
        state.charge()?;
        let block = Block {
            id: state.fresh_id(),
            content: content.to_string(),
            children: Vec::new(),
        };
        let id = block.id.clone();
        let missing = || Error::Graph(format!("insert target not found: {placement:?}"));
        match placement {
            Placement::Append(Parent::Page(name)) | Placement::Prepend(Parent::Page(name)) => {
                let (_, blocks) = state.pages.get_mut(&page_key(name)).ok_or_else(missing)?;
                if matches!(placement, Placement::Append(_)) {
                    blocks.push(block);
                } else {
                    blocks.insert(0, block);
                }
            }
            Placement::Append(Parent::Block(parent))
            | Placement::Prepend(Parent::Block(parent)) => {
                let prepend = matches!(placement, Placement::Prepend(_));
                let target = state
                    .pages
                    .values_mut()
                    .find_map(|(_, blocks)| find_mut(blocks, parent))
                    .ok_or_else(missing)?;
                if prepend {
                    target.children.insert(0, block);
                } else {
                    target.children.push(block);
                }
            }
            Placement::After(sibling) => {
                let (siblings, pos) =
                    find_in_pages_mut(&mut state.pages, sibling).ok_or_else(missing)?;
                siblings.insert(pos + 1, block);
            }
        }
        state.counts.inserted += 1;
        Ok(id)
    }

    async fn update(&self, id: &NodeId, content: &str) -> Result<()> {
        let mut state = self.lock();
        state.charge()?;
        let block = state
            .pages
            .values_mut()
            .find_map(|(_, blocks)| find_mut(blocks, id))
            .ok_or_else(|| Error::Graph(format!("block not found: {id}")))?;
        block.content = content.to_string();
        state.counts.updated += 1;
        Ok(())
    }

    async fn remove(&self, id: &NodeId) -> Result<()> {
        let mut state = self.lock();
        state.charge()?;
        let (siblings, pos) = find_in_pages_mut(&mut state.pages, id)
            .ok_or_else(|| Error::Graph(format!("block not found: {id}")))?;
        siblings.remove(pos);
        state.counts.removed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(blocks: &[Block]) -> Vec<&str> {
        blocks.iter().map(|b| b.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_ensure_page_is_get_or_create() {
        let graph = MemoryGraph::new();
        graph.ensure_page("Todoist").await.unwrap();
        let again = graph.ensure_page("todoist").await.unwrap();
        assert_eq!(again.name, "Todoist");
        assert_eq!(graph.counts().pages_created, 1);
    }

    #[tokio::test]
    async fn test_insert_placements() {
        let graph = MemoryGraph::new();
        graph.ensure_page("P").await.unwrap();
        let b = graph
            .insert(&Placement::Append(Parent::Page("P".into())), "b")
            .await
            .unwrap();
        graph
            .insert(&Placement::Prepend(Parent::Page("P".into())), "a")
            .await
            .unwrap();
        graph.insert(&Placement::After(b.clone()), "c").await.unwrap();
        let child = graph
            .insert(&Placement::Append(Parent::Block(b.clone())), "b2")
            .await
            .unwrap();
        graph
            .insert(&Placement::Prepend(Parent::Block(b.clone())), "b1")
            .await
            .unwrap();
        graph.insert(&Placement::After(child), "b3").await.unwrap();

        let tree = graph.snapshot("P");
        assert_eq!(contents(&tree), vec!["a", "b", "c"]);
        assert_eq!(contents(&tree[1].children), vec!["b1", "b2", "b3"]);
        assert_eq!(graph.counts().inserted, 6);
    }

    #[tokio::test]
    async fn test_update_and_remove_nested() {
        let graph = MemoryGraph::new();
        graph.seed(
            "P",
            &[DesiredBlock::with_children("root", vec![DesiredBlock::leaf("child")])],
        );
        let tree = graph.snapshot("P");
        let child_id = tree[0].children[0].id.clone();
        graph.update(&child_id, "changed").await.unwrap();
        assert_eq!(graph.snapshot("P")[0].children[0].content, "changed");
        graph.remove(&child_id).await.unwrap();
        assert!(graph.snapshot("P")[0].children.is_empty());
        assert_eq!(graph.counts().blocks(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let graph = MemoryGraph::new();
        graph.ensure_page("P").await.unwrap();
        graph.fail_after(1);
        let page = Placement::Append(Parent::Page("P".into()));
        assert!(graph.insert(&page, "one").await.is_ok());
        assert!(graph.insert(&page, "two").await.is_err());
        assert_eq!(contents(&graph.snapshot("P")), vec!["one"]);
        graph.recover();
        assert!(graph.insert(&page, "three").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_targets_error() {
        let graph = MemoryGraph::new();
        assert!(graph.update(&NodeId("nope".into()), "x").await.is_err());
        assert!(graph.remove(&NodeId("nope".into())).await.is_err());
        assert!(graph
            .insert(&Placement::Append(Parent::Page("missing".into())), "x")
            .await
            .is_err());
    }
}
