use crate::document::props::{find_property, ID_KEY};
use crate::error::Result;
use crate::graph::{BlockStore, DesiredBlock, NodeId, Parent, Placement};

use super::plan::Mutation;
use super::MutationStats;

/// Mutations applied between cooperative yields.
pub const YIELD_EVERY: usize = 25;

/// Applies planned mutations in order. The first failure aborts the
/// remainder; whatever was already applied stays applied.
pub struct Executor<'a, S: BlockStore + ?Sized> {
    store: &'a S,
    since_yield: usize,
}

impl<'a, S: BlockStore + ?Sized> Executor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            since_yield: 0,
        }
    }

    pub async fn apply(&mut self, mutations: &[Mutation], stats: &mut MutationStats) -> Result<()> {
        for mutation in mutations {
            match mutation {
                Mutation::Create { placement, blocks } => {
                    let mut placement = placement.clone();
                    for block in blocks {
                        let id = self.create_tree(&placement, block, stats).await?;
                        placement = Placement::After(id);
                    }
                }
                Mutation::Update { id, content } => {
                    self.store.update(id, content).await?;
                    stats.updated += 1;
                    self.tick().await;
                }
                Mutation::Delete { id } => {
                    self.store.remove(id).await?;
                    stats.deleted += 1;
                    self.tick().await;
                }
            }
        }
        Ok(())
    }

    /// Insert `block` and its descendants, each level in order.
    ///
    /// A root whose identity lives in a child is first written with the
    /// identity line inlined, then rewritten once its children exist. A run
    /// that stops part way leaves a keyed entry the next run can upgrade.
    async fn create_tree(
        &mut self,
        placement: &Placement,
        block: &DesiredBlock,
        stats: &mut MutationStats,
    ) -> Result<NodeId> {
        let keyed = inline_identity(block);
        let first = keyed.as_deref().unwrap_or(&block.content);
        let root = self.store.insert(placement, first).await?;
        stats.created += 1;
        self.tick().await;

        let mut stack: Vec<(NodeId, &DesiredBlock)> = vec![(root.clone(), block)];
        while let Some((parent, node)) = stack.pop() {
            let mut previous: Option<NodeId> = None;
            for child in &node.children {
                let placement = match previous.take() {
                    Some(sibling) => Placement::After(sibling),
                    None => Placement::Append(Parent::Block(parent.clone())),
                };
                let id = self.store.insert(&placement, &child.content).await?;
                stats.created += 1;
                self.tick().await;
                if !child.children.is_empty() {
                    stack.push((id.clone(), child));
                }
                previous = Some(id);
            }
        }
        if keyed.is_some() {
            self.store.update(&root, &block.content).await?;
            self.tick().await;
        }
        Ok(root)
    }

    async fn tick(&mut self) {
        self.since_yield += 1;
        if self.since_yield >= YIELD_EVERY {
            self.since_yield = 0;
            tokio::task::yield_now().await;
        }
    }
}

/// Root content with the child identity line appended, when the root does
/// not carry the identity itself.
fn inline_identity(block: &DesiredBlock) -> Option<String> {
    if find_property(&block.content, ID_KEY).is_some() {
        return None;
    }
    let line = block
        .children
        .iter()
        .map(|c| c.content.trim())
        .find(|c| find_property(c, ID_KEY).is_some())?;
    Some(format!("{}\n{line}", block.content))
}
