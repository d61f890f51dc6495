//! The destination side: a Logseq-style graph of pages holding block trees.
//!
//! The reconciler only talks to [`BlockStore`]. Each primitive is assumed
//! atomic on its own; nothing is batched or transactional across calls.

pub mod logseq;
pub mod memory;
pub mod throttle;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use logseq::LogseqGraph;
pub use memory::MemoryGraph;
pub use throttle::Throttled;

/// Block identity assigned by the graph (a UUID for Logseq).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A block as it currently exists in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: NodeId,
    pub content: String,
    pub children: Vec<Block>,
}

/// A block tree to be written; ids are assigned by the graph on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredBlock {
    pub content: String,
    pub children: Vec<DesiredBlock>,
}

impl DesiredBlock {
    pub fn leaf(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(content: impl Into<String>, children: Vec<DesiredBlock>) -> Self {
        Self {
            content: content.into(),
            children,
        }
    }

    /// Number of blocks in this subtree, itself included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(DesiredBlock::size).sum::<usize>()
    }
}

/// A destination page. `name` keeps the display casing; page lookups are
/// case-insensitive as in Logseq.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    Page(String),
    Block(NodeId),
}

/// Where a new block goes relative to existing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Append(Parent),
    Prepend(Parent),
    After(NodeId),
}

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Get the page by name, creating it when absent.
    async fn ensure_page(&self, name: &str) -> Result<PageRef>;

    async fn list_pages(&self) -> Result<Vec<PageRef>>;

    /// Full block tree of a page; an unknown page has no blocks.
    async fn page_tree(&self, page: &str) -> Result<Vec<Block>>;

    async fn insert(&self, placement: &Placement, content: &str) -> Result<NodeId>;

    async fn update(&self, id: &NodeId, content: &str) -> Result<()>;

    async fn remove(&self, id: &NodeId) -> Result<()>;
}

#[async_trait]
impl<S: BlockStore + ?Sized> BlockStore for std::sync::Arc<S> {
    async fn ensure_page(&self, name: &str) -> Result<PageRef> {
        (**self).ensure_page(name).await
    }

    async fn list_pages(&self) -> Result<Vec<PageRef>> {
        (**self).list_pages().await
    }

    async fn page_tree(&self, page: &str) -> Result<Vec<Block>> {
        (**self).page_tree(page).await
    }

    async fn insert(&self, placement: &Placement, content: &str) -> Result<NodeId> {
        (**self).insert(placement, content).await
    }

    async fn update(&self, id: &NodeId, content: &str) -> Result<()> {
        (**self).update(id, content).await
    }

    async fn remove(&self, id: &NodeId) -> Result<()> {
        (**self).remove(id).await
    }
}

/// Page names compare case-insensitively.
pub fn page_key(name: &str) -> String {
    name.trim().to_lowercase()
}
