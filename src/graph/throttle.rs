use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Block, BlockStore, NodeId, PageRef, Placement};
use crate::error::Result;

pub const DEFAULT_MUTATION_DELAY: Duration = Duration::from_millis(150);

/// Serialises mutations against the wrapped store and holds each one for a
/// minimum delay afterwards, keeping the write rate under the graph's quota.
/// Reads pass straight through.
pub struct Throttled<S> {
    inner: S,
    delay: Duration,
    gate: Mutex<()>,
}

impl<S: BlockStore> Throttled<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            gate: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl<S: BlockStore> BlockStore for Throttled<S> {
    async fn ensure_page(&self, name: &str) -> Result<PageRef> {
        let _gate = self.gate.lock().await;
        let page = self.inner.ensure_page(name).await?;
        self.pause().await;
        Ok(page)
    }

    async fn list_pages(&self) -> Result<Vec<PageRef>> {
        self.inner.list_pages().await
    }

    async fn page_tree(&self, page: &str) -> Result<Vec<Block>> {
        self.inner.page_tree(page).await
    }

    async fn insert(&self, placement: &Placement, content: &str) -> Result<NodeId> {
        let _gate = self.gate.lock().await;
        let id = self.inner.insert(placement, content).await?;
        self.pause().await;
        Ok(id)
    }

    async fn update(&self, id: &NodeId, content: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.inner.update(id, content).await?;
        self.pause().await;
        Ok(())
    }

    async fn remove(&self, id: &NodeId) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.inner.remove(id).await?;
        self.pause().await;
        Ok(())
    }
}
