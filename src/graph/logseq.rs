//! [`BlockStore`] over the Logseq desktop app's HTTP API server.
//!
//! Every call is `POST {base}/api` with `{"method": "logseq.Editor.*",
//! "args": [...]}`; the token is sent as a bearer header when configured.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{page_key, Block, BlockStore, NodeId, PageRef, Parent, Placement};
use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:12315";

/// Block properties Logseq writes into content on its own.
const MANAGED_PROPERTIES: &[&str] = &["id::", "collapsed::"];

#[derive(Debug, Deserialize)]
struct LsPage {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "originalName")]
    original_name: Option<String>,
}

impl LsPage {
    fn into_ref(self) -> Option<PageRef> {
        self.original_name
            .or(self.name)
            .map(|name| PageRef { name })
    }
}

#[derive(Debug, Deserialize)]
struct LsBlock {
    uuid: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    children: Vec<LsChild>,
}

/// Children arrive either expanded or as `["uuid", "<id>"]` references.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LsChild {
    Block(LsBlock),
    Ref(Vec<Value>),
}

#[derive(Clone)]
pub struct LogseqGraph {
    http: reqwest::Client,
    endpoint: url::Url,
    token: Option<String>,
}

impl LogseqGraph {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base = url::Url::parse(base_url)?;
        let endpoint = base.join("/api")?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, args: Value) -> Result<T> {
        let body = json!({ "method": method, "args": args });
        let mut request = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Graph(format!("{method} failed ({status}): {text}")));
        }
        let value: Value = response.json().await?;
        if let Some(err) = value.get("error").and_then(Value::as_str) {
            return Err(Error::Graph(format!("{method}: {err}")));
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn block_with_children(&self, uuid: &str) -> Result<Option<LsBlock>> {
        self.call(
            "logseq.Editor.getBlock",
            json!([uuid, { "includeChildren": true }]),
        )
        .await
    }

    fn convert<'a>(
        &'a self,
        raw: LsBlock,
    ) -> Pin<Box<dyn Future<Output = Result<Block>> + Send + 'a>> {
        Box::pin(async move {
            let mut children = Vec::with_capacity(raw.children.len());
            for child in raw.children {
                let expanded = match child {
                    LsChild::Block(b) => Some(b),
                    LsChild::Ref(parts) => match parts.get(1).and_then(Value::as_str) {
                        Some(uuid) => self.block_with_children(uuid).await?,
                        None => None,
                    },
                };
                if let Some(b) = expanded {
                    children.push(self.convert(b).await?);
                }
            }
            Ok(Block {
                id: NodeId(raw.uuid),
                content: strip_managed_properties(&raw.content),
                children,
            })
        })
    }

    /// Uuids of a block's direct children, in order.
    async fn child_ids(&self, parent: &NodeId) -> Result<Vec<String>> {
        let block = self
            .block_with_children(&parent.0)
            .await?
            .ok_or_else(|| Error::Graph(format!("block not found: {parent}")))?;
        Ok(block
            .children
            .into_iter()
            .filter_map(|c| match c {
                LsChild::Block(b) => Some(b.uuid),
                LsChild::Ref(parts) => parts.get(1).and_then(Value::as_str).map(String::from),
            })
            .collect())
    }

    async fn insert_block(&self, src: &str, content: &str, opts: Value) -> Result<NodeId> {
        let created: Option<LsBlock> = self
            .call("logseq.Editor.insertBlock", json!([src, content, opts]))
            .await?;
        created
            .map(|b| NodeId(b.uuid))
            .ok_or_else(|| Error::Graph(format!("insertBlock returned nothing for {src}")))
    }
}

/// Drop the property lines Logseq manages itself so content compares
/// equal to what was written.
fn strip_managed_properties(content: &str) -> String {
    content
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !MANAGED_PROPERTIES.iter().any(|p| t.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl BlockStore for LogseqGraph {
    async fn ensure_page(&self, name: &str) -> Result<PageRef> {
        let existing: Option<LsPage> = self.call("logseq.Editor.getPage", json!([name])).await?;
        if let Some(page) = existing.and_then(LsPage::into_ref) {
            return Ok(page);
        }
        log::info!("Creating page {name}");
        let created: Option<LsPage> = self
            .call(
                "logseq.Editor.createPage",
                json!([name, {}, { "redirect": false, "createFirstBlock": false }]),
            )
            .await?;
        created
            .and_then(LsPage::into_ref)
            .ok_or_else(|| Error::Graph(format!("createPage returned nothing for {name}")))
    }

    async fn list_pages(&self) -> Result<Vec<PageRef>> {
        let pages: Option<Vec<LsPage>> = self.call("logseq.Editor.getAllPages", json!([])).await?;
        Ok(pages
            .unwrap_or_default()
            .into_iter()
            .filter_map(LsPage::into_ref)
            .collect())
    }

    async fn page_tree(&self, page: &str) -> Result<Vec<Block>> {
        let raw: Option<Vec<LsBlock>> = self
            .call("logseq.Editor.getPageBlocksTree", json!([page_key(page)]))
            .await?;
        let mut blocks = Vec::new();
        for b in raw.unwrap_or_default() {
            blocks.push(self.convert(b).await?);
        }
        Ok(blocks)
    }

    async fn insert(&self, placement: &Placement, content: &str) -> Result<NodeId> {
        match placement {
            Placement::Append(Parent::Page(name)) => {
                let created: Option<LsBlock> = self
                    .call("logseq.Editor.appendBlockInPage", json!([name, content]))
                    .await?;
                created
                    .map(|b| NodeId(b.uuid))
                    .ok_or_else(|| Error::Graph(format!("appendBlockInPage failed for {name}")))
            }
            Placement::Prepend(Parent::Page(name)) => {
                let created: Option<LsBlock> = self
                    .call("logseq.Editor.prependBlockInPage", json!([name, content]))
                    .await?;
                created
                    .map(|b| NodeId(b.uuid))
                    .ok_or_else(|| Error::Graph(format!("prependBlockInPage failed for {name}")))
            }
            // Child inserts are expressed through siblings so the position
            // never depends on insertBlock's child-placement default.
            Placement::Append(Parent::Block(parent)) => match self.child_ids(parent).await?.last() {
                Some(last) => self.insert_block(last, content, json!({ "sibling": true })).await,
                None => self.insert_block(&parent.0, content, json!({ "sibling": false })).await,
            },
            Placement::Prepend(Parent::Block(parent)) => {
                match self.child_ids(parent).await?.first() {
                    Some(first) => {
                        let options = json!({ "sibling": true, "before": true });
                        self.insert_block(first, content, options).await
                    }
                    None => {
                        self.insert_block(&parent.0, content, json!({ "sibling": false }))
                            .await
                    }
                }
            }
            Placement::After(sibling) => {
                self.insert_block(&sibling.0, content, json!({ "sibling": true }))
                    .await
            }
        }
    }

    async fn update(&self, id: &NodeId, content: &str) -> Result<()> {
        let _: Value = self
            .call("logseq.Editor.updateBlock", json!([id.0, content]))
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &NodeId) -> Result<()> {
        let _: Value = self.call("logseq.Editor.removeBlock", json!([id.0])).await?;
        Ok(())
    }
}
