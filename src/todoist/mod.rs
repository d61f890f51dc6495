pub mod types;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use types::{CompletedPage, Listing, RawComment, RawLabel, RawProject, RawTask};

pub const DEFAULT_BASE_URL: &str = "https://api.todoist.com/";
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Longest response body quoted back in an `Error::Api` message.
const MAX_ERROR_BODY: usize = 300;

/// Read-only view of the remote task system.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn active_tasks(&self) -> Result<Vec<RawTask>>;
    async fn completed_tasks(&self, since: Option<NaiveDate>) -> Result<Vec<RawTask>>;
    async fn projects(&self) -> Result<Vec<RawProject>>;
    async fn labels(&self) -> Result<Vec<RawLabel>>;
    async fn comments(&self, task_id: &str) -> Result<Vec<RawComment>>;
}

/// HTTP client for the Todoist API.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: url::Url,
    token: Option<String>,
    page_size: u32,
}

impl Client {
    /// A client for the public API. A missing or blank token means requests
    /// go out without an `Authorization` header at all.
    pub fn new(token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("todoseq/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: url::Url::parse(DEFAULT_BASE_URL)?,
            token: token.filter(|t| !t.trim().is_empty()),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_base_url(mut self, base: &str) -> Result<Self> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        self.base_url = url::Url::parse(&base)?;
        Ok(self)
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.base_url.join(path)?;
        let mut request = self.http.get(url).query(query);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| message.is_char_boundary(i))
                    .unwrap_or(0);
                message.truncate(cut);
            }
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }

    /// Follow `next_cursor` until the server stops returning one.
    pub async fn get_all_cursor<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = query.to_vec();
            params.push(("limit", self.page_size.to_string()));
            if let Some(ref c) = cursor {
                params.push(("cursor", c.clone()));
            }
            match self.get_json::<Listing<T>>(path, &params).await? {
                Listing::Bare(items) => {
                    all.extend(items);
                    break;
                }
                Listing::Paged {
                    results,
                    next_cursor,
                } => {
                    all.extend(results);
                    let next = next_cursor.filter(|c| !c.is_empty());
                    if next.is_none() || next == cursor {
                        break;
                    }
                    cursor = next;
                }
            }
        }
        log::debug!("Fetched {} records from {path}", all.len());
        Ok(all)
    }

    /// Advance by `page_size` until a short page comes back.
    pub async fn get_all_offset(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<RawTask>> {
        let mut all = Vec::new();
        let mut offset: u32 = 0;
        loop {
            let mut params: Vec<(&str, String)> = query.to_vec();
            params.push(("limit", self.page_size.to_string()));
            params.push(("offset", offset.to_string()));
            let page: CompletedPage = self.get_json(path, &params).await?;
            let count = page.items.len();
            all.extend(page.items);
            if count < self.page_size as usize {
                break;
            }
            offset += self.page_size;
        }
        log::debug!("Fetched {} records from {path}", all.len());
        Ok(all)
    }
}

#[async_trait]
impl TaskSource for Client {
    async fn active_tasks(&self) -> Result<Vec<RawTask>> {
        self.get_all_cursor("api/v1/tasks", &[]).await
    }

    async fn completed_tasks(&self, since: Option<NaiveDate>) -> Result<Vec<RawTask>> {
        let mut query = vec![("annotate_items", "true".to_string())];
        if let Some(since) = since {
            query.push(("since", format!("{}T00:00:00", since.format("%Y-%m-%d"))));
        }
        self.get_all_offset("sync/v9/completed/get_all", &query).await
    }

    async fn projects(&self) -> Result<Vec<RawProject>> {
        self.get_all_cursor("api/v1/projects", &[]).await
    }

    async fn labels(&self) -> Result<Vec<RawLabel>> {
        self.get_all_cursor("api/v1/labels", &[]).await
    }

    async fn comments(&self, task_id: &str) -> Result<Vec<RawComment>> {
        self.get_all_cursor("api/v1/comments", &[("task_id", task_id.to_string())])
            .await
    }
}
