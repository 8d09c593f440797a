//! Shard writer for a remote document store speaking the Elasticsearch
//! REST dialect.
//!
//! Sharding happens inside the store; every queue of an index writes to the
//! same remote index and forwards the routing key. Index-wide work is
//! therefore sent through the first queue only. Durability is the store's
//! business (translog), so `commit` does nothing.

use crate::backend::ShardWriter;
use crate::error::{GriddleError, Result};
use crate::work::item::{WorkItem, WorkKind};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde_json::json;

pub struct RemoteShardWriter {
    name: String,
    client: Client,
    base_url: Url,
    index: String,
}

impl RemoteShardWriter {
    pub fn new(
        name: impl Into<String>,
        client: Client,
        base_url: &str,
        index: impl Into<String>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GriddleError::Config(format!("invalid store URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GriddleError::Config(format!(
                "store URL cannot be a base: {}",
                base_url
            )));
        }
        Ok(RemoteShardWriter {
            name: name.into(),
            client,
            base_url,
            index: index.into(),
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GriddleError::Config(format!("invalid store URL {}", self.base_url)))?
            .pop_if_empty()
            .push(&self.index)
            .extend(segments);
        Ok(url)
    }

    fn document_url(&self, item: &WorkItem) -> Result<Url> {
        let document_id = item
            .document_id()
            .ok_or_else(|| GriddleError::WriteRejected(format!("{} has no document id", item)))?;
        let remote_id = match item.tenant_id() {
            Some(tenant) => format!("{}_{}", tenant, document_id),
            None => document_id.to_string(),
        };
        let mut url = self.endpoint(&["_doc", &remote_id])?;
        if let Some(routing) = item.routing_key() {
            url.query_pairs_mut().append_pair("routing", routing);
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, tolerate_not_found: bool) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() || (tolerate_not_found && status == StatusCode::NOT_FOUND) {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        tracing::warn!("[Q {}] store returned {}: {}", self.name, status, message);
        Err(GriddleError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn index_document(&self, item: &WorkItem) -> Result<()> {
        let document = item
            .document()
            .ok_or_else(|| GriddleError::WriteRejected(format!("{} carries no document", item)))?;
        let mut source = document.source_json();
        if let (Some(tenant), serde_json::Value::Object(map)) = (item.tenant_id(), &mut source) {
            map.insert("_tenant".to_string(), json!(tenant));
        }
        let url = self.document_url(item)?;
        self.send(self.client.put(url).json(&source), false).await
    }

    async fn purge(&self, tenant_id: Option<&str>) -> Result<()> {
        let query = match tenant_id {
            Some(tenant) => json!({ "query": { "term": { "_tenant": tenant } } }),
            None => json!({ "query": { "match_all": {} } }),
        };
        let mut url = self.endpoint(&["_delete_by_query"])?;
        url.query_pairs_mut().append_pair("conflicts", "proceed");
        self.send(self.client.post(url).json(&query), false).await
    }
}

#[async_trait]
impl ShardWriter for RemoteShardWriter {
    async fn execute(&mut self, item: &WorkItem) -> Result<()> {
        match item.kind() {
            WorkKind::Add | WorkKind::Update => self.index_document(item).await,
            WorkKind::Delete => {
                let url = self.document_url(item)?;
                self.send(self.client.delete(url), true).await
            }
            WorkKind::PurgeAll => self.purge(item.tenant_id()).await,
            WorkKind::Optimize => {
                let mut url = self.endpoint(&["_forcemerge"])?;
                url.query_pairs_mut().append_pair("max_num_segments", "1");
                self.send(self.client.post(url), false).await
            }
            WorkKind::Flush => {
                let url = self.endpoint(&["_flush"])?;
                self.send(self.client.post(url), false).await
            }
        }
    }

    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        let url = self.endpoint(&["_refresh"])?;
        self.send(self.client.post(url), false)
            .await
            .map_err(|e| GriddleError::Refresh(e.to_string()))
    }
}
