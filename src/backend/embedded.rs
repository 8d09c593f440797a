//! Shard writer backed by an embedded tantivy index.

use crate::backend::{panic_message, ShardWriter};
use crate::error::{GriddleError, Result};
use crate::types::Document;
use crate::work::item::{WorkItem, WorkKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tantivy::query::TermQuery;
use tantivy::schema::{
    Field, IndexRecordOption, JsonObjectOptions, OwnedValue, Schema, TextFieldIndexing, STORED,
    STRING,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

const UID_FIELD: &str = "_uid";
const ID_FIELD: &str = "_id";
const TENANT_FIELD: &str = "_tenant";
const ROUTING_FIELD: &str = "_routing";
const BODY_FIELD: &str = "body";

/// Separates tenant and document id inside `_uid`.
const UID_SEPARATOR: char = '\u{1f}';

pub fn shard_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(UID_FIELD, STRING);
    builder.add_text_field(ID_FIELD, STRING | STORED);
    builder.add_text_field(TENANT_FIELD, STRING | STORED);
    builder.add_text_field(ROUTING_FIELD, STRING | STORED);

    let body_indexing = TextFieldIndexing::default()
        .set_tokenizer("default")
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let body_opts = JsonObjectOptions::default()
        .set_stored()
        .set_indexing_options(body_indexing);
    builder.add_json_field(BODY_FIELD, body_opts);

    builder.build()
}

#[derive(Clone, Copy)]
struct ShardFields {
    uid: Field,
    id: Field,
    tenant: Field,
    routing: Field,
    body: Field,
}

impl ShardFields {
    fn resolve(schema: &Schema) -> Result<Self> {
        Ok(ShardFields {
            uid: schema.get_field(UID_FIELD)?,
            id: schema.get_field(ID_FIELD)?,
            tenant: schema.get_field(TENANT_FIELD)?,
            routing: schema.get_field(ROUTING_FIELD)?,
            body: schema.get_field(BODY_FIELD)?,
        })
    }
}

pub struct TantivyShardWriter {
    name: String,
    index: Index,
    writer: IndexWriter,
    reader: IndexReader,
    fields: ShardFields,
    uncommitted: bool,
}

impl TantivyShardWriter {
    /// Opens the shard index at `path`, creating it if needed.
    pub fn create_in_dir<P: AsRef<Path>>(
        name: impl Into<String>,
        path: P,
        memory_bytes: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let index = if path.join("meta.json").exists() {
            Index::open_in_dir(path)?
        } else {
            Index::create_in_dir(path, shard_schema())?
        };
        Self::from_index(name, index, memory_bytes)
    }

    pub fn create_in_ram(name: impl Into<String>, memory_bytes: usize) -> Result<Self> {
        Self::from_index(name, Index::create_in_ram(shard_schema()), memory_bytes)
    }

    fn from_index(name: impl Into<String>, index: Index, memory_bytes: usize) -> Result<Self> {
        let name = name.into();
        let fields = ShardFields::resolve(&index.schema())?;
        let writer: IndexWriter = index.writer_with_num_threads(1, memory_bytes)?;

        // Merge segments once 30% of their documents are deleted; updates
        // are delete + add, so deletes pile up quickly.
        let mut merge_policy = tantivy::merge_policy::LogMergePolicy::default();
        merge_policy.set_del_docs_ratio_before_merge(0.3);
        writer.set_merge_policy(Box::new(merge_policy));

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        tracing::info!("[Q {}] embedded shard writer opened", name);
        Ok(TantivyShardWriter {
            name,
            index,
            writer,
            reader,
            fields,
            uncommitted: false,
        })
    }

    /// The underlying index, for opening independent readers.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Documents visible as of the last refresh.
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn uid_term(&self, tenant_id: Option<&str>, document_id: &str) -> Term {
        Term::from_field_text(self.fields.uid, &uid(tenant_id, document_id))
    }

    fn to_tantivy(&self, item: &WorkItem, document: &Document) -> Result<TantivyDocument> {
        let document_id = item.document_id().unwrap_or(&document.id);
        let mut doc = TantivyDocument::new();
        doc.add_text(self.fields.uid, uid(item.tenant_id(), document_id));
        doc.add_text(self.fields.id, document_id);
        if let Some(tenant) = item.tenant_id() {
            doc.add_text(self.fields.tenant, tenant);
        }
        if let Some(routing) = item.routing_key() {
            doc.add_text(self.fields.routing, routing);
        }
        doc.add_object(self.fields.body, json_object(document.source_json())?);
        Ok(doc)
    }

    fn document_of<'a>(&self, item: &'a WorkItem) -> Result<&'a Document> {
        item.document()
            .ok_or_else(|| GriddleError::WriteRejected(format!("{} carries no document", item)))
    }

    fn delete_document(&mut self, item: &WorkItem) -> Result<()> {
        let document_id = item
            .document_id()
            .ok_or_else(|| GriddleError::WriteRejected(format!("{} has no document id", item)))?;
        let term = self.uid_term(item.tenant_id(), document_id);
        self.writer.delete_term(term);
        Ok(())
    }

    fn purge(&mut self, tenant_id: Option<&str>) -> Result<()> {
        match tenant_id {
            Some(tenant) => {
                let term = Term::from_field_text(self.fields.tenant, tenant);
                let query = TermQuery::new(term, IndexRecordOption::Basic);
                self.writer.delete_query(Box::new(query))?;
            }
            None => {
                self.writer.delete_all_documents()?;
            }
        }
        Ok(())
    }

    fn merge_segments(&mut self) -> Result<()> {
        if self.uncommitted {
            self.commit_writer()?;
        }
        let segment_ids = self.index.searchable_segment_ids()?;
        tracing::info!("[Q {}] merging {} segments", self.name, segment_ids.len());
        if segment_ids.len() > 1 {
            // None means every document of the merged segments was deleted.
            self.writer
                .merge(&segment_ids)
                .wait()
                .map_err(|e| GriddleError::Tantivy(e.to_string()))?;
        }
        let gc = self
            .writer
            .garbage_collect_files()
            .wait()
            .map_err(|e| GriddleError::Tantivy(e.to_string()))?;
        tracing::info!(
            "[Q {}] merge done, gc removed {} files",
            self.name,
            gc.deleted_files.len()
        );
        Ok(())
    }

    fn commit_writer(&mut self) -> Result<()> {
        let writer = &mut self.writer;
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| writer.commit())) {
            Ok(Ok(_opstamp)) => {
                self.uncommitted = false;
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("[Q {}] commit error: {}", self.name, e);
                Err(GriddleError::Commit(e.to_string()))
            }
            Err(panic_info) => {
                let msg = panic_message(panic_info.as_ref());
                tracing::error!("[Q {}] PANIC during commit: {}", self.name, msg);
                Err(GriddleError::Commit(msg))
            }
        }
    }
}

#[async_trait]
impl ShardWriter for TantivyShardWriter {
    async fn execute(&mut self, item: &WorkItem) -> Result<()> {
        match item.kind() {
            WorkKind::Add => {
                let doc = self.to_tantivy(item, self.document_of(item)?)?;
                self.writer.add_document(doc)?;
            }
            WorkKind::Update => {
                let doc = self.to_tantivy(item, self.document_of(item)?)?;
                self.delete_document(item)?;
                self.writer.add_document(doc)?;
            }
            WorkKind::Delete => self.delete_document(item)?,
            WorkKind::PurgeAll => self.purge(item.tenant_id())?,
            WorkKind::Optimize => return self.merge_segments(),
            WorkKind::Flush => return self.commit_writer(),
        }
        self.uncommitted = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.commit_writer()
    }

    /// Tantivy only exposes committed segments, so pending writes are
    /// committed before the reader reloads.
    async fn refresh(&mut self) -> Result<()> {
        if self.uncommitted {
            self.commit_writer()?;
        }
        self.reader
            .reload()
            .map_err(|e| GriddleError::Refresh(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if self.uncommitted {
            self.commit_writer()?;
        }
        tracing::info!("[Q {}] embedded shard writer closed", self.name);
        Ok(())
    }
}

fn uid(tenant_id: Option<&str>, document_id: &str) -> String {
    match tenant_id {
        Some(tenant) => format!("{}{}{}", tenant, UID_SEPARATOR, document_id),
        None => document_id.to_string(),
    }
}

fn json_object(value: serde_json::Value) -> Result<BTreeMap<String, OwnedValue>> {
    match value {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, OwnedValue::from(v)))
            .collect()),
        _ => Err(GriddleError::WriteRejected(
            "document body must be a JSON object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKey;
    use tempfile::TempDir;

    const MEMORY: usize = 20_000_000;

    fn book(id: &str, title: &str) -> WorkItem {
        let mut doc = Document::new(id);
        doc.add_field("title", title);
        WorkItem::add("books", None, EntityKey::new("Book", id), None, doc)
    }

    #[tokio::test]
    async fn test_add_commit_refresh() {
        let mut writer = TantivyShardWriter::create_in_ram("books#0", MEMORY).unwrap();
        writer.execute(&book("1", "Dune")).await.unwrap();
        writer.execute(&book("2", "Emma")).await.unwrap();
        assert_eq!(writer.num_docs(), 0, "nothing visible before refresh");

        writer.refresh().await.unwrap();
        assert_eq!(writer.num_docs(), 2);
    }

    #[tokio::test]
    async fn test_update_replaces_document() {
        let mut writer = TantivyShardWriter::create_in_ram("books#0", MEMORY).unwrap();
        writer.execute(&book("1", "Dune")).await.unwrap();
        writer.commit().await.unwrap();

        let mut doc = Document::new("1");
        doc.add_field("title", "Dune Messiah");
        let update = WorkItem::update(
            "books",
            None,
            EntityKey::new("Book", "1"),
            None,
            doc,
            crate::work::item::DirtyPaths::All,
        );
        writer.execute(&update).await.unwrap();
        writer.refresh().await.unwrap();
        assert_eq!(writer.num_docs(), 1);
    }

    #[tokio::test]
    async fn test_tenant_scoped_purge() {
        let mut writer = TantivyShardWriter::create_in_ram("books#0", MEMORY).unwrap();
        for (tenant, id) in [("acme", "1"), ("acme", "2"), ("globex", "1")] {
            let mut doc = Document::new(id);
            doc.add_field("title", "x");
            let item = WorkItem::add(
                "books",
                Some(tenant.to_string()),
                EntityKey::new("Book", id),
                None,
                doc,
            );
            writer.execute(&item).await.unwrap();
        }
        writer.refresh().await.unwrap();
        assert_eq!(writer.num_docs(), 3);

        writer
            .execute(&WorkItem::purge_all("books", Some("acme".to_string())))
            .await
            .unwrap();
        writer.refresh().await.unwrap();
        assert_eq!(writer.num_docs(), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_committed_documents() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = TantivyShardWriter::create_in_dir("books#0", dir.path(), MEMORY).unwrap();
            writer.execute(&book("1", "Dune")).await.unwrap();
            writer.close().await.unwrap();
        }
        let writer = TantivyShardWriter::create_in_dir("books#0", dir.path(), MEMORY).unwrap();
        assert_eq!(writer.num_docs(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_merge_on_empty_shard() {
        let mut writer = TantivyShardWriter::create_in_ram("books#0", MEMORY).unwrap();
        let delete = WorkItem::delete("books", None, EntityKey::new("Book", "1"), None);
        writer.execute(&delete).await.unwrap();

        let optimize = WorkItem::optimize("books");
        writer.execute(&optimize).await.unwrap();
    }
}
