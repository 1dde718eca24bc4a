//! In-memory `Store`, grounded in the teacher's
//! `crates/context-harness-core/src/store/memory.rs`. Used by unit/property
//! tests (dedup idempotence, content-hash collapse, update-in-place) without
//! standing up SQLite.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::model::{Chunk, Document};

use super::{ChunkCandidate, DocumentMetadata, DocumentResponse, Store, UpsertOutcome};

#[derive(Default)]
struct Inner {
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Vec<Chunk>>,
    /// (search_space_id, unique_identifier_hash) -> document id
    by_uid: HashMap<(i64, String), String>,
    /// (search_space_id, content_hash) -> document id
    by_content: HashMap<(i64, String), String>,
    /// (connector_id, source_id) -> document id
    by_source: HashMap<(i64, String), String>,
}

/// A `Store` backed by `HashMap`s behind a single mutex. No FTS/ANN index;
/// `keyword_search` does a naive substring scan and `vector_search` scores
/// every chunk with an embedding. Fine for tests, not for production scale.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_document(
        &self,
        mut document: Document,
        chunks: Vec<Chunk>,
    ) -> anyhow::Result<UpsertOutcome> {
        let mut inner = self.inner.lock().unwrap();

        let uid_key = (document.search_space_id, document.unique_identifier_hash.clone());
        if let Some(existing_id) = inner.by_uid.get(&uid_key).cloned() {
            let existing = inner.documents.get(&existing_id).unwrap();
            if existing.content_hash == document.content_hash {
                return Ok(UpsertOutcome::SkippedUnchanged);
            }
            // Update in place: keep the existing id, replace content/metadata.
            let content_key = (document.search_space_id, document.content_hash.clone());
            document.id = existing_id.clone();
            inner.by_content.remove(&(document.search_space_id, existing.content_hash.clone()));
            inner.by_content.insert(content_key, existing_id.clone());
            inner
                .by_source
                .insert((document.connector_id, document.source_id.clone()), existing_id.clone());
            inner.chunks.insert(existing_id.clone(), chunks);
            inner.documents.insert(existing_id, document);
            return Ok(UpsertOutcome::Updated);
        }

        let content_key = (document.search_space_id, document.content_hash.clone());
        if inner.by_content.contains_key(&content_key) {
            return Ok(UpsertOutcome::SkippedDuplicateContent);
        }

        let id = document.id.clone();
        inner.by_uid.insert(uid_key, id.clone());
        inner.by_content.insert(content_key, id.clone());
        inner
            .by_source
            .insert((document.connector_id, document.source_id.clone()), id.clone());
        inner.chunks.insert(id.clone(), chunks);
        inner.documents.insert(id, document);
        Ok(UpsertOutcome::Inserted)
    }

    async fn find_by_unique_identifier_hash(
        &self,
        search_space_id: i64,
        unique_identifier_hash: &str,
    ) -> anyhow::Result<Option<Document>> {
        let inner = self.inner.lock().unwrap();
        let key = (search_space_id, unique_identifier_hash.to_string());
        Ok(inner.by_uid.get(&key).and_then(|id| inner.documents.get(id)).cloned())
    }

    async fn find_by_content_hash(
        &self,
        search_space_id: i64,
        content_hash: &str,
    ) -> anyhow::Result<Option<Document>> {
        let inner = self.inner.lock().unwrap();
        let key = (search_space_id, content_hash.to_string());
        Ok(inner.by_content.get(&key).and_then(|id| inner.documents.get(id)).cloned())
    }

    async fn find_by_connector_and_source_id(
        &self,
        connector_id: i64,
        source_id: &str,
    ) -> anyhow::Result<Option<Document>> {
        let inner = self.inner.lock().unwrap();
        let key = (connector_id, source_id.to_string());
        Ok(inner.by_source.get(&key).and_then(|id| inner.documents.get(id)).cloned())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: Vec<Chunk>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.chunks.insert(document_id.to_string(), chunks);
        Ok(())
    }

    async fn upsert_embedding(&self, chunk_id: &str, embedding: Vec<f32>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for chunks in inner.chunks.values_mut() {
            if let Some(c) = chunks.iter_mut().find(|c| c.id == chunk_id) {
                c.embedding = Some(embedding);
                return Ok(());
            }
        }
        anyhow::bail!("chunk {chunk_id} not found")
    }

    async fn get_document(&self, document_id: &str) -> anyhow::Result<Option<DocumentResponse>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.documents.get(document_id).map(|d| DocumentResponse {
            document: d.clone(),
            chunks: inner.chunks.get(document_id).cloned().unwrap_or_default(),
        }))
    }

    async fn get_document_metadata(
        &self,
        document_id: &str,
    ) -> anyhow::Result<Option<DocumentMetadata>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.documents.get(document_id).map(|d| DocumentMetadata {
            id: d.id.clone(),
            connector_type: d.connector_type.as_str().to_string(),
            source_id: d.source_id.clone(),
            title: d.title.clone(),
            metadata: d.metadata.clone(),
        }))
    }

    async fn keyword_search(
        &self,
        search_space_id: i64,
        query: &str,
        connector_ids: Option<&[i64]>,
        limit: usize,
    ) -> anyhow::Result<Vec<ChunkCandidate>> {
        let inner = self.inner.lock().unwrap();
        let needle = query.to_lowercase();
        let mut out = Vec::new();

        for doc in inner.documents.values() {
            if doc.search_space_id != search_space_id {
                continue;
            }
            if let Some(ids) = connector_ids {
                if !ids.contains(&doc.connector_id) {
                    continue;
                }
            }
            for chunk in inner.chunks.get(&doc.id).into_iter().flatten() {
                let haystack = chunk.content.to_lowercase();
                let occurrences = haystack.matches(&needle).count();
                if occurrences > 0 {
                    out.push(ChunkCandidate {
                        chunk: chunk.clone(),
                        score: occurrences as f32,
                    });
                }
            }
        }

        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        out.truncate(limit);
        Ok(out)
    }

    async fn vector_search(
        &self,
        search_space_id: i64,
        query_embedding: &[f32],
        connector_ids: Option<&[i64]>,
        limit: usize,
    ) -> anyhow::Result<Vec<ChunkCandidate>> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();

        for doc in inner.documents.values() {
            if doc.search_space_id != search_space_id {
                continue;
            }
            if let Some(ids) = connector_ids {
                if !ids.contains(&doc.connector_id) {
                    continue;
                }
            }
            for chunk in inner.chunks.get(&doc.id).into_iter().flatten() {
                if let Some(embedding) = &chunk.embedding {
                    let score = cosine_similarity(query_embedding, embedding);
                    out.push(ChunkCandidate { chunk: chunk.clone(), score });
                }
            }
        }

        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{content_hash, unique_identifier_hash};
    use crate::model::ConnectorType;
    use chrono::Utc;
    use uuid::Uuid;

    fn doc(search_space_id: i64, connector_id: i64, source_id: &str, content: &str) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4().to_string(),
            search_space_id,
            connector_type: ConnectorType::Filesystem,
            connector_id,
            source_id: source_id.to_string(),
            title: Some(source_id.to_string()),
            content: content.to_string(),
            content_hash: content_hash(search_space_id, content),
            unique_identifier_hash: unique_identifier_hash(
                "filesystem",
                source_id,
                search_space_id,
            ),
            metadata: serde_json::json!({}),
            summary_embedding: None,
            created_at: now,
            updated_at: now,
            owning_user: None,
        }
    }

    #[tokio::test]
    async fn reindexing_identical_item_is_idempotent() {
        let store = MemoryStore::new();
        let d = doc(1, 1, "a.txt", "hello world");
        let first = store.upsert_document(d.clone(), vec![]).await.unwrap();
        let second = store.upsert_document(d, vec![]).await.unwrap();
        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::SkippedUnchanged);
    }

    #[tokio::test]
    async fn changed_content_updates_in_place() {
        let store = MemoryStore::new();
        let d1 = doc(1, 1, "a.txt", "version one");
        let outcome1 = store.upsert_document(d1.clone(), vec![]).await.unwrap();
        assert_eq!(outcome1, UpsertOutcome::Inserted);

        let mut d2 = doc(1, 1, "a.txt", "version two");
        d2.id = "ignored-because-uid-matches".to_string();
        let outcome2 = store.upsert_document(d2, vec![]).await.unwrap();
        assert_eq!(outcome2, UpsertOutcome::Updated);

        let found = store
            .find_by_unique_identifier_hash(1, &d1.unique_identifier_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, d1.id);
        assert_eq!(found.content, "version two");
    }

    #[tokio::test]
    async fn identical_content_from_different_source_collapses() {
        let store = MemoryStore::new();
        let d1 = doc(1, 1, "a.txt", "same body");
        let d2 = doc(1, 1, "b.txt", "same body");
        let outcome1 = store.upsert_document(d1, vec![]).await.unwrap();
        let outcome2 = store.upsert_document(d2, vec![]).await.unwrap();
        assert_eq!(outcome1, UpsertOutcome::Inserted);
        assert_eq!(outcome2, UpsertOutcome::SkippedDuplicateContent);
    }

    #[tokio::test]
    async fn same_content_in_different_search_spaces_both_insert() {
        let store = MemoryStore::new();
        let d1 = doc(1, 1, "a.txt", "shared body");
        let d2 = doc(2, 1, "a.txt", "shared body");
        let outcome1 = store.upsert_document(d1, vec![]).await.unwrap();
        let outcome2 = store.upsert_document(d2, vec![]).await.unwrap();
        assert_eq!(outcome1, UpsertOutcome::Inserted);
        assert_eq!(outcome2, UpsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn keyword_search_finds_matching_chunk() {
        let store = MemoryStore::new();
        let d = doc(1, 1, "a.txt", "the quick brown fox");
        store
            .upsert_document(
                d.clone(),
                vec![Chunk {
                    id: "c1".into(),
                    document_id: d.id.clone(),
                    chunk_index: 0,
                    content: "the quick brown fox".into(),
                    content_hash: "x".into(),
                    embedding: None,
                }],
            )
            .await
            .unwrap();

        let results = store.keyword_search(1, "quick", None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
