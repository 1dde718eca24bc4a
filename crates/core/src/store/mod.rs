//! The storage abstraction (spec.md §4.1 C1), grounded in the teacher's
//! `crates/context-harness-core/src/store/mod.rs` `Store` trait — extended
//! from the teacher's single-outcome `upsert_document` to the four-way
//! outcome spec.md requires, and with the dual-hash lookups C1/C4 depend on.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Chunk, Document};

/// What happened to a single incoming item during upsert (spec.md §4.1,
/// §4.4 step 4). The indexer's per-run counters are a tally of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No existing document shared either hash; a new row was created.
    Inserted,
    /// `unique_identifier_hash` matched an existing document whose
    /// `content_hash` differed; the row was updated in place.
    Updated,
    /// `unique_identifier_hash` matched and `content_hash` was unchanged;
    /// no write was made.
    SkippedUnchanged,
    /// No `unique_identifier_hash` match, but `content_hash` collided with
    /// a document from a different source item; the incoming item was
    /// dropped rather than creating a duplicate.
    SkippedDuplicateContent,
}

/// A candidate chunk returned by a keyword or vector search pass, carrying
/// the raw per-backend score so the caller can normalize/fuse it.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk: Chunk,
    pub score: f32,
}

/// Document projection returned to callers that need the full row
/// (chat citations, `GET /documents/:id`-style retrieval).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

/// Lightweight projection for listing/metadata endpoints that should not
/// pay for full content + embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub connector_type: String,
    pub source_id: String,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
}

/// Persistence boundary for documents, chunks, and search. Implementations:
/// `memory::MemoryStore` (tests), `kbase_engine::store::SqliteStore` (runtime).
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert-or-update a document and replace its chunks atomically,
    /// returning which of the four outcomes occurred (spec.md §4.1/§4.4).
    async fn upsert_document(
        &self,
        document: Document,
        chunks: Vec<Chunk>,
    ) -> anyhow::Result<UpsertOutcome>;

    /// Look up a document by its update-detection key.
    async fn find_by_unique_identifier_hash(
        &self,
        search_space_id: i64,
        unique_identifier_hash: &str,
    ) -> anyhow::Result<Option<Document>>;

    /// Look up a document by its global dedup key.
    async fn find_by_content_hash(
        &self,
        search_space_id: i64,
        content_hash: &str,
    ) -> anyhow::Result<Option<Document>>;

    /// Look up a document by `(connector_id, source_id)`, used by C4's
    /// early-skip optimization to avoid recomputing `content_hash` for
    /// items whose upstream representation clearly hasn't changed.
    async fn find_by_connector_and_source_id(
        &self,
        connector_id: i64,
        source_id: &str,
    ) -> anyhow::Result<Option<Document>>;

    /// Replace all chunks belonging to a document (used outside the
    /// combined `upsert_document` path, e.g. re-chunking after a format
    /// change without altering document content).
    async fn replace_chunks(&self, document_id: &str, chunks: Vec<Chunk>) -> anyhow::Result<()>;

    /// Attach/replace a chunk's embedding vector.
    async fn upsert_embedding(&self, chunk_id: &str, embedding: Vec<f32>) -> anyhow::Result<()>;

    async fn get_document(&self, document_id: &str) -> anyhow::Result<Option<DocumentResponse>>;

    async fn get_document_metadata(
        &self,
        document_id: &str,
    ) -> anyhow::Result<Option<DocumentMetadata>>;

    /// Full-text keyword search scoped to a search space (and optionally a
    /// connector subset), returning raw per-backend scores.
    async fn keyword_search(
        &self,
        search_space_id: i64,
        query: &str,
        connector_ids: Option<&[i64]>,
        limit: usize,
    ) -> anyhow::Result<Vec<ChunkCandidate>>;

    /// Vector similarity search over chunk embeddings.
    async fn vector_search(
        &self,
        search_space_id: i64,
        query_embedding: &[f32],
        connector_ids: Option<&[i64]>,
        limit: usize,
    ) -> anyhow::Result<Vec<ChunkCandidate>>;
}
