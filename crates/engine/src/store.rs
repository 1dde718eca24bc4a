//! SQLite-backed [`Store`] implementation, grounded in the teacher's
//! `crates/context-harness/src/sqlite_store.rs` — extended from a single
//! `ON CONFLICT` upsert to the dual-hash, four-outcome upsert spec.md §4.1
//! requires, and scoped throughout by `search_space_id`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use kbase_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use kbase_core::model::{Chunk, ConnectorRecord, ConnectorType, Document, TaskLogEntry, TaskStatus};
use kbase_core::store::{
    ChunkCandidate, DocumentMetadata, DocumentResponse, Store, UpsertOutcome,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn task_status_from_str(s: &str) -> TaskStatus {
    match s {
        "started" => TaskStatus::Started,
        "progress" => TaskStatus::Progress,
        "success" => TaskStatus::Success,
        _ => TaskStatus::Failure,
    }
}

fn task_status_as_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Started => "started",
        TaskStatus::Progress => "progress",
        TaskStatus::Success => "success",
        TaskStatus::Failure => "failure",
    }
}

fn row_to_connector(row: &sqlx::sqlite::SqliteRow) -> Result<ConnectorRecord> {
    let config_json: String = row.get("config_json");
    let last_indexed_at: Option<i64> = row.try_get("last_indexed_at").ok().flatten();
    let next_scheduled_at: Option<i64> = row.try_get("next_scheduled_at").ok().flatten();
    let connector_type_str: String = row.get("connector_type");
    let indexing_frequency_minutes: Option<i64> = row.try_get("indexing_frequency_minutes").ok().flatten();

    Ok(ConnectorRecord {
        id: row.get("id"),
        search_space_id: row.get("search_space_id"),
        name: row.get("name"),
        connector_type: connector_type_from_str(&connector_type_str),
        config: serde_json::from_str(&config_json).unwrap_or(serde_json::json!({})),
        is_indexable: row.get::<i64, _>("is_indexable") != 0,
        periodic_indexing_enabled: row.get::<i64, _>("periodic_indexing_enabled") != 0,
        indexing_frequency_minutes: indexing_frequency_minutes.map(|m| m as u32),
        last_indexed_at: last_indexed_at.and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
        next_scheduled_at: next_scheduled_at.and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
        last_indexed_settings_hash: row.get("last_indexed_settings_hash"),
        delta_cursor: row.get("delta_cursor"),
    })
}

/// Connector and task-log persistence (spec.md §4.4/§4.5). Kept as inherent
/// `SqliteStore` methods rather than on the generic `Store` trait: unlike
/// documents/chunks, connector config and the task log are engine-runtime
/// bookkeeping, not something `MemoryStore`'s test double needs to model.
impl SqliteStore {
    pub async fn get_connector(&self, connector_id: i64) -> Result<Option<ConnectorRecord>> {
        let row = sqlx::query("SELECT * FROM connectors WHERE id = ?")
            .bind(connector_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_connector).transpose()
    }

    pub async fn list_connectors(&self, search_space_id: Option<i64>) -> Result<Vec<ConnectorRecord>> {
        let rows = match search_space_id {
            Some(id) => {
                sqlx::query("SELECT * FROM connectors WHERE search_space_id = ? ORDER BY id")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query("SELECT * FROM connectors ORDER BY id").fetch_all(&self.pool).await?,
        };
        rows.iter().map(row_to_connector).collect()
    }

    /// Post-loop bookkeeping after an indexer pass (spec.md §4.4 step 4):
    /// persist the new delta cursor, settings hash, and `last_indexed_at`.
    pub async fn update_connector_after_run(
        &self,
        connector_id: i64,
        delta_cursor: Option<&str>,
        settings_hash: &str,
        update_last_indexed: bool,
    ) -> Result<()> {
        if update_last_indexed {
            sqlx::query(
                "UPDATE connectors SET delta_cursor = ?, last_indexed_settings_hash = ?, last_indexed_at = ? WHERE id = ?",
            )
            .bind(delta_cursor)
            .bind(settings_hash)
            .bind(chrono::Utc::now().timestamp())
            .bind(connector_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE connectors SET delta_cursor = ?, last_indexed_settings_hash = ? WHERE id = ?",
            )
            .bind(delta_cursor)
            .bind(settings_hash)
            .bind(connector_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn set_connector_next_scheduled_at(
        &self,
        connector_id: i64,
        next_scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE connectors SET next_scheduled_at = ? WHERE id = ?")
            .bind(next_scheduled_at.map(|t| t.timestamp()))
            .bind(connector_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append a task_log row (spec.md §3 Task Log Entry: "append-only...
    /// runs may emit many progress rows but exactly one terminal row").
    pub async fn log_task(
        &self,
        task_name: &str,
        source: &str,
        search_space_id: i64,
        status: TaskStatus,
        message: &str,
        metadata: &serde_json::Value,
    ) -> Result<i64> {
        let metadata_json = serde_json::to_string(metadata)?;
        let result = sqlx::query(
            "INSERT INTO task_log (task_name, source, search_space_id, status, message, metadata_json, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task_name)
        .bind(source)
        .bind(search_space_id)
        .bind(task_status_as_str(status))
        .bind(message)
        .bind(&metadata_json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_task_log(&self, search_space_id: i64, limit: i64) -> Result<Vec<TaskLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM task_log WHERE search_space_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(search_space_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let metadata_json: String = row.get("metadata_json");
                let status_str: String = row.get("status");
                let created_at: i64 = row.get("created_at");
                Ok(TaskLogEntry {
                    id: row.get("id"),
                    task_name: row.get("task_name"),
                    source: row.get("source"),
                    search_space_id: row.get("search_space_id"),
                    status: task_status_from_str(&status_str),
                    message: row.get("message"),
                    metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
                    created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// spec.md §3 Search Space: owner, citations flag, custom instructions,
    /// and the three named LLM-role slots.
    pub async fn get_search_space(&self, id: i64) -> Result<Option<kbase_core::model::SearchSpace>> {
        let row = sqlx::query("SELECT * FROM search_spaces WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        Ok(match row {
            Some(row) => Some(kbase_core::model::SearchSpace {
                id: row.get("id"),
                owner: row.get("owner"),
                citations_enabled: row.get::<i64, _>("citations_enabled") != 0,
                qna_custom_instructions: row.get("qna_custom_instructions"),
                llm_long_context: row.get("llm_long_context"),
                llm_fast: row.get("llm_fast"),
                llm_strategic: row.get("llm_strategic"),
            }),
            None => None,
        })
    }

    /// The three named slots on a search space (`llm_fast`, `llm_strategic`,
    /// `llm_long_context`) hold a `provider` string rather than a foreign
    /// key, so a config is looked up by provider name.
    pub async fn get_llm_config_by_provider(&self, provider: &str) -> Result<Option<kbase_core::model::LlmConfig>> {
        let row = sqlx::query("SELECT * FROM llm_configs WHERE provider = ? ORDER BY id LIMIT 1")
            .bind(provider)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => {
                let parameters_json: String = row.get("parameters_json");
                Some(kbase_core::model::LlmConfig {
                    id: row.get("id"),
                    provider: row.get("provider"),
                    model_name: row.get("model_name"),
                    credentials: row.get("credentials"),
                    api_base: row.get("api_base"),
                    language: row.get("language"),
                    parameters: serde_json::from_str(&parameters_json).unwrap_or(serde_json::json!({})),
                })
            }
            None => None,
        })
    }

    pub async fn create_chat_thread(&self, search_space_id: i64) -> Result<i64> {
        let result = sqlx::query("INSERT INTO chat_threads (search_space_id, created_at) VALUES (?, ?)")
            .bind(search_space_id)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn append_chat_message(
        &self,
        thread_id: i64,
        role: kbase_core::model::ChatRole,
        content: &str,
    ) -> Result<()> {
        let role_str = match role {
            kbase_core::model::ChatRole::User => "user",
            kbase_core::model::ChatRole::Assistant => "assistant",
            kbase_core::model::ChatRole::System => "system",
        };
        sqlx::query("INSERT INTO chat_messages (thread_id, role, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(thread_id)
            .bind(role_str)
            .bind(content)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_chat_messages(&self, thread_id: i64) -> Result<Vec<kbase_core::model::ChatMessage>> {
        let rows = sqlx::query("SELECT role, content FROM chat_messages WHERE thread_id = ? ORDER BY id")
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let role_str: String = row.get("role");
                let role = match role_str.as_str() {
                    "assistant" => kbase_core::model::ChatRole::Assistant,
                    "system" => kbase_core::model::ChatRole::System,
                    _ => kbase_core::model::ChatRole::User,
                };
                kbase_core::model::ChatMessage { role, content: row.get("content") }
            })
            .collect())
    }
}

fn connector_type_from_str(s: &str) -> ConnectorType {
    // Round-trips through serde's snake_case representation, the same one
    // `ConnectorType::as_str` produces, so this always matches a written row.
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .unwrap_or(ConnectorType::Filesystem)
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");
    let metadata_json: String = row.get("metadata_json");
    let connector_type_str: String = row.get("connector_type");
    let summary_embedding: Option<Vec<u8>> = row.try_get("summary_embedding").ok();

    Ok(Document {
        id: row.get("id"),
        search_space_id: row.get("search_space_id"),
        connector_type: connector_type_from_str(&connector_type_str),
        connector_id: row.get("connector_id"),
        source_id: row.get("source_id"),
        title: row.get("title"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        unique_identifier_hash: row.get("unique_identifier_hash"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        summary_embedding: summary_embedding.map(|b| blob_to_vec(&b)),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        updated_at: chrono::DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
        owning_user: row.get("owning_user"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(
        &self,
        mut document: Document,
        chunks: Vec<Chunk>,
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id, content_hash FROM documents WHERE search_space_id = ? AND unique_identifier_hash = ?",
        )
        .bind(document.search_space_id)
        .bind(&document.unique_identifier_hash)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let existing_id: String = row.get("id");
            let existing_hash: String = row.get("content_hash");

            if existing_hash == document.content_hash {
                tx.commit().await?;
                return Ok(UpsertOutcome::SkippedUnchanged);
            }

            document.id = existing_id.clone();
            let metadata_json = serde_json::to_string(&document.metadata)?;

            sqlx::query(
                r#"
                UPDATE documents SET
                    connector_type = ?, connector_id = ?, source_id = ?, title = ?,
                    content = ?, content_hash = ?, metadata_json = ?,
                    owning_user = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(document.connector_type.as_str())
            .bind(document.connector_id)
            .bind(&document.source_id)
            .bind(&document.title)
            .bind(&document.content)
            .bind(&document.content_hash)
            .bind(&metadata_json)
            .bind(&document.owning_user)
            .bind(document.updated_at.timestamp())
            .bind(&existing_id)
            .execute(&mut *tx)
            .await?;

            replace_chunks_tx(&mut tx, &existing_id, &chunks).await?;
            tx.commit().await?;
            return Ok(UpsertOutcome::Updated);
        }

        let content_collision = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM documents WHERE search_space_id = ? AND content_hash = ?",
        )
        .bind(document.search_space_id)
        .bind(&document.content_hash)
        .fetch_one(&mut *tx)
        .await?;

        if content_collision > 0 {
            tx.commit().await?;
            return Ok(UpsertOutcome::SkippedDuplicateContent);
        }

        let metadata_json = serde_json::to_string(&document.metadata)?;
        let insert_result = sqlx::query(
            r#"
            INSERT INTO documents (
                id, search_space_id, connector_type, connector_id, source_id, title,
                content, content_hash, unique_identifier_hash, metadata_json,
                owning_user, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(document.search_space_id)
        .bind(document.connector_type.as_str())
        .bind(document.connector_id)
        .bind(&document.source_id)
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.content_hash)
        .bind(&document.unique_identifier_hash)
        .bind(&metadata_json)
        .bind(&document.owning_user)
        .bind(document.created_at.timestamp())
        .bind(document.updated_at.timestamp())
        .execute(&mut *tx)
        .await;

        // A UNIQUE-constraint race on content_hash (another run inserted the
        // same content between our SELECT and our INSERT) is recovered as a
        // duplicate-content skip rather than failing the run (spec.md §7).
        if let Err(sqlx::Error::Database(db_err)) = &insert_result {
            if db_err.message().contains("UNIQUE") {
                tx.rollback().await?;
                return Ok(UpsertOutcome::SkippedDuplicateContent);
            }
        }
        insert_result?;

        replace_chunks_tx(&mut tx, &document.id, &chunks).await?;
        tx.commit().await?;
        Ok(UpsertOutcome::Inserted)
    }

    async fn find_by_unique_identifier_hash(
        &self,
        search_space_id: i64,
        unique_identifier_hash: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE search_space_id = ? AND unique_identifier_hash = ?")
            .bind(search_space_id)
            .bind(unique_identifier_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_by_content_hash(
        &self,
        search_space_id: i64,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE search_space_id = ? AND content_hash = ?")
            .bind(search_space_id)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_by_connector_and_source_id(
        &self,
        connector_id: i64,
        source_id: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE connector_id = ? AND source_id = ?")
            .bind(connector_id)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn replace_chunks(&self, document_id: &str, chunks: Vec<Chunk>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        replace_chunks_tx(&mut tx, document_id, &chunks).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_embedding(&self, chunk_id: &str, embedding: Vec<f32>) -> Result<()> {
        let document_id: String =
            sqlx::query_scalar("SELECT document_id FROM chunks WHERE id = ?")
                .bind(chunk_id)
                .fetch_one(&self.pool)
                .await?;
        let blob = vec_to_blob(&embedding);

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET embedding = excluded.embedding
            "#,
        )
        .bind(chunk_id)
        .bind(&document_id)
        .bind(&blob)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentResponse>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let document = row_to_document(&row)?;

        let chunk_rows = sqlx::query(
            "SELECT id, document_id, chunk_index, content, content_hash FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let chunks = chunk_rows
            .iter()
            .map(|r| Chunk {
                id: r.get("id"),
                document_id: r.get("document_id"),
                chunk_index: r.get("chunk_index"),
                content: r.get("content"),
                content_hash: r.get("content_hash"),
                embedding: None,
            })
            .collect();

        Ok(Some(DocumentResponse { document, chunks }))
    }

    async fn get_document_metadata(&self, document_id: &str) -> Result<Option<DocumentMetadata>> {
        let row = sqlx::query(
            "SELECT id, connector_type, source_id, title, metadata_json FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let metadata_json: String = r.get("metadata_json");
            DocumentMetadata {
                id: r.get("id"),
                connector_type: r.get("connector_type"),
                source_id: r.get("source_id"),
                title: r.get("title"),
                metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
            }
        }))
    }

    async fn keyword_search(
        &self,
        search_space_id: i64,
        query: &str,
        connector_ids: Option<&[i64]>,
        limit: usize,
    ) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT f.chunk_id, f.document_id, f.content, c.content_hash, f.rank
            FROM chunks_fts f
            JOIN chunks c ON c.id = f.chunk_id
            JOIN documents d ON d.id = f.document_id
            WHERE f.chunks_fts MATCH ? AND d.search_space_id = ?
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(search_space_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let document_id: String = row.get("document_id");
            if let Some(ids) = connector_ids {
                let connector_id: Option<i64> = sqlx::query_scalar(
                    "SELECT connector_id FROM documents WHERE id = ?",
                )
                .bind(&document_id)
                .fetch_optional(&self.pool)
                .await?;
                if connector_id.map(|id| !ids.contains(&id)).unwrap_or(true) {
                    continue;
                }
            }
            let rank: f64 = row.get("rank");
            out.push(ChunkCandidate {
                chunk: Chunk {
                    id: row.get("chunk_id"),
                    document_id,
                    chunk_index: 0,
                    content: row.get("content"),
                    content_hash: row.get("content_hash"),
                    embedding: None,
                },
                score: -rank as f32,
            });
        }
        Ok(out)
    }

    async fn vector_search(
        &self,
        search_space_id: i64,
        query_embedding: &[f32],
        connector_ids: Option<&[i64]>,
        limit: usize,
    ) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding, c.content, c.content_hash, d.connector_id
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = cv.document_id
            WHERE d.search_space_id = ?
            "#,
        )
        .bind(search_space_id)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .filter(|row| {
                connector_ids
                    .map(|ids| ids.contains(&row.get::<i64, _>("connector_id")))
                    .unwrap_or(true)
            })
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let score = cosine_similarity(query_embedding, &vec);
                ChunkCandidate {
                    chunk: Chunk {
                        id: row.get("chunk_id"),
                        document_id: row.get("document_id"),
                        chunk_index: 0,
                        content: row.get("content"),
                        content_hash: row.get("content_hash"),
                        embedding: None,
                    },
                    score,
                }
            })
            .collect();

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        candidates.truncate(limit);
        Ok(candidates)
    }
}

async fn replace_chunks_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    document_id: &str,
    chunks: &[Chunk],
) -> Result<()> {
    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut **tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, content, content_hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(&chunk.content_hash)
        .execute(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, content) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(document_id)
            .bind(&chunk.content)
            .execute(&mut **tx)
            .await?;

        if let Some(embedding) = &chunk.embedding {
            let blob = vec_to_blob(embedding);
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(&blob)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations_on;
    use kbase_core::hash::{content_hash, unique_identifier_hash};
    use kbase_core::model::ConnectorType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        run_migrations_on(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn doc(search_space_id: i64, connector_id: i64, source_id: &str, content: &str) -> Document {
        let now = chrono::Utc::now();
        Document {
            id: uuid::Uuid::new_v4().to_string(),
            search_space_id,
            connector_type: ConnectorType::Filesystem,
            connector_id,
            source_id: source_id.to_string(),
            title: Some(source_id.to_string()),
            content: content.to_string(),
            content_hash: content_hash(search_space_id, content),
            unique_identifier_hash: unique_identifier_hash("filesystem", source_id, search_space_id),
            metadata: serde_json::json!({}),
            summary_embedding: None,
            created_at: now,
            updated_at: now,
            owning_user: None,
        }
    }

    #[tokio::test]
    async fn insert_then_reinsert_same_content_is_skipped_unchanged() {
        let store = test_store().await;
        let d = doc(1, 1, "a.txt", "hello world");
        let first = store.upsert_document(d.clone(), vec![]).await.unwrap();
        let second = store.upsert_document(d, vec![]).await.unwrap();
        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::SkippedUnchanged);
    }

    #[tokio::test]
    async fn changed_content_updates_in_place() {
        let store = test_store().await;
        let d1 = doc(1, 1, "a.txt", "v1");
        store.upsert_document(d1.clone(), vec![]).await.unwrap();
        let d2 = doc(1, 1, "a.txt", "v2");
        let outcome = store.upsert_document(d2, vec![]).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let found = store
            .find_by_unique_identifier_hash(1, &d1.unique_identifier_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, d1.id);
        assert_eq!(found.content, "v2");
    }

    #[tokio::test]
    async fn duplicate_content_from_new_source_is_skipped() {
        let store = test_store().await;
        let d1 = doc(1, 1, "a.txt", "same");
        let d2 = doc(1, 1, "b.txt", "same");
        store.upsert_document(d1, vec![]).await.unwrap();
        let outcome = store.upsert_document(d2, vec![]).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::SkippedDuplicateContent);
    }

    #[tokio::test]
    async fn keyword_search_is_scoped_to_search_space() {
        let store = test_store().await;
        let d1 = doc(1, 1, "a.txt", "space one body");
        let d2 = doc(2, 1, "a.txt", "space two body");
        store
            .upsert_document(
                d1.clone(),
                vec![Chunk {
                    id: "c1".into(),
                    document_id: d1.id.clone(),
                    chunk_index: 0,
                    content: "space one body".into(),
                    content_hash: "h1".into(),
                    embedding: None,
                }],
            )
            .await
            .unwrap();
        store
            .upsert_document(
                d2.clone(),
                vec![Chunk {
                    id: "c2".into(),
                    document_id: d2.id.clone(),
                    chunk_index: 0,
                    content: "space two body".into(),
                    content_hash: "h2".into(),
                    embedding: None,
                }],
            )
            .await
            .unwrap();

        let hits = store.keyword_search(1, "body", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.document_id, d1.id);
    }
}
