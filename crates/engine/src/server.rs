//! HTTP surface (spec.md §6 External Interfaces), grounded in the teacher's
//! `server.rs`: `AppState`, the `AppError`/`IntoResponse` error contract, and
//! permissive CORS are kept verbatim in shape. Routes are rebuilt around the
//! new domain: a run-trigger endpoint wired to the scheduler, a streaming
//! `/chat` endpoint wired to the research agent, and the teacher's
//! `/tools/*` + `/health` routes adapted to search-space-scoped storage.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use kbase_core::embedding::EmbeddingProvider;
use kbase_core::model::{ChatMessage, ChatRole};
use kbase_core::store::{DocumentResponse, Store};

use crate::agent::events::{AgentEvent, EventSender};
use crate::agent::graph::run_research;
use crate::agent::state::{ResearchMode, ResearchState, SearchMode};
use crate::config::{Config, RetrievalConfig};
use crate::retrieval::{fan_out, EmbeddingReranker, Reranker, RetrievedChunk};
use crate::scheduler::{RunRequest, Scheduler};
use crate::store::SqliteStore;

#[derive(Clone)]
struct AppState {
    store: Arc<SqliteStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    scheduler: Arc<Scheduler>,
    config: Arc<Config>,
}

/// Starts the HTTP server. Binds `config.server.bind` and serves until the
/// process is terminated; the scheduler's worker pool and periodic loop are
/// expected to already be spawned by the caller (see `main.rs`).
pub async fn run_server(
    config: Arc<Config>,
    store: Arc<SqliteStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    scheduler: Arc<Scheduler>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState { store, embedder, scheduler, config };

    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let app = Router::new()
        .route("/connectors/{id}/sync", post(handle_trigger))
        .route("/chat", post(handle_chat))
        .route("/tools/search", post(handle_search))
        .route("/tools/get", post(handle_get))
        .route("/tools/sources", get(handle_sources))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("kbase server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: ErrorDetail { code: self.code, message: self.message } };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::BAD_REQUEST, code: "bad_request".to_string(), message: message.into() }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::NOT_FOUND, code: "not_found".to_string(), message: message.into() }
}

fn embeddings_disabled(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::BAD_REQUEST, code: "embeddings_disabled".to_string(), message: message.into() }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::INTERNAL_SERVER_ERROR, code: "internal".to_string(), message: message.into() }
}

// ============ POST /connectors/{id}/sync ============
// spec.md §6 run-trigger contract.

fn normalize_date_sentinel(value: Option<String>) -> Option<String> {
    match value {
        Some(s) if s == "undefined" || s.is_empty() => None,
        other => other,
    }
}

#[derive(Deserialize, Default)]
struct DriveItemsRequest {
    #[serde(default)]
    #[allow(dead_code)]
    folders: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    files: Vec<String>,
}

#[derive(Deserialize, Default)]
struct TriggerRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    max_items: Option<i64>,
    #[serde(default)]
    #[allow(dead_code)]
    drive_items: Option<DriveItemsRequest>,
}

#[derive(Serialize)]
struct TriggerResponse {
    message: String,
    connector_id: i64,
    space_id: i64,
    indexing_from: Option<String>,
    indexing_to: Option<String>,
}

/// The trigger normalizes date sentinels and enqueues the run; the actual
/// delta-vs-full window is chosen by the indexer pass itself from
/// `connector.last_indexed_at`/`delta_cursor` (spec.md §4.4 step 2), not
/// recomputed here.
async fn handle_trigger(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, AppError> {
    let _ = req.user_id;

    let connector = state
        .store
        .get_connector(id)
        .await
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found(format!("connector {id} not found")))?;

    let indexing_from = normalize_date_sentinel(req.start_date);
    let indexing_to = normalize_date_sentinel(req.end_date);

    state
        .scheduler
        .submit(RunRequest { connector_id: connector.id, update_last_indexed: true })
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(TriggerResponse {
        message: format!("run queued for connector {}", connector.id),
        connector_id: connector.id,
        space_id: connector.search_space_id,
        indexing_from,
        indexing_to,
    }))
}

// ============ POST /chat ============
// spec.md §6 chat/agent contract.

#[derive(Deserialize)]
struct ChatMessageIn {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatDataIn {
    search_space_id: serde_json::Value,
    research_mode: ResearchMode,
    #[serde(default)]
    selected_connectors: Vec<String>,
    #[serde(default = "default_search_mode")]
    search_mode: SearchMode,
    #[serde(default)]
    document_ids_to_add_in_context: Vec<serde_json::Value>,
}

fn default_search_mode() -> SearchMode {
    SearchMode::Chunks
}

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessageIn>,
    data: ChatDataIn,
}

fn parse_search_space_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

/// Connector name sanitization (spec.md §6: `[A-Za-z0-9_-]`).
fn sanitize_connector_name(name: &str) -> Option<&str> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        Some(name)
    } else {
        None
    }
}

fn document_id_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if req.messages.is_empty() || req.messages.last().map(|m| m.role.as_str()) != Some("user") {
        return Err(bad_request("last message must have role 'user'"));
    }
    for message in &req.messages {
        if message.content.len() > 10_000 {
            return Err(bad_request("message content exceeds 10000 characters"));
        }
    }

    let search_space_id = parse_search_space_id(&req.data.search_space_id)
        .filter(|id| *id > 0)
        .ok_or_else(|| bad_request("search_space_id must be a positive integer"))?;

    let mut sanitized_connectors = Vec::with_capacity(req.data.selected_connectors.len());
    for name in &req.data.selected_connectors {
        match sanitize_connector_name(name) {
            Some(n) => sanitized_connectors.push(n.to_string()),
            None => return Err(bad_request(format!("invalid connector name: {name}"))),
        }
    }

    let search_space = state
        .store
        .get_search_space(search_space_id)
        .await
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found(format!("search space {search_space_id} not found")))?;

    let all_connectors =
        state.store.list_connectors(Some(search_space_id)).await.map_err(|e| internal_error(e.to_string()))?;
    let selected_connector_ids: Vec<i64> = if sanitized_connectors.is_empty() {
        all_connectors.iter().map(|c| c.id).collect()
    } else {
        all_connectors
            .iter()
            .filter(|c| sanitized_connectors.iter().any(|name| name == &c.name))
            .map(|c| c.id)
            .collect()
    };

    let selected_document_ids: Vec<String> =
        req.data.document_ids_to_add_in_context.iter().filter_map(document_id_as_string).collect();

    let mut llm_configs = Vec::new();
    for provider in [&search_space.llm_fast, &search_space.llm_strategic, &search_space.llm_long_context] {
        if let Some(provider) = provider {
            if let Some(cfg) =
                state.store.get_llm_config_by_provider(provider).await.map_err(|e| internal_error(e.to_string()))?
            {
                llm_configs.push(cfg);
            }
        }
    }
    if llm_configs.is_empty() {
        return Err(bad_request("search space has no usable LLM configuration"));
    }

    let thread_id =
        state.store.create_chat_thread(search_space_id).await.map_err(|e| internal_error(e.to_string()))?;
    let mut chat_history = Vec::with_capacity(req.messages.len());
    for message in &req.messages {
        let role = match message.role.as_str() {
            "assistant" => ChatRole::Assistant,
            "system" => ChatRole::System,
            _ => ChatRole::User,
        };
        state
            .store
            .append_chat_message(thread_id, role, &message.content)
            .await
            .map_err(|e| internal_error(e.to_string()))?;
        chat_history.push(ChatMessage { role, content: message.content.clone() });
    }
    let user_query = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();

    let mut research_state = ResearchState {
        thread_id,
        search_space_id,
        user_query,
        chat_history,
        research_mode: req.data.research_mode,
        search_mode: req.data.search_mode,
        selected_connector_ids,
        selected_document_ids,
        llm_configs,
        citations_enabled: search_space.citations_enabled,
        custom_instructions: search_space.qna_custom_instructions.clone(),
        num_sections: 3,
        reformulated_query: None,
        answer_outline: Vec::new(),
        written_sections: Vec::new(),
        reranked_documents: Vec::new(),
        final_answer: None,
        further_questions: Vec::new(),
        resumable: false,
    };

    let (tx, rx): (EventSender, _) = tokio::sync::mpsc::unbounded_channel();
    let store = state.store.clone();
    let embedder = state.embedder.clone();
    let retrieval_config = state.config.retrieval.clone();

    tokio::spawn(async move {
        let reranker: Option<EmbeddingReranker<'_>> =
            embedder.as_deref().map(|provider| EmbeddingReranker { provider });
        let reranker_ref: Option<&dyn Reranker> = reranker.as_ref().map(|r| r as &dyn Reranker);
        if let Err(e) =
            run_research(&mut research_state, store.as_ref(), embedder.as_deref(), reranker_ref, &retrieval_config, &tx)
                .await
        {
            let _ = tx.send(AgentEvent::Error(e.to_string()));
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let (event_name, data) = sse_payload(&event);
        Ok(Event::default().event(event_name).data(data))
    });

    Ok(Sse::new(stream))
}

fn sse_payload(event: &AgentEvent) -> (&'static str, String) {
    match event {
        AgentEvent::TerminalInfoDelta(line) => ("terminal_info_delta", serde_json::to_string(line).unwrap_or_default()),
        AgentEvent::SourcesDelta(groups) => ("sources_delta", serde_json::to_string(groups).unwrap_or_default()),
        AgentEvent::TextChunk(text) => ("text_chunk", serde_json::to_string(text).unwrap_or_default()),
        AgentEvent::FurtherQuestionsDelta(questions) => {
            ("further_questions_delta", serde_json::to_string(questions).unwrap_or_default())
        }
        AgentEvent::Error(message) => ("error", serde_json::to_string(message).unwrap_or_default()),
    }
}

// ============ POST /tools/search ============

#[derive(Deserialize)]
struct SearchRequest {
    search_space_id: i64,
    query: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
    #[serde(default)]
    connector_ids: Option<Vec<i64>>,
}

fn default_mode() -> String {
    "keyword".to_string()
}

fn default_search_limit() -> usize {
    12
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<RetrievedChunk>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let mut retrieval_config: RetrievalConfig = state.config.retrieval.clone();
    retrieval_config.final_limit = req.limit.max(1);
    retrieval_config.hybrid_alpha = match req.mode.as_str() {
        "keyword" => 0.0,
        "semantic" => 1.0,
        "hybrid" => state.config.retrieval.hybrid_alpha,
        other => return Err(bad_request(format!("unknown search mode: {other}. use keyword, semantic, or hybrid"))),
    };

    let query_embedding = if req.mode != "keyword" {
        let Some(embedder) = state.embedder.as_deref() else {
            return Err(embeddings_disabled("embeddings are disabled; use mode=keyword"));
        };
        let vectors = embedder.embed(&[req.query.clone()]).await.map_err(|e| internal_error(e.to_string()))?;
        vectors.into_iter().next()
    } else {
        None
    };

    let connector_ids = match req.connector_ids {
        Some(ids) => ids,
        None => state
            .store
            .list_connectors(Some(req.search_space_id))
            .await
            .map_err(|e| internal_error(e.to_string()))?
            .into_iter()
            .map(|c| c.id)
            .collect(),
    };

    let results = fan_out(
        state.store.as_ref(),
        req.search_space_id,
        &[req.query.clone()],
        &connector_ids,
        &[],
        query_embedding.as_deref(),
        None,
        &retrieval_config,
    )
    .await
    .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(SearchResponse { results }))
}

// ============ POST /tools/get ============

#[derive(Deserialize)]
struct GetRequest {
    id: String,
}

async fn handle_get(
    State(state): State<AppState>,
    Json(req): Json<GetRequest>,
) -> Result<Json<DocumentResponse>, AppError> {
    if req.id.trim().is_empty() {
        return Err(bad_request("id must not be empty"));
    }

    let doc = state.store.get_document(&req.id).await.map_err(|e| internal_error(e.to_string()))?;
    doc.map(Json).ok_or_else(|| not_found(format!("document {} not found", req.id)))
}

// ============ GET /tools/sources ============

#[derive(Deserialize)]
struct SourcesQuery {
    search_space_id: Option<i64>,
}

#[derive(Serialize)]
struct SourceStatus {
    id: i64,
    name: String,
    connector_type: String,
    is_indexable: bool,
    periodic_indexing_enabled: bool,
    last_indexed_at: Option<chrono::DateTime<chrono::Utc>>,
    next_scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<SourceStatus>,
}

async fn handle_sources(
    State(state): State<AppState>,
    Query(query): Query<SourcesQuery>,
) -> Result<Json<SourcesResponse>, AppError> {
    let connectors =
        state.store.list_connectors(query.search_space_id).await.map_err(|e| internal_error(e.to_string()))?;
    let sources = connectors
        .into_iter()
        .map(|c| SourceStatus {
            id: c.id,
            name: c.name,
            connector_type: c.connector_type.as_str().to_string(),
            is_indexable: c.is_indexable,
            periodic_indexing_enabled: c.periodic_indexing_enabled,
            last_indexed_at: c.last_indexed_at,
            next_scheduled_at: c.next_scheduled_at,
        })
        .collect();
    Ok(Json(SourcesResponse { sources }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string(), version: env!("CARGO_PKG_VERSION").to_string() })
}
