//! HTTP API integration tests: boot a real server against a temp SQLite
//! database and drive it with `reqwest`, the same way the trigger/tools
//! endpoints are actually used.

use std::sync::Arc;
use std::time::Duration;

use kbase_core::model::{Chunk, ConnectorType, Document};
use kbase_core::store::Store;
use kbase_engine::config::Config;
use kbase_engine::connectors::registry::AdapterRegistry;
use kbase_engine::scheduler::Scheduler;
use kbase_engine::{db, migrate, server, store::SqliteStore};
use tempfile::TempDir;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

async fn boot_server(tmp: &TempDir, port: u16) -> (Arc<SqliteStore>, i64, i64) {
    let db_path = tmp.path().join("kbase.sqlite");
    let toml_src = format!(
        r#"
        [db]
        path = "{}"
        [chunking]
        max_tokens = 500
        [retrieval]
        final_limit = 12
        [server]
        bind = "127.0.0.1:{}"
        "#,
        db_path.display(),
        port
    );
    let cfg: Config = toml::from_str(&toml_src).unwrap();
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));

    let space_id: i64 = sqlx::query_scalar("INSERT INTO search_spaces (owner) VALUES ('u') RETURNING id")
        .fetch_one(store.pool())
        .await
        .unwrap();
    let files_dir = tmp.path().join("files");
    std::fs::create_dir_all(&files_dir).unwrap();
    let connector_config = serde_json::json!({ "root": files_dir }).to_string();
    let connector_id: i64 = sqlx::query_scalar(
        "INSERT INTO connectors (search_space_id, name, connector_type, config_json) VALUES (?1, 'docs', 'filesystem', ?2) RETURNING id",
    )
    .bind(space_id)
    .bind(connector_config)
    .fetch_one(store.pool())
    .await
    .unwrap();

    let document = Document {
        id: uuid::Uuid::new_v4().to_string(),
        search_space_id: space_id,
        connector_type: ConnectorType::Filesystem,
        connector_id,
        source_id: "seed.md".to_string(),
        title: Some("Seed Document".to_string()),
        content: "The quick brown fox jumps over the lazy dog.".to_string(),
        content_hash: kbase_core::hash::content_hash(space_id, "The quick brown fox jumps over the lazy dog."),
        unique_identifier_hash: kbase_core::hash::unique_identifier_hash("filesystem", "seed.md", space_id),
        metadata: serde_json::json!({}),
        summary_embedding: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        owning_user: None,
    };
    let chunk = Chunk {
        id: uuid::Uuid::new_v4().to_string(),
        document_id: document.id.clone(),
        chunk_index: 0,
        content: document.content.clone(),
        content_hash: document.content_hash.clone(),
        embedding: None,
    };
    store.upsert_document(document.clone(), vec![chunk]).await.unwrap();

    let registry = Arc::new(AdapterRegistry::new(tmp.path().join("git-cache")));
    let cfg = Arc::new(cfg);
    let scheduler = Arc::new(Scheduler::new(store.clone(), registry, None, cfg.clone()));
    let store_for_server = store.clone();
    tokio::spawn(async move {
        server::run_server(cfg, store_for_server, None, scheduler).await.ok();
    });

    (store, space_id, connector_id)
}

async fn wait_for_health(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/health");
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("server did not become ready");
}

#[tokio::test]
async fn health_and_sources_endpoints_respond() {
    let tmp = TempDir::new().unwrap();
    let port = free_port();
    let (_store, space_id, _connector_id) = boot_server(&tmp, port).await;
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let health: serde_json::Value =
        client.get(format!("http://127.0.0.1:{port}/health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");

    let sources: serde_json::Value = client
        .get(format!("http://127.0.0.1:{port}/tools/sources?search_space_id={space_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sources = sources["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["name"], "docs");
}

#[tokio::test]
async fn search_and_get_round_trip_a_seeded_document() {
    let tmp = TempDir::new().unwrap();
    let port = free_port();
    let (store, space_id, _connector_id) = boot_server(&tmp, port).await;
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let search_resp: serde_json::Value = client
        .post(format!("http://127.0.0.1:{port}/tools/search"))
        .json(&serde_json::json!({ "search_space_id": space_id, "query": "quick brown fox", "mode": "keyword" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = search_resp["results"].as_array().unwrap();
    assert!(!results.is_empty(), "keyword search should surface the seeded document");

    let document_id = results[0]["document_id"].as_str().unwrap().to_string();
    let get_resp: serde_json::Value = client
        .post(format!("http://127.0.0.1:{port}/tools/get"))
        .json(&serde_json::json!({ "id": document_id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(get_resp["document"]["id"], document_id);

    // Semantic mode with embeddings disabled must be rejected explicitly.
    let semantic_status = client
        .post(format!("http://127.0.0.1:{port}/tools/search"))
        .json(&serde_json::json!({ "search_space_id": space_id, "query": "fox", "mode": "semantic" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(semantic_status, reqwest::StatusCode::BAD_REQUEST);

    let _ = store.get_document_metadata(&document_id).await.unwrap();
}

#[tokio::test]
async fn trigger_enqueues_a_run_for_a_known_connector_and_404s_for_unknown() {
    let tmp = TempDir::new().unwrap();
    let port = free_port();
    let (_store, _space_id, connector_id) = boot_server(&tmp, port).await;
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{port}/connectors/{connector_id}/sync"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["connector_id"], connector_id);

    let missing = client
        .post(format!("http://127.0.0.1:{port}/connectors/999999/sync"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}
