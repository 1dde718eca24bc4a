//! End-to-end indexer + search integration tests, exercising the same path
//! `kbase sync` takes: adapter -> indexer -> SQLite store -> hybrid search.

use kbase_core::search::hybrid_search;
use kbase_core::store::{Store, UpsertOutcome};
use kbase_engine::config::Config;
use kbase_engine::connectors::registry::AdapterRegistry;
use kbase_engine::{db, indexer, migrate, store::SqliteStore};
use tempfile::TempDir;

async fn test_config(tmp: &TempDir) -> Config {
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
        bind = "127.0.0.1:0"
        "#,
        db_path.display()
    );
    let cfg: Config = toml::from_str(&toml_src).unwrap();
    cfg
}

async fn seed_filesystem_connector(store: &SqliteStore, root: &std::path::Path) -> i64 {
    let pool = store.pool();
    let space_id: i64 = sqlx::query_scalar(
        "INSERT INTO search_spaces (owner, citations_enabled) VALUES (?1, 1) RETURNING id",
    )
    .bind("test-user")
    .fetch_one(pool)
    .await
    .unwrap();

    let config_json = serde_json::json!({
        "root": root,
        "include_globs": ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx"],
    })
    .to_string();

    sqlx::query_scalar(
        r#"
        INSERT INTO connectors (search_space_id, name, connector_type, config_json, is_indexable)
        VALUES (?1, ?2, ?3, ?4, 1)
        RETURNING id
        "#,
    )
    .bind(space_id)
    .bind("docs")
    .bind("filesystem")
    .bind(config_json)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn indexer_pass_upserts_and_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let files_dir = tmp.path().join("files");
    std::fs::create_dir_all(&files_dir).unwrap();
    std::fs::write(
        files_dir.join("alpha.md"),
        "# Alpha\n\nThis document is about Rust ownership and borrowing.",
    )
    .unwrap();
    std::fs::write(
        files_dir.join("beta.md"),
        "# Beta\n\nThis document covers Kubernetes deployment strategies.",
    )
    .unwrap();

    let cfg = test_config(&tmp).await;
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    let store = SqliteStore::new(pool);

    let connector_id = seed_filesystem_connector(&store, &files_dir).await;
    let connector = store.get_connector(connector_id).await.unwrap().unwrap();

    let registry = AdapterRegistry::new(tmp.path().join("git-cache"));
    let adapter = registry.adapter_for(connector.connector_type).unwrap();

    let first = indexer::run_indexer_pass(&store, adapter.as_ref(), None, &connector, &cfg, true).await.unwrap();
    assert_eq!(first.inserted, 2, "both files should be inserted on first pass");
    assert_eq!(first.updated, 0);
    assert_eq!(first.errors, 0);

    let second = indexer::run_indexer_pass(&store, adapter.as_ref(), None, &connector, &cfg, true).await.unwrap();
    assert_eq!(second.inserted, 0, "re-running against unchanged files should insert nothing");
    assert_eq!(second.skipped_unchanged, 2, "unchanged content should be skipped");

    let hits = hybrid_search(&store, connector.search_space_id, "Rust ownership", None, None, 10, 0.0).await.unwrap();
    assert!(!hits.is_empty(), "keyword search should find the alpha document");
}

#[tokio::test]
async fn modifying_a_file_produces_an_update_not_a_duplicate() {
    let tmp = TempDir::new().unwrap();
    let files_dir = tmp.path().join("files");
    std::fs::create_dir_all(&files_dir).unwrap();
    std::fs::write(files_dir.join("note.md"), "# Note\n\nOriginal content.").unwrap();

    let cfg = test_config(&tmp).await;
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    let store = SqliteStore::new(pool);

    let connector_id = seed_filesystem_connector(&store, &files_dir).await;
    let connector = store.get_connector(connector_id).await.unwrap().unwrap();
    let registry = AdapterRegistry::new(tmp.path().join("git-cache"));
    let adapter = registry.adapter_for(connector.connector_type).unwrap();

    indexer::run_indexer_pass(&store, adapter.as_ref(), None, &connector, &cfg, true).await.unwrap();

    std::fs::write(files_dir.join("note.md"), "# Note\n\nContent has changed entirely.").unwrap();
    let result = indexer::run_indexer_pass(&store, adapter.as_ref(), None, &connector, &cfg, true).await.unwrap();
    assert_eq!(result.updated, 1, "changed content under the same source_id should update in place");
    assert_eq!(result.inserted, 0);
}

#[tokio::test]
async fn direct_store_upsert_detects_duplicate_content_across_source_ids() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp).await;
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    let store = SqliteStore::new(pool);

    let pool_ref = store.pool();
    let space_id: i64 =
        sqlx::query_scalar("INSERT INTO search_spaces (owner) VALUES ('u') RETURNING id").fetch_one(pool_ref).await.unwrap();
    let connector_id: i64 = sqlx::query_scalar(
        "INSERT INTO connectors (search_space_id, name, connector_type, config_json) VALUES (?1, 'a', 'filesystem', '{}') RETURNING id",
    )
    .bind(space_id)
    .fetch_one(pool_ref)
    .await
    .unwrap();

    let make_doc = |source_id: &str| kbase_core::model::Document {
        id: uuid::Uuid::new_v4().to_string(),
        search_space_id: space_id,
        connector_type: kbase_core::model::ConnectorType::Filesystem,
        connector_id,
        source_id: source_id.to_string(),
        title: Some(source_id.to_string()),
        content: "identical content in two different places".to_string(),
        content_hash: kbase_core::hash::content_hash(space_id, "identical content in two different places"),
        unique_identifier_hash: kbase_core::hash::unique_identifier_hash(
            kbase_core::model::ConnectorType::Filesystem.as_str(),
            source_id,
            space_id,
        ),
        metadata: serde_json::json!({}),
        summary_embedding: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        owning_user: None,
    };

    let first = store.upsert_document(make_doc("a.md"), vec![]).await.unwrap();
    assert_eq!(first, UpsertOutcome::Inserted);

    let second = store.upsert_document(make_doc("b.md"), vec![]).await.unwrap();
    assert_eq!(second, UpsertOutcome::SkippedDuplicateContent, "same content under a different source_id must not create a second document");
}
