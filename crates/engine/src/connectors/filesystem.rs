//! Filesystem connector, ported from the teacher's `connector_fs.rs` and
//! generalized from a single synchronous `scan()` into the async
//! list/fetch split `ConnectorAdapter` requires.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use kbase_core::connector::{ConnectorAdapter, FetchedContent, SourceItem};
use kbase_core::error::RetryCallback;
use kbase_core::model::ConnectorType;

/// Binary file extensions extracted via `pdf-extract`/`zip`+`quick-xml`
/// rather than read as UTF-8 text (spec.md §4.3 ETL step).
const BINARY_EXTENSIONS: &[&str] = &[".pdf"];

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

pub struct FilesystemConnector;

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn parse_config(config: &serde_json::Value) -> Result<FilesystemConnectorConfig> {
    serde_json::from_value(config.clone()).context("invalid filesystem connector config")
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn walk(config: &FilesystemConnectorConfig) -> Result<Vec<SourceItem>> {
    if !config.root.exists() {
        bail!("filesystem connector root does not exist: {}", config.root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut default_excludes =
        vec!["**/.git/**".to_string(), "**/target/**".to_string(), "**/node_modules/**".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut items = Vec::new();
    let walker = WalkDir::new(&config.root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(&config.root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let updated_at = file_mtime(path);
        items.push(SourceItem {
            source_id: rel_str,
            title: path.file_name().map(|n| n.to_string_lossy().to_string()),
            updated_at: Some(updated_at),
            cursor_fragment: Some(updated_at.to_rfc3339()),
        });
    }

    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(items)
}

#[async_trait]
impl ConnectorAdapter for FilesystemConnector {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Filesystem
    }

    async fn validate(&self, config: &serde_json::Value) -> Result<()> {
        let parsed = parse_config(config)?;
        if !parsed.root.exists() {
            bail!("filesystem connector root does not exist: {}", parsed.root.display());
        }
        Ok(())
    }

    async fn list_delta(
        &self,
        config: &serde_json::Value,
        cursor: Option<&str>,
        _retry: RetryCallback<'_>,
    ) -> Result<Vec<SourceItem>> {
        let parsed = parse_config(config)?;
        let all = walk(&parsed)?;
        let Some(cursor) = cursor else { return Ok(all) };
        let Ok(since) = DateTime::parse_from_rfc3339(cursor) else { return Ok(all) };
        let since = since.with_timezone(&Utc);
        Ok(all.into_iter().filter(|item| item.updated_at.map(|t| t > since).unwrap_or(true)).collect())
    }

    async fn list_full(
        &self,
        config: &serde_json::Value,
        _retry: RetryCallback<'_>,
    ) -> Result<Vec<SourceItem>> {
        let parsed = parse_config(config)?;
        walk(&parsed)
    }

    async fn fetch_content(
        &self,
        config: &serde_json::Value,
        item: &SourceItem,
        _retry: RetryCallback<'_>,
    ) -> Result<FetchedContent> {
        let parsed = parse_config(config)?;
        let path = parsed.root.join(&item.source_id);
        let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

        let canonical_text = if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            pdf_extract::extract_text(&path)
                .with_context(|| format!("failed to extract text from {}", path.display()))?
        } else {
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?
        };

        Ok(FetchedContent {
            canonical_text,
            title: item.title.clone(),
            source_url: Some(format!("file://{}", path.display())),
            metadata: serde_json::json!({ "path": item.source_id }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn lists_included_files_and_skips_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("drafts")).unwrap();
        std::fs::File::create(dir.path().join("a.md")).unwrap().write_all(b"hello").unwrap();
        std::fs::File::create(dir.path().join("drafts/b.md")).unwrap().write_all(b"draft").unwrap();
        std::fs::File::create(dir.path().join("c.bin")).unwrap().write_all(b"\0\0").unwrap();

        let config = serde_json::json!({
            "root": dir.path(),
            "include_globs": ["**/*.md"],
            "exclude_globs": ["**/drafts/**"],
        });

        let adapter = FilesystemConnector;
        let noop_retry: RetryCallback<'_> = &|_, _, _, _| {};
        let items = adapter.list_full(&config, noop_retry).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id, "a.md");
    }

    #[tokio::test]
    async fn fetch_content_reads_text_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.md")).unwrap().write_all(b"hello world").unwrap();
        let config = serde_json::json!({ "root": dir.path() });

        let adapter = FilesystemConnector;
        let item = SourceItem {
            source_id: "a.md".to_string(),
            title: Some("a.md".to_string()),
            updated_at: None,
            cursor_fragment: None,
        };
        let noop_retry: RetryCallback<'_> = &|_, _, _, _| {};
        let content = adapter.fetch_content(&config, &item, noop_retry).await.unwrap();
        assert_eq!(content.canonical_text, "hello world");
    }

    #[tokio::test]
    async fn validate_rejects_missing_root() {
        let adapter = FilesystemConnector;
        let config = serde_json::json!({ "root": "/no/such/path/kbase-test" });
        assert!(adapter.validate(&config).await.is_err());
    }
}
