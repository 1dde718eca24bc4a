//! Git repository connector, ported from the teacher's `connector_git.rs`
//! (shells out to the `git` binary for clone/fetch/reset and `git log` for
//! per-file metadata) and generalized to the list/fetch split.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

use kbase_core::connector::{ConnectorAdapter, FetchedContent, SourceItem};
use kbase_core::error::RetryCallback;
use kbase_core::model::ConnectorType;

fn default_branch() -> String {
    "main".to_string()
}
fn default_root() -> String {
    ".".to_string()
}
fn default_true() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConnectorConfig {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub shallow: bool,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

pub struct GitConnector {
    /// Where cloned repos are cached, falls back to a `.git-cache` sibling
    /// of the SQLite database when a connector doesn't set `cache_dir`.
    default_cache_root: PathBuf,
}

impl GitConnector {
    pub fn new(default_cache_root: PathBuf) -> Self {
        Self { default_cache_root }
    }

    fn cache_dir(&self, config: &GitConnectorConfig) -> PathBuf {
        config.cache_dir.clone().unwrap_or_else(|| {
            self.default_cache_root.join(short_hash(&config.url))
        })
    }

    fn sync_repo(&self, config: &GitConnectorConfig) -> Result<PathBuf> {
        let cache_dir = self.cache_dir(config);
        if cache_dir.join(".git").exists() {
            git_pull(&cache_dir, &config.branch)?;
        } else {
            git_clone(&config.url, &config.branch, config.shallow, &cache_dir)?;
        }
        Ok(cache_dir)
    }
}

fn short_hash(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hasher.finalize().iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

fn git_clone(url: &str, branch: &str, shallow: bool, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create cache directory: {}", dest.display()))?;

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--branch", branch, "--single-branch"]);
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(url).arg(dest);

    let output = cmd.output().context("failed to execute 'git clone'. Is git installed?")?;
    if !output.status.success() {
        bail!("git clone failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(())
}

fn git_pull(repo_dir: &Path, branch: &str) -> Result<()> {
    let output = Command::new("git")
        .args(["fetch", "origin", branch])
        .current_dir(repo_dir)
        .output()
        .context("failed to execute 'git fetch'")?;
    if !output.status.success() {
        bail!("git fetch failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }

    let remote_ref = format!("origin/{branch}");
    let output = Command::new("git")
        .args(["reset", "--hard", &remote_ref])
        .current_dir(repo_dir)
        .output()
        .context("failed to execute 'git reset'")?;
    if !output.status.success() {
        bail!("git reset failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(())
}

fn git_head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .context("failed to execute 'git rev-parse'")?;
    if !output.status.success() {
        bail!("git rev-parse failed");
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn build_globset(patterns: &[String]) -> Result<globset::GlobSet> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(globset::Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn web_url(repo_url: &str, sha: &str, path: &str) -> String {
    let normalized = repo_url.trim_end_matches(".git");
    if let Some(rest) = normalized.strip_prefix("git@github.com:") {
        return format!("https://github.com/{rest}/blob/{sha}/{path}");
    }
    if let Some(rest) = normalized.strip_prefix("https://github.com/") {
        return format!("https://github.com/{rest}/blob/{sha}/{path}");
    }
    if let Some(rest) = normalized.strip_prefix("git@gitlab.com:") {
        return format!("https://gitlab.com/{rest}/-/blob/{sha}/{path}");
    }
    if let Some(rest) = normalized.strip_prefix("https://gitlab.com/") {
        return format!("https://gitlab.com/{rest}/-/blob/{sha}/{path}");
    }
    format!("git://{normalized}/{path}")
}

fn parse_config(config: &serde_json::Value) -> Result<GitConnectorConfig> {
    serde_json::from_value(config.clone()).context("invalid git connector config")
}

#[async_trait]
impl ConnectorAdapter for GitConnector {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Git
    }

    async fn validate(&self, config: &serde_json::Value) -> Result<()> {
        let parsed = parse_config(config)?;
        if parsed.url.trim().is_empty() {
            bail!("git connector requires a non-empty url");
        }
        Ok(())
    }

    async fn list_delta(
        &self,
        config: &serde_json::Value,
        cursor: Option<&str>,
        retry: RetryCallback<'_>,
    ) -> Result<Vec<SourceItem>> {
        let parsed = parse_config(config)?;
        let all = self.list_full(config, retry).await?;
        let Some(previous_sha) = cursor else { return Ok(all) };
        let cache_dir = self.cache_dir(&parsed);
        let head_sha = git_head_sha(&cache_dir).unwrap_or_default();
        if head_sha == previous_sha {
            return Ok(Vec::new());
        }
        Ok(all)
    }

    async fn list_full(
        &self,
        config: &serde_json::Value,
        _retry: RetryCallback<'_>,
    ) -> Result<Vec<SourceItem>> {
        let parsed = parse_config(config)?;
        let cache_dir = self.sync_repo(&parsed)?;
        let head_sha = git_head_sha(&cache_dir).unwrap_or_else(|_| "unknown".to_string());

        let scan_root =
            if parsed.root == "." { cache_dir.clone() } else { cache_dir.join(&parsed.root) };
        if !scan_root.exists() {
            bail!("git connector root '{}' does not exist in repo {}", parsed.root, parsed.url);
        }

        let include_set = build_globset(&parsed.include_globs)?;
        let mut default_excludes =
            vec!["**/.git/**".to_string(), "**/target/**".to_string(), "**/node_modules/**".to_string()];
        default_excludes.extend(parsed.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let mut items = Vec::new();
        for entry in WalkDir::new(&scan_root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&scan_root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();
            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            items.push(SourceItem {
                source_id: rel_str,
                title: path.file_name().map(|n| n.to_string_lossy().to_string()),
                updated_at: None,
                cursor_fragment: Some(head_sha.clone()),
            });
        }

        items.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(items)
    }

    async fn fetch_content(
        &self,
        config: &serde_json::Value,
        item: &SourceItem,
        _retry: RetryCallback<'_>,
    ) -> Result<FetchedContent> {
        let parsed = parse_config(config)?;
        let cache_dir = self.cache_dir(&parsed);
        let scan_root =
            if parsed.root == "." { cache_dir.clone() } else { cache_dir.join(&parsed.root) };
        let path = scan_root.join(&item.source_id);
        let head_sha = git_head_sha(&cache_dir).unwrap_or_else(|_| "unknown".to_string());

        let canonical_text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        Ok(FetchedContent {
            canonical_text,
            title: item.title.clone(),
            source_url: Some(web_url(&parsed.url, &head_sha, &item.source_id)),
            metadata: serde_json::json!({ "git_sha": head_sha, "repo_url": parsed.url }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_url_generates_github_blob_link() {
        let url = web_url("https://github.com/acme/platform.git", "abc123", "docs/a.md");
        assert_eq!(url, "https://github.com/acme/platform/blob/abc123/docs/a.md");
    }

    #[test]
    fn web_url_generates_github_ssh_blob_link() {
        let url = web_url("git@github.com:acme/platform.git", "abc123", "docs/a.md");
        assert_eq!(url, "https://github.com/acme/platform/blob/abc123/docs/a.md");
    }

    #[tokio::test]
    async fn validate_rejects_empty_url() {
        let connector = GitConnector::new(std::env::temp_dir());
        let config = serde_json::json!({ "url": "" });
        assert!(connector.validate(&config).await.is_err());
    }
}
