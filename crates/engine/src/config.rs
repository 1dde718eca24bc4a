//! Configuration parsing and validation.
//!
//! kbase is configured via a TOML file (default: `config/kbase.toml`). The
//! config covers ambient infrastructure only — database path, chunking
//! parameters, embedding provider settings, retrieval tuning, scheduler
//! concurrency, server bind address, and the token-encryption key source.
//! Per-connector instance settings (credentials, selected folders/repos,
//! OAuth scopes) are NOT here: they live in `connectors.config` rows in the
//! database, set through the HTTP API, since they are per-search-space and
//! created at runtime rather than fixed at process start.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f32,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// Max tokens reserved for retrieved context, independent of the LLM's
    /// full window, so room remains for the system prompt and conversation
    /// history (spec.md §4.2 packer consumer).
    #[serde(default = "default_context_window")]
    pub context_window_tokens: usize,
}

fn default_hybrid_alpha() -> f32 {
    0.5
}
fn default_candidate_k() -> usize {
    80
}
fn default_final_limit() -> usize {
    12
}
fn default_context_window() -> usize {
    8000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            context_window_tokens: default_context_window(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// C5 scheduling knobs (spec.md §5 Concurrency & Resource Model). Built
/// fresh for kbase — the teacher has no scheduler.
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_batch_commit_size")]
    pub batch_commit_size: usize,
}

fn default_max_concurrent_runs() -> usize {
    4
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_batch_commit_size() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            poll_interval_secs: default_poll_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            batch_commit_size: default_batch_commit_size(),
        }
    }
}

/// Source of the key used by `crypto::encrypt_field`/`decrypt_field`
/// (spec.md §9 Design Note: token encryption).
#[derive(Debug, Deserialize, Clone)]
pub struct CryptoConfig {
    #[serde(default = "default_key_env_var")]
    pub key_env_var: String,
}

fn default_key_env_var() -> String {
    "KBASE_ENCRYPTION_KEY".to_string()
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self { key_env_var: default_key_env_var() }
    }
}

pub fn load_config(path: &std::path::Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.scheduler.max_concurrent_runs == 0 {
        anyhow::bail!("scheduler.max_concurrent_runs must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or local.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let f = write_temp(
            r#"
            [db]
            path = "kbase.db"
            [chunking]
            max_tokens = 0
            [retrieval]
            [server]
            bind = "127.0.0.1:8080"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_out_of_range_alpha() {
        let f = write_temp(
            r#"
            [db]
            path = "kbase.db"
            [chunking]
            max_tokens = 500
            [retrieval]
            hybrid_alpha = 1.5
            [server]
            bind = "127.0.0.1:8080"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn accepts_minimal_valid_config() {
        let f = write_temp(
            r#"
            [db]
            path = "kbase.db"
            [chunking]
            max_tokens = 500
            [retrieval]
            [server]
            bind = "127.0.0.1:8080"
            "#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.retrieval.hybrid_alpha, 0.5);
        assert_eq!(cfg.scheduler.max_concurrent_runs, 4);
    }
}
