//! Concrete `EmbeddingProvider` implementations, grounded in the teacher's
//! `src/embedding/mod.rs`: same provider set (OpenAI, local fastembed/tract)
//! and retry/backoff shape, adapted to `kbase_core::embedding::EmbeddingProvider`'s
//! async-trait signature instead of the teacher's free-function dispatch.
//! Ollama is dropped — nothing in `EmbeddingConfig` names an alternate URL,
//! and `config::load_config` only ever validates `disabled | openai | local`.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use kbase_core::embedding::EmbeddingProvider;

use crate::config::EmbeddingConfig;

/// Instantiates the configured provider, or `None` for `"disabled"`
/// (callers thread `Option<Arc<dyn EmbeddingProvider>>` everywhere rather
/// than a provider that always errors).
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Option<Box<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Box::new(OpenAiEmbeddingProvider::new(config)?))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Some(Box::new(LocalEmbeddingProvider::new(config)?))),
        #[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
        "local" => Ok(Some(Box::new(LocalEmbeddingProvider::new(config)?))),
        #[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
        "local" => bail!(
            "local embedding provider requires one of: --features local-embeddings-fastembed, --features local-embeddings-tract"
        ),
        other => bail!("unknown embedding provider: {other}"),
    }
}

pub struct OpenAiEmbeddingProvider {
    model: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| anyhow::anyhow!("embedding.model required for openai provider"))?;
        let dims = config.dims.ok_or_else(|| anyhow::anyhow!("embedding.dims required for openai provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self { model, dims, max_retries: config.max_retries, timeout_secs: config.timeout_secs })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_openai(&self.model, self.max_retries, self.timeout_secs, texts).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Retry strategy matches the teacher's: 429/5xx/network errors retry with
/// exponential backoff (1s, 2s, 4s, ... capped at 32s); any other 4xx fails
/// immediately.
async fn embed_openai(model: &str, max_retries: u32, timeout_secs: u64, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let client = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
    let body = serde_json::json!({ "model": model, "input": texts });

    let mut last_err = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_embeddings(&json);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("OpenAI embeddings API error {status}: {text}"));
                    continue;
                }
                let text = response.text().await.unwrap_or_default();
                bail!("OpenAI embeddings API error {status}: {text}");
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding request failed after retries")))
}

fn parse_openai_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| anyhow::anyhow!("missing data array in OpenAI embeddings response"))?;
    data.iter()
        .map(|item| {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow::anyhow!("missing embedding array in OpenAI response item"))?;
            Ok(embedding.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        })
        .collect()
}

#[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
pub struct LocalEmbeddingProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
}

#[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config.model.clone().unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let dims = config.dims.unwrap_or_else(|| default_dims_for(&model_name));
        Ok(Self { model_name, dims, batch_size: config.batch_size })
    }
}

#[cfg(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"))]
fn default_dims_for(model_name: &str) -> usize {
    match model_name {
        "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small" => 384,
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = fastembed_model(&self.model_name)?;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut embedder = fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(model))
                .map_err(|e| anyhow::anyhow!("failed to initialize local embedding model: {e}"))?;
            embedder.embed(texts, Some(batch_size)).map_err(|e| anyhow::anyhow!("local embedding failed: {e}"))
        })
        .await?
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!("unknown local embedding model: '{other}'"),
    }
}

#[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!(
            "local-embeddings-tract provider is not wired up in this build; \
             enable the local-embeddings-fastembed feature instead"
        )
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_provider_builds_nothing() {
        let config = EmbeddingConfig { provider: "disabled".to_string(), ..EmbeddingConfig::default() };
        assert!(build_embedder(&config).unwrap().is_none());
    }

    #[test]
    fn openai_provider_requires_model_and_dims() {
        let config = EmbeddingConfig { provider: "openai".to_string(), ..EmbeddingConfig::default() };
        assert!(build_embedder(&config).is_err());
    }

    #[test]
    fn parses_openai_embeddings_response() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2, 0.3] },
                { "embedding": [0.4, 0.5, 0.6] },
            ]
        });
        let parsed = parse_openai_embeddings(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].len(), 3);
    }
}
