//! Chat-completion client, generalized from the teacher's
//! `embedding.rs::embed_openai` — same plain-`reqwest` + bearer-auth + JSON
//! body shape, applied to `/chat/completions` instead of `/embeddings`. The
//! teacher never calls a chat model itself; this is new code grounded in an
//! existing pattern rather than a fresh invention.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use kbase_core::model::LlmConfig;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Completes a chat turn given a system prompt and a flattened
    /// `(role, content)` history. Returns the full response text — this
    /// client does not stream tokens from the provider; callers that need
    /// a `text_chunk` stream re-chunk the returned string themselves
    /// (`graph::stream_prose`).
    async fn complete(&self, system_prompt: &str, messages: &[(String, String)]) -> Result<String>;
}

pub struct OpenAiCompatibleClient<'a> {
    pub config: &'a LlmConfig,
}

impl<'a> OpenAiCompatibleClient<'a> {
    pub fn new(config: &'a LlmConfig) -> Self {
        Self { config }
    }
}

fn chat_completions_url(api_base: Option<&str>) -> String {
    let base = api_base.unwrap_or("https://api.openai.com/v1");
    format!("{}/chat/completions", base.trim_end_matches('/'))
}

#[async_trait]
impl<'a> LlmClient for OpenAiCompatibleClient<'a> {
    async fn complete(&self, system_prompt: &str, messages: &[(String, String)]) -> Result<String> {
        let url = chat_completions_url(self.config.api_base.as_deref());

        let mut body_messages = vec![serde_json::json!({ "role": "system", "content": system_prompt })];
        for (role, content) in messages {
            body_messages.push(serde_json::json!({ "role": role, "content": content }));
        }

        let client = reqwest::Client::new();
        let resp = client
            .post(&url)
            .bearer_auth(&self.config.credentials)
            .json(&serde_json::json!({
                "model": self.config.model_name,
                "messages": body_messages,
                "parameters": self.config.parameters,
            }))
            .send()
            .await
            .context("chat completion request failed")?;

        if !resp.status().is_success() {
            bail!("llm request to {url} failed with HTTP {}", resp.status());
        }

        let json: serde_json::Value = resp.json().await.context("llm response was not valid json")?;
        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("llm response from {url} missing choices[0].message.content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash_from_api_base() {
        assert_eq!(chat_completions_url(Some("https://example.com/v1/")), "https://example.com/v1/chat/completions");
    }

    #[test]
    fn defaults_to_openai_when_no_api_base_configured() {
        assert_eq!(chat_completions_url(None), "https://api.openai.com/v1/chat/completions");
    }
}
