//! Static-URL-list web crawler connector. Not present in the teacher repo;
//! grounded in `original_source`'s `webcrawler_indexer.py` (`INITIAL_URLS`
//! connector config, one document per crawled page) with the Firecrawl
//! fallback path dropped — no Firecrawl crate is in the retrieval pack, so
//! this fetches and extracts pages directly via `reqwest`+`scraper`, which
//! is what the original falls back to when no `FIRECRAWL_API_KEY` is set.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;

use kbase_core::connector::{ConnectorAdapter, FetchedContent, SourceItem};
use kbase_core::error::RetryCallback;
use kbase_core::model::ConnectorType;

#[derive(Debug, Deserialize, Clone)]
pub struct WebcrawlerConnectorConfig {
    pub initial_urls: Vec<String>,
}

pub struct WebcrawlerConnector;

fn parse_config(config: &serde_json::Value) -> Result<WebcrawlerConnectorConfig> {
    serde_json::from_value(config.clone()).context("invalid webcrawler connector config")
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document.select(&selector).next().map(|el| el.text().collect::<String>().trim().to_string())
}

/// Strips script/style nodes and walks remaining text nodes, grouping
/// consecutive text into paragraphs the way the original's readability
/// pass collapses a DOM into plain prose.
fn html_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").unwrap();
    let skip_selector = Selector::parse("script, style, nav, footer").unwrap();

    let skip_texts: std::collections::HashSet<_> =
        document.select(&skip_selector).flat_map(|el| el.text().map(|t| t.to_string())).collect();

    let mut paragraphs = Vec::new();
    if let Some(body) = document.select(&body_selector).next() {
        let mut current = String::new();
        for text in body.text() {
            if skip_texts.contains(text) {
                continue;
            }
            let trimmed = text.trim();
            if trimmed.is_empty() {
                if !current.trim().is_empty() {
                    paragraphs.push(current.trim().to_string());
                    current.clear();
                }
            } else {
                current.push_str(trimmed);
                current.push(' ');
            }
        }
        if !current.trim().is_empty() {
            paragraphs.push(current.trim().to_string());
        }
    }
    paragraphs.join("\n\n")
}

#[async_trait]
impl ConnectorAdapter for WebcrawlerConnector {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Webcrawler
    }

    async fn validate(&self, config: &serde_json::Value) -> Result<()> {
        let parsed = parse_config(config)?;
        if parsed.initial_urls.is_empty() {
            bail!("webcrawler connector requires at least one url in initial_urls");
        }
        Ok(())
    }

    async fn list_delta(
        &self,
        config: &serde_json::Value,
        _cursor: Option<&str>,
        retry: RetryCallback<'_>,
    ) -> Result<Vec<SourceItem>> {
        // A static URL list carries no last-modified signal of its own;
        // re-crawl every configured URL and let content_hash detect changes.
        self.list_full(config, retry).await
    }

    async fn list_full(
        &self,
        config: &serde_json::Value,
        _retry: RetryCallback<'_>,
    ) -> Result<Vec<SourceItem>> {
        let parsed = parse_config(config)?;
        let mut items: Vec<SourceItem> = parsed
            .initial_urls
            .iter()
            .map(|url| SourceItem {
                source_id: url.clone(),
                title: None,
                updated_at: None,
                cursor_fragment: None,
            })
            .collect();
        items.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(items)
    }

    async fn fetch_content(
        &self,
        _config: &serde_json::Value,
        item: &SourceItem,
        _retry: RetryCallback<'_>,
    ) -> Result<FetchedContent> {
        let client = reqwest::Client::new();
        let resp = client
            .get(&item.source_id)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", item.source_id))?;
        if !resp.status().is_success() {
            bail!("crawl of {} failed with HTTP {}", item.source_id, resp.status());
        }
        let html = resp.text().await?;
        let document = Html::parse_document(&html);
        let title = extract_title(&document);
        let canonical_text = html_to_markdown(&html);

        Ok(FetchedContent {
            canonical_text,
            title: title.clone(),
            source_url: Some(item.source_id.clone()),
            metadata: serde_json::json!({ "url": item.source_id, "title": title }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_markdown_strips_scripts_and_joins_paragraphs() {
        let html = r#"
        <html><body>
            <script>ignored();</script>
            <p>First paragraph.</p>
            <p>Second paragraph.</p>
        </body></html>
        "#;
        let text = html_to_markdown(html);
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second paragraph."));
        assert!(!text.contains("ignored();"));
    }

    #[test]
    fn extract_title_reads_title_tag() {
        let document = Html::parse_document("<html><head><title>Hello</title></head><body></body></html>");
        assert_eq!(extract_title(&document), Some("Hello".to_string()));
    }
}
