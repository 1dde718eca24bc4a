//! Slack connector. Not present in the teacher repo; grounded in
//! `original_source`'s `slack_indexer.py` — `SLACK_BOT_TOKEN` connector
//! config, `conversations.list`/`conversations.history` pagination, per-
//! message documents keyed by `{channel_id}_{message_ts}`, and the
//! METADATA/CONTENT markdown section format used for the document body.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use kbase_core::connector::{ConnectorAdapter, FetchedContent, SourceItem};
use kbase_core::error::RetryCallback;
use kbase_core::model::ConnectorType;

const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConnectorConfig {
    pub slack_bot_token: String,
}

pub struct SlackConnector;

fn parse_config(config: &serde_json::Value) -> Result<SlackConnectorConfig> {
    serde_json::from_value(config.clone()).context("invalid slack connector config")
}

fn ts_to_datetime(ts: &str) -> Option<DateTime<Utc>> {
    let secs: f64 = ts.parse().ok()?;
    DateTime::from_timestamp(secs as i64, 0)
}

async fn slack_get(client: &reqwest::Client, token: &str, method: &str, params: &[(&str, &str)]) -> Result<Value> {
    let url = format!("{SLACK_API_BASE}/{method}");
    let resp = client.get(&url).bearer_auth(token).query(params).send().await?;
    let body: Value = resp.json().await?;
    if body.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
        bail!("slack api {method} failed: {error}");
    }
    Ok(body)
}

async fn list_channels(client: &reqwest::Client, token: &str) -> Result<Vec<(String, String)>> {
    let mut channels = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut params = vec![("types", "public_channel,private_channel"), ("limit", "200")];
        if let Some(c) = &cursor {
            params.push(("cursor", c.as_str()));
        }
        let body = slack_get(client, token, "conversations.list", &params).await?;
        for chan in body.get("channels").and_then(Value::as_array).into_iter().flatten() {
            let is_member = chan.get("is_member").and_then(Value::as_bool).unwrap_or(false);
            let is_private = chan.get("is_private").and_then(Value::as_bool).unwrap_or(false);
            if is_private && !is_member {
                continue;
            }
            let id = chan.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let name = chan.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            if !id.is_empty() {
                channels.push((id, name));
            }
        }
        cursor = body
            .get("response_metadata")
            .and_then(|m| m.get("next_cursor"))
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if cursor.is_none() {
            break;
        }
    }
    Ok(channels)
}

async fn channel_history(client: &reqwest::Client, token: &str, channel_id: &str) -> Result<Vec<Value>> {
    let mut messages = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut params = vec![("channel", channel_id), ("limit", "200")];
        if let Some(c) = &cursor {
            params.push(("cursor", c.as_str()));
        }
        let body = slack_get(client, token, "conversations.history", &params).await?;
        for msg in body.get("messages").and_then(Value::as_array).into_iter().flatten() {
            let subtype = msg.get("subtype").and_then(Value::as_str);
            if matches!(subtype, Some("channel_join") | Some("channel_leave")) {
                continue;
            }
            messages.push(msg.clone());
        }
        cursor = body
            .get("response_metadata")
            .and_then(|m| m.get("next_cursor"))
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if cursor.is_none() || !body.get("has_more").and_then(Value::as_bool).unwrap_or(false) {
            break;
        }
    }
    Ok(messages)
}

fn format_message_markdown(channel_name: &str, channel_id: &str, msg: &Value) -> String {
    let ts = msg.get("ts").and_then(Value::as_str).unwrap_or("unknown");
    let timestamp = ts_to_datetime(ts).map(|d| d.to_rfc3339()).unwrap_or_else(|| ts.to_string());
    let user = msg.get("user").and_then(Value::as_str).unwrap_or("Unknown User");
    let text = msg.get("text").and_then(Value::as_str).unwrap_or("");

    format!(
        "## METADATA\n\
         CHANNEL_NAME: {channel_name}\n\
         CHANNEL_ID: {channel_id}\n\
         MESSAGE_TIMESTAMP: {timestamp}\n\
         MESSAGE_USER: {user}\n\n\
         ## CONTENT\n\
         FORMAT: markdown\n\
         TEXT_START\n\
         {text}\n\
         TEXT_END\n"
    )
}

#[async_trait]
impl ConnectorAdapter for SlackConnector {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Slack
    }

    async fn validate(&self, config: &serde_json::Value) -> Result<()> {
        let parsed = parse_config(config)?;
        if parsed.slack_bot_token.trim().is_empty() {
            bail!("slack connector requires slack_bot_token");
        }
        let client = reqwest::Client::new();
        slack_get(&client, &parsed.slack_bot_token, "auth.test", &[]).await?;
        Ok(())
    }

    async fn list_delta(
        &self,
        config: &serde_json::Value,
        cursor: Option<&str>,
        retry: RetryCallback<'_>,
    ) -> Result<Vec<SourceItem>> {
        let all = self.list_full(config, retry).await?;
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
        let client = reqwest::Client::new();
        let channels = list_channels(&client, &parsed.slack_bot_token).await?;

        let mut items = Vec::new();
        for (channel_id, channel_name) in &channels {
            let messages = channel_history(&client, &parsed.slack_bot_token, channel_id).await?;
            for msg in &messages {
                let ts = msg.get("ts").and_then(Value::as_str).unwrap_or_default().to_string();
                if ts.is_empty() {
                    continue;
                }
                let updated_at = ts_to_datetime(&ts);
                items.push(SourceItem {
                    source_id: format!("{channel_id}_{ts}"),
                    title: Some(format!("#{channel_name}")),
                    updated_at,
                    cursor_fragment: updated_at.map(|d| d.to_rfc3339()),
                });
            }
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
        let Some((channel_id, ts)) = item.source_id.split_once('_') else {
            bail!("malformed slack source_id: {}", item.source_id);
        };
        let client = reqwest::Client::new();
        let body = slack_get(
            &client,
            &parsed.slack_bot_token,
            "conversations.history",
            &[("channel", channel_id), ("latest", ts), ("inclusive", "true"), ("limit", "1")],
        )
        .await?;
        let msg = body
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|m| m.first())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("slack message {ts} no longer present in channel {channel_id}"))?;

        let channel_name = item.title.as_deref().unwrap_or(channel_id).trim_start_matches('#').to_string();
        let canonical_text = format_message_markdown(&channel_name, channel_id, &msg);

        Ok(FetchedContent {
            canonical_text,
            title: item.title.clone(),
            source_url: Some(format!("slack://channel/{channel_id}/{ts}")),
            metadata: serde_json::json!({ "channel_id": channel_id, "channel_name": channel_name, "ts": ts }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_message_markdown_includes_metadata_and_content_sections() {
        let msg = serde_json::json!({ "ts": "1700000000.000100", "user": "U123", "text": "hello" });
        let markdown = format_message_markdown("general", "C123", &msg);
        assert!(markdown.contains("CHANNEL_NAME: general"));
        assert!(markdown.contains("CHANNEL_ID: C123"));
        assert!(markdown.contains("TEXT_START\nhello\nTEXT_END"));
    }

    #[test]
    fn ts_to_datetime_parses_slack_timestamp() {
        let dt = ts_to_datetime("1700000000.000100").unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }
}
