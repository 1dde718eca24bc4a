//! Amazon S3 connector, ported from the teacher's `connector_s3.rs`: hand-
//! rolled AWS SigV4 signing over `hmac`+`sha2` (no `aws-lc-sys` C
//! dependency), `ListObjectsV2` pagination, and a minimal non-nested XML
//! tag extractor — generalized to the list/fetch split.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use kbase_core::connector::{ConnectorAdapter, FetchedContent, SourceItem};
use kbase_core::error::RetryCallback;
use kbase_core::model::ConnectorType;

type HmacSha256 = Hmac<Sha256>;

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3ConnectorConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        Ok(Self {
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID")
                .context("AWS_ACCESS_KEY_ID environment variable not set")?,
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY environment variable not set")?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

struct S3Object {
    key: String,
    last_modified: i64,
    etag: String,
    size: i64,
}

pub struct S3Connector;

fn parse_config(config: &serde_json::Value) -> Result<S3ConnectorConfig> {
    serde_json::from_value(config.clone()).context("invalid s3 connector config")
}

fn s3_host(config: &S3ConnectorConfig) -> String {
    if let Some(endpoint) = &config.endpoint_url {
        endpoint.trim_start_matches("https://").trim_start_matches("http://").trim_end_matches('/').to_string()
    } else {
        format!("{}.s3.{}.amazonaws.com", config.bucket, config.region)
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{byte:02X}")),
        }
    }
    result
}

fn sigv4_headers(
    config: &S3ConnectorConfig,
    creds: &AwsCredentials,
    method: &str,
    canonical_uri: &str,
    canonical_querystring: &str,
) -> (String, String, String) {
    let host = s3_host(config);
    let now = Utc::now();
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(b"");

    let mut headers = vec![
        ("host".to_string(), host.clone()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");
    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{canonical_querystring}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );

    let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", config.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, &config.region, "s3");
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        creds.access_key_id
    );

    (authorization, amz_date, payload_hash)
}

async fn list_objects(config: &S3ConnectorConfig, creds: &AwsCredentials) -> Result<Vec<S3Object>> {
    let client = reqwest::Client::new();
    let mut objects = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let mut query_params =
            vec![("list-type".to_string(), "2".to_string()), ("max-keys".to_string(), "1000".to_string())];
        if !config.prefix.is_empty() {
            query_params.push(("prefix".to_string(), config.prefix.clone()));
        }
        if let Some(token) = &continuation_token {
            query_params.push(("continuation-token".to_string(), token.clone()));
        }
        query_params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = query_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let (authorization, amz_date, payload_hash) =
            sigv4_headers(config, creds, "GET", "/", &canonical_querystring);

        let host = s3_host(config);
        let full_url = format!("https://{host}/?{canonical_querystring}");
        let mut req = client
            .get(&full_url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(token) = &creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("failed to list s3://{}/{}", config.bucket, config.prefix))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("S3 ListObjectsV2 failed (HTTP {status}): {}", body.chars().take(500).collect::<String>());
        }

        let xml_body = resp.text().await?;
        let (batch, is_truncated, next_token) = parse_list_objects_response(&xml_body)?;
        objects.extend(batch);

        if is_truncated {
            continuation_token = next_token;
        } else {
            break;
        }
    }

    Ok(objects)
}

async fn download_object(config: &S3ConnectorConfig, creds: &AwsCredentials, key: &str) -> Result<String> {
    let client = reqwest::Client::new();
    let host = s3_host(config);
    let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
    let canonical_uri = format!("/{encoded_key}");
    let (authorization, amz_date, payload_hash) = sigv4_headers(config, creds, "GET", &canonical_uri, "");

    let url = format!("https://{host}{canonical_uri}");
    let mut req = client
        .get(&url)
        .header("Authorization", &authorization)
        .header("x-amz-content-sha256", &payload_hash)
        .header("x-amz-date", &amz_date);
    if let Some(token) = &creds.session_token {
        req = req.header("x-amz-security-token", token);
    }

    let resp = req.send().await.with_context(|| format!("failed to get s3://{}/{key}", config.bucket))?;
    if !resp.status().is_success() {
        bail!("S3 GetObject failed (HTTP {}) for key '{key}'", resp.status());
    }
    let bytes = resp.bytes().await?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)?;
    let value_start = start + open.len();
    let end = xml[value_start..].find(&close)?;
    Some(xml[value_start..value_start + end].to_string())
}

fn parse_list_objects_response(xml: &str) -> Result<(Vec<S3Object>, bool, Option<String>)> {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated").map(|v| v == "true").unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else { break };
        let block = &remaining[block_start..block_start + end];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        if !key.is_empty() && !key.ends_with('/') {
            let last_modified = extract_xml_value(block, "LastModified")
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.timestamp())
                .unwrap_or(0);
            let etag = extract_xml_value(block, "ETag").unwrap_or_default().trim_matches('"').to_string();
            let size = extract_xml_value(block, "Size").and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
            objects.push(S3Object { key, last_modified, etag, size });
        }

        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    Ok((objects, is_truncated, next_token))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn relative_key(config: &S3ConnectorConfig, key: &str) -> String {
    if config.prefix.is_empty() {
        key.to_string()
    } else {
        let prefix = config.prefix.trim_end_matches('/');
        key.strip_prefix(prefix).map(|s| s.trim_start_matches('/').to_string()).unwrap_or_else(|| key.to_string())
    }
}

#[async_trait]
impl ConnectorAdapter for S3Connector {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::S3
    }

    async fn validate(&self, config: &serde_json::Value) -> Result<()> {
        let parsed = parse_config(config)?;
        if parsed.bucket.trim().is_empty() {
            bail!("s3 connector requires a non-empty bucket");
        }
        AwsCredentials::from_env()?;
        Ok(())
    }

    async fn list_delta(
        &self,
        config: &serde_json::Value,
        _cursor: Option<&str>,
        retry: RetryCallback<'_>,
    ) -> Result<Vec<SourceItem>> {
        // S3 has no native delta cursor; every sync relists, and the
        // upsert's content_hash comparison does the change detection.
        self.list_full(config, retry).await
    }

    async fn list_full(
        &self,
        config: &serde_json::Value,
        _retry: RetryCallback<'_>,
    ) -> Result<Vec<SourceItem>> {
        let parsed = parse_config(config)?;
        let creds = AwsCredentials::from_env()?;

        let include_set = build_globset(&parsed.include_globs)?;
        let mut default_excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
        default_excludes.extend(parsed.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let objects = list_objects(&parsed, &creds).await?;
        let mut items = Vec::new();
        for obj in objects {
            let rel_key = relative_key(&parsed, &obj.key);
            if exclude_set.is_match(&rel_key) || !include_set.is_match(&rel_key) {
                continue;
            }
            let updated_at = chrono::DateTime::from_timestamp(obj.last_modified, 0);
            items.push(SourceItem {
                source_id: obj.key.clone(),
                title: Some(obj.key.rsplit('/').next().unwrap_or(&obj.key).to_string()),
                updated_at,
                cursor_fragment: Some(obj.etag),
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
        let creds = AwsCredentials::from_env()?;
        let body = download_object(&parsed, &creds, &item.source_id).await?;

        Ok(FetchedContent {
            canonical_text: body,
            title: item.title.clone(),
            source_url: Some(format!("s3://{}/{}", parsed.bucket, item.source_id)),
            metadata: serde_json::json!({ "bucket": parsed.bucket }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_objects_response_with_pagination_token() {
        let xml = r#"
        <ListBucketResult>
            <IsTruncated>true</IsTruncated>
            <NextContinuationToken>abc123</NextContinuationToken>
            <Contents>
                <Key>docs/a.md</Key>
                <LastModified>2024-01-01T00:00:00.000Z</LastModified>
                <ETag>"deadbeef"</ETag>
                <Size>42</Size>
            </Contents>
            <Contents>
                <Key>docs/folder/</Key>
                <LastModified>2024-01-01T00:00:00.000Z</LastModified>
                <ETag>"0"</ETag>
                <Size>0</Size>
            </Contents>
        </ListBucketResult>
        "#;
        let (objects, truncated, token) = parse_list_objects_response(xml).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "docs/a.md");
        assert_eq!(objects[0].etag, "deadbeef");
        assert!(truncated);
        assert_eq!(token, Some("abc123".to_string()));
    }

    #[test]
    fn uri_encode_preserves_unreserved_characters() {
        assert_eq!(uri_encode("abc-_.~123"), "abc-_.~123");
        assert_eq!(uri_encode("a/b"), "a%2Fb");
    }

    #[test]
    fn relative_key_strips_configured_prefix() {
        let config = S3ConnectorConfig {
            bucket: "b".into(),
            prefix: "engineering/".into(),
            region: default_region(),
            include_globs: default_include_globs(),
            exclude_globs: vec![],
            endpoint_url: None,
        };
        assert_eq!(relative_key(&config, "engineering/runbooks/a.md"), "runbooks/a.md");
    }
}
