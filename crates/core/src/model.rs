//! Core data types: search spaces, connectors, documents, chunks, task log
//! entries, and LLM configs (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant-scoped container holding connectors, documents, and chat threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpace {
    pub id: i64,
    pub owner: String,
    pub citations_enabled: bool,
    pub qna_custom_instructions: Option<String>,
    pub llm_long_context: Option<String>,
    pub llm_fast: Option<String>,
    pub llm_strategic: Option<String>,
}

/// The enumerated connector type tag (spec.md §3, §9 tagged-variant design note).
///
/// Adding a source means adding a variant here plus an entry in the
/// adapter-factory method table (`kbase_engine::connectors::registry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Filesystem,
    Git,
    S3,
    Slack,
    Notion,
    GitHub,
    Jira,
    Confluence,
    BookStack,
    ClickUp,
    Airtable,
    Luma,
    GoogleCalendar,
    GoogleGmail,
    GoogleDrive,
    Discord,
    Teams,
    Linear,
    Elasticsearch,
    Webcrawler,
    Rss,
    Obsidian,
    Jellyfin,
    HomeAssistant,
}

impl ConnectorType {
    /// Whether this type supports multiple instances per search space
    /// (spec.md §3: "for non-OAuth types at most one instance per search space").
    pub fn allows_multiple_instances(&self) -> bool {
        matches!(
            self,
            ConnectorType::Slack
                | ConnectorType::Notion
                | ConnectorType::GitHub
                | ConnectorType::Jira
                | ConnectorType::Confluence
                | ConnectorType::GoogleCalendar
                | ConnectorType::GoogleGmail
                | ConnectorType::GoogleDrive
                | ConnectorType::Discord
                | ConnectorType::Teams
                | ConnectorType::Linear
                | ConnectorType::ClickUp
                | ConnectorType::Airtable
                | ConnectorType::Luma
        )
    }

    /// Whether date-range filters may extend into the future (spec.md §4.3
    /// date-range policy: calendar-like adapters permit future end-dates).
    pub fn is_calendar_like(&self) -> bool {
        matches!(self, ConnectorType::GoogleCalendar | ConnectorType::Luma)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Filesystem => "filesystem",
            ConnectorType::Git => "git",
            ConnectorType::S3 => "s3",
            ConnectorType::Slack => "slack",
            ConnectorType::Notion => "notion",
            ConnectorType::GitHub => "github",
            ConnectorType::Jira => "jira",
            ConnectorType::Confluence => "confluence",
            ConnectorType::BookStack => "bookstack",
            ConnectorType::ClickUp => "clickup",
            ConnectorType::Airtable => "airtable",
            ConnectorType::Luma => "luma",
            ConnectorType::GoogleCalendar => "google_calendar",
            ConnectorType::GoogleGmail => "google_gmail",
            ConnectorType::GoogleDrive => "google_drive",
            ConnectorType::Discord => "discord",
            ConnectorType::Teams => "teams",
            ConnectorType::Linear => "linear",
            ConnectorType::Elasticsearch => "elasticsearch",
            ConnectorType::Webcrawler => "webcrawler",
            ConnectorType::Rss => "rss",
            ConnectorType::Obsidian => "obsidian",
            ConnectorType::Jellyfin => "jellyfin",
            ConnectorType::HomeAssistant => "home_assistant",
        }
    }
}

/// Per-source configured instance (spec.md §3 Connector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorRecord {
    pub id: i64,
    pub search_space_id: i64,
    pub name: String,
    pub connector_type: ConnectorType,
    /// Opaque config map (credentials, selected scopes/folders/repos, options).
    /// Sensitive fields are stored encrypted; see `kbase_engine::crypto`.
    pub config: serde_json::Value,
    pub is_indexable: bool,
    pub periodic_indexing_enabled: bool,
    pub indexing_frequency_minutes: Option<u32>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub last_indexed_settings_hash: Option<String>,
    pub delta_cursor: Option<String>,
}

impl ConnectorRecord {
    /// spec.md §3 invariant: `periodic_indexing_enabled` implies `is_indexable`
    /// and a positive frequency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.periodic_indexing_enabled {
            if !self.is_indexable {
                anyhow::bail!(
                    "connector {} has periodic_indexing_enabled but is not indexable",
                    self.name
                );
            }
            match self.indexing_frequency_minutes {
                Some(m) if m > 0 => {}
                _ => anyhow::bail!(
                    "connector {} has periodic_indexing_enabled but no positive indexing_frequency_minutes",
                    self.name
                ),
            }
        }
        Ok(())
    }

    pub fn source_label(&self) -> String {
        format!("{}:{}", self.connector_type.as_str(), self.name)
    }
}

/// Canonical indexed unit (spec.md §3 Document).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub search_space_id: i64,
    pub connector_type: ConnectorType,
    pub connector_id: i64,
    pub source_id: String,
    pub title: Option<String>,
    pub content: String,
    /// Stable over same semantic content within a search space; UNIQUE.
    pub content_hash: String,
    /// Stable over same source-item across re-syncs; UNIQUE.
    pub unique_identifier_hash: String,
    pub metadata: serde_json::Value,
    pub summary_embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owning_user: Option<String>,
}

/// A subdivision of a Document's content with its own embedding (spec.md §3 Chunk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
}

/// Per-run durable record (spec.md §3 Task Log Entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Started,
    Progress,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub id: i64,
    pub task_name: String,
    pub source: String,
    pub search_space_id: i64,
    pub status: TaskStatus,
    pub message: String,
    /// Timestamped metadata blob (counters, error kind, etc).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Per-search-space LLM handle (spec.md §3 LLM Config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub id: i64,
    pub provider: String,
    pub model_name: String,
    pub credentials: String,
    pub api_base: Option<String>,
    pub language: Option<String>,
    pub parameters: serde_json::Value,
}

/// Role of a message in a chat thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// An ordered list of chat messages; research runs append an assistant
/// message carrying an event trace (spec.md §3, treated as an external
/// boundary the agent consumes/produces).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatThread {
    pub messages: Vec<ChatMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_validate_rejects_periodic_without_indexable() {
        let c = ConnectorRecord {
            id: 1,
            search_space_id: 1,
            name: "docs".into(),
            connector_type: ConnectorType::Filesystem,
            config: serde_json::json!({}),
            is_indexable: false,
            periodic_indexing_enabled: true,
            indexing_frequency_minutes: Some(30),
            last_indexed_at: None,
            next_scheduled_at: None,
            last_indexed_settings_hash: None,
            delta_cursor: None,
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn connector_validate_rejects_zero_frequency() {
        let c = ConnectorRecord {
            id: 1,
            search_space_id: 1,
            name: "docs".into(),
            connector_type: ConnectorType::Filesystem,
            config: serde_json::json!({}),
            is_indexable: true,
            periodic_indexing_enabled: true,
            indexing_frequency_minutes: Some(0),
            last_indexed_at: None,
            next_scheduled_at: None,
            last_indexed_settings_hash: None,
            delta_cursor: None,
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn source_label_format() {
        let c = ConnectorRecord {
            id: 1,
            search_space_id: 1,
            name: "docs".into(),
            connector_type: ConnectorType::Filesystem,
            config: serde_json::json!({}),
            is_indexable: true,
            periodic_indexing_enabled: false,
            indexing_frequency_minutes: None,
            last_indexed_at: None,
            next_scheduled_at: None,
            last_indexed_settings_hash: None,
            delta_cursor: None,
        };
        assert_eq!(c.source_label(), "filesystem:docs");
    }
}
