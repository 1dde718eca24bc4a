//! Typed events streamed to the `/chat` client (spec.md §6 event table).

use serde::Serialize;

use super::state::FurtherQuestion;

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceGroup {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sources: Vec<SourceRef>,
}

/// spec.md §6: `terminal_info_delta` / `sources_delta` / `text_chunk` /
/// `further_questions_delta` / `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    TerminalInfoDelta(String),
    SourcesDelta(Vec<SourceGroup>),
    TextChunk(String),
    FurtherQuestionsDelta(Vec<FurtherQuestion>),
    /// Non-fatal warning, e.g. malformed further-questions JSON (spec.md
    /// §4.7: "never failure"). A fatal error instead terminates the stream
    /// by returning `Err` from the node and dropping the sender.
    Error(String),
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<AgentEvent>;

pub fn emit(tx: &EventSender, event: AgentEvent) {
    // The receiver only disappears once the client disconnects, at which
    // point there is nothing useful to do with a send failure.
    let _ = tx.send(event);
}
