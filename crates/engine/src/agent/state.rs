//! Research-agent state (spec.md §4.7), threaded through every graph node
//! and mirrored into the `research_runs.state_json` column so a run with
//! `resumable = true` can pick back up from its last completed node.

use serde::{Deserialize, Serialize};

use kbase_core::model::{ChatMessage, LlmConfig};

use crate::retrieval::RetrievedChunk;

/// spec.md §6: `research_mode ∈ {QNA, GENERAL, DEEP, DEEPER}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResearchMode {
    Qna,
    General,
    Deep,
    Deeper,
}

/// spec.md §6: `search_mode ∈ {CHUNKS, DOCUMENTS}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMode {
    Chunks,
    Documents,
}

/// One entry of `write_answer_outline`'s strict schema:
/// `{answer_outline: [{section_id, section_title, questions: [2..5]}]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineSection {
    pub section_id: u32,
    pub section_title: String,
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FurtherQuestion {
    pub id: u32,
    pub question: String,
}

/// A completed section's prose plus the retrieval set it was grounded on,
/// remembered so `generate_further_questions` can reference what was
/// actually retrieved (spec.md §4.7: "each section's retrieval set is
/// remembered for follow-up generation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrittenSection {
    pub section_id: u32,
    pub section_title: String,
    pub prose: String,
    pub retrieved: Vec<RetrievedChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    pub thread_id: i64,
    pub search_space_id: i64,
    pub user_query: String,
    pub chat_history: Vec<ChatMessage>,
    pub research_mode: ResearchMode,
    pub search_mode: SearchMode,
    pub selected_connector_ids: Vec<i64>,
    pub selected_document_ids: Vec<String>,
    pub llm_configs: Vec<LlmConfig>,
    pub citations_enabled: bool,
    pub custom_instructions: Option<String>,
    pub num_sections: usize,

    #[serde(default)]
    pub reformulated_query: Option<String>,
    #[serde(default)]
    pub answer_outline: Vec<OutlineSection>,
    #[serde(default)]
    pub written_sections: Vec<WrittenSection>,
    #[serde(default)]
    pub reranked_documents: Vec<RetrievedChunk>,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub further_questions: Vec<FurtherQuestion>,

    /// Whether this run's state is durable enough to resume from (spec.md
    /// §3 `research_runs.resumable`) — set once the outline (or, in QNA
    /// mode, the retrieval set) has been persisted.
    #[serde(default)]
    pub resumable: bool,
}

impl ResearchState {
    pub fn fast_llm(&self) -> Option<&LlmConfig> {
        self.llm_configs.first()
    }

    /// spec.md §4.7: `write_answer_outline` uses a "strategic" LLM,
    /// distinct from the "fast" one used for reformulation and further-
    /// questions. Absent a second configured model, the fast model serves
    /// both roles.
    pub fn strategic_llm(&self) -> Option<&LlmConfig> {
        self.llm_configs.get(1).or_else(|| self.llm_configs.first())
    }
}
