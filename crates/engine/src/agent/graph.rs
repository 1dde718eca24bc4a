//! The C7 workflow graph (spec.md §4.7):
//!
//! ```text
//! reformulate_user_query
//!    ├─ QNA ──────────────────► handle_qna_workflow ──┐
//!    └─ otherwise ─► write_answer_outline ─► process_sections ─┤
//!                                                              ▼
//!                                              generate_further_questions
//! ```
//!
//! Each node is a plain `async fn(&mut ResearchState, ...) -> Result<()>`,
//! grounded in the teacher's flat, non-framework async style rather than a
//! graph-execution crate — the branching above is just an `if`/`match` in
//! `run_research`.

use anyhow::{bail, Context, Result};

use kbase_core::embedding::EmbeddingProvider;
use kbase_core::store::Store;

use crate::config::RetrievalConfig;
use crate::retrieval::{fan_out, pack_chunks, Reranker, RetrievedChunk};

use super::events::{emit, AgentEvent, EventSender, SourceGroup, SourceRef};
use super::llm::{LlmClient, OpenAiCompatibleClient};
use super::prompts::{build_system_prompt, further_questions_prompt, outline_prompt, reformulate_prompt};
use super::state::{FurtherQuestion, OutlineSection, ResearchMode, ResearchState, WrittenSection};

const PROSE_CHUNK_WORDS: usize = 12;

/// Splits a complete response into word-grouped pieces for `text_chunk`
/// events. The LLM client used here returns a complete response rather than
/// a token stream (spec.md §9 Open Question, decided in DESIGN.md); this is
/// the seam where a genuinely streaming client would instead forward its
/// own chunks.
fn stream_prose(tx: &EventSender, prose: &str) {
    let words: Vec<&str> = prose.split_whitespace().collect();
    for group in words.chunks(PROSE_CHUNK_WORDS) {
        emit(tx, AgentEvent::TextChunk(format!("{} ", group.join(" "))));
    }
}

fn source_groups(chunks: &[RetrievedChunk]) -> Vec<SourceGroup> {
    use std::collections::HashMap;
    let mut groups: HashMap<String, Vec<SourceRef>> = HashMap::new();
    for chunk in chunks {
        groups.entry(chunk.connector_type.clone()).or_default().push(SourceRef {
            id: chunk.document_id.clone(),
            title: chunk.title.clone(),
            description: None,
            url: None,
        });
    }
    groups
        .into_iter()
        .map(|(connector_type, sources)| SourceGroup {
            id: connector_type.clone(),
            name: connector_type.clone(),
            kind: connector_type,
            sources,
        })
        .collect()
}

/// spec.md §4.7 `reformulate_user_query`: pass-through if history is empty,
/// else a fast LLM rewrite into a standalone query.
pub async fn reformulate_user_query(state: &mut ResearchState) -> Result<()> {
    if state.chat_history.is_empty() {
        state.reformulated_query = Some(state.user_query.clone());
        return Ok(());
    }
    let Some(llm_config) = state.fast_llm() else {
        state.reformulated_query = Some(state.user_query.clone());
        return Ok(());
    };
    let client = OpenAiCompatibleClient::new(llm_config);
    let history: Vec<(String, String)> = state
        .chat_history
        .iter()
        .map(|m| (format!("{:?}", m.role).to_lowercase(), m.content.clone()))
        .collect();
    let prompt = reformulate_prompt(&state.user_query, &history);
    let rewritten = client.complete("You rewrite questions to be standalone.", &[("user".to_string(), prompt)]).await?;
    state.reformulated_query = Some(rewritten.trim().to_string());
    Ok(())
}

/// spec.md §4.7 `write_answer_outline`: strict schema, explicit failure on
/// malformed JSON (no silent repair).
pub async fn write_answer_outline(state: &mut ResearchState) -> Result<()> {
    let llm_config = state.strategic_llm().context("no llm config available for write_answer_outline")?;
    let client = OpenAiCompatibleClient::new(llm_config);
    let query = state.reformulated_query.clone().unwrap_or_else(|| state.user_query.clone());
    let prompt = outline_prompt(&query, state.num_sections);
    let raw = client.complete("You plan research report outlines as strict JSON.", &[("user".to_string(), prompt)]).await?;

    let parsed: serde_json::Value =
        serde_json::from_str(raw.trim()).with_context(|| format!("write_answer_outline: model returned non-JSON output: {raw}"))?;

    let sections_value = parsed
        .get("answer_outline")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("write_answer_outline: missing or non-array 'answer_outline' field"))?;

    let mut sections = Vec::with_capacity(sections_value.len());
    for (i, section) in sections_value.iter().enumerate() {
        let section_id = section.get("section_id").and_then(|v| v.as_u64()).unwrap_or(i as u64) as u32;
        let section_title = section
            .get("section_title")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("write_answer_outline: section {i} missing 'section_title'"))?
            .to_string();
        let questions: Vec<String> = section
            .get("questions")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("write_answer_outline: section {i} missing 'questions' array"))?
            .iter()
            .filter_map(|q| q.as_str().map(str::to_string))
            .collect();
        if !(2..=5).contains(&questions.len()) {
            bail!("write_answer_outline: section {i} has {} questions, expected 2-5", questions.len());
        }
        sections.push(OutlineSection { section_id, section_title, questions });
    }

    if sections.is_empty() {
        bail!("write_answer_outline: model returned zero sections");
    }

    state.answer_outline = sections;
    state.resumable = true;
    Ok(())
}

/// spec.md §4.7 `process_sections`: retrieve via C6 per section, write
/// prose with inline citations, stream both terminal-info and text-chunk
/// events, in stable section order.
pub async fn process_sections(
    state: &mut ResearchState,
    store: &dyn Store,
    embedder: Option<&dyn EmbeddingProvider>,
    reranker: Option<&dyn Reranker>,
    retrieval_config: &RetrievalConfig,
    tx: &EventSender,
) -> Result<()> {
    let llm_config = state.fast_llm().context("no llm config available for process_sections")?;
    let client = OpenAiCompatibleClient::new(llm_config);

    let sections = state.answer_outline.clone();
    for section in sections {
        emit(tx, AgentEvent::TerminalInfoDelta(format!("📖 researching section: {}", section.section_title)));

        let query_embedding = embed_query(embedder, &section.questions.join(" ")).await;
        let retrieved = fan_out(
            store,
            state.search_space_id,
            &section.questions,
            &state.selected_connector_ids,
            &state.selected_document_ids,
            query_embedding.as_deref(),
            reranker,
            retrieval_config,
        )
        .await?;
        let packed = pack_chunks(&retrieved, 500, retrieval_config.context_window_tokens);

        emit(tx, AgentEvent::SourcesDelta(source_groups(&packed)));

        let (system_prompt, warning) =
            build_system_prompt(!packed.is_empty(), state.citations_enabled, state.custom_instructions.as_deref(), &state.llm_configs);
        if let Some(warning) = warning {
            emit(tx, AgentEvent::Error(warning));
        }

        let context_block = render_context(&packed);
        let user_turn = format!(
            "Write the prose for the section \"{}\" answering: {}\n\nSources:\n{context_block}",
            section.section_title,
            section.questions.join("; ")
        );
        let prose = client.complete(&system_prompt, &[("user".to_string(), user_turn)]).await?;

        stream_prose(tx, &prose);

        state.written_sections.push(WrittenSection {
            section_id: section.section_id,
            section_title: section.section_title,
            prose,
            retrieved: packed,
        });
    }
    state.resumable = true;
    Ok(())
}

/// spec.md §4.7 `handle_qna_workflow`: combined retrieval over
/// `(reformulated_query, user_query)` plus user-selected documents, a
/// `rerank_documents → answer_question` sub-agent, and a `final_answer`
/// event.
pub async fn handle_qna_workflow(
    state: &mut ResearchState,
    store: &dyn Store,
    embedder: Option<&dyn EmbeddingProvider>,
    reranker: Option<&dyn Reranker>,
    retrieval_config: &RetrievalConfig,
    tx: &EventSender,
) -> Result<()> {
    let reformulated = state.reformulated_query.clone().unwrap_or_else(|| state.user_query.clone());
    let questions = vec![reformulated, state.user_query.clone()];

    emit(tx, AgentEvent::TerminalInfoDelta("🔎 retrieving sources".to_string()));
    let query_embedding = embed_query(embedder, &questions.join(" ")).await;
    let retrieved = fan_out(
        store,
        state.search_space_id,
        &questions,
        &state.selected_connector_ids,
        &state.selected_document_ids,
        query_embedding.as_deref(),
        reranker,
        retrieval_config,
    )
    .await?;
    let packed = pack_chunks(&retrieved, 500, retrieval_config.context_window_tokens);

    emit(tx, AgentEvent::SourcesDelta(source_groups(&packed)));
    state.reranked_documents = packed.clone();
    state.resumable = true;

    let llm_config = state.fast_llm().context("no llm config available for handle_qna_workflow")?;
    let client = OpenAiCompatibleClient::new(llm_config);

    let (system_prompt, warning) =
        build_system_prompt(!packed.is_empty(), state.citations_enabled, state.custom_instructions.as_deref(), &state.llm_configs);
    if let Some(warning) = warning {
        emit(tx, AgentEvent::Error(warning));
    }

    let context_block = render_context(&packed);
    let user_turn = format!("{}\n\nSources:\n{context_block}", state.user_query);
    let answer = client.complete(&system_prompt, &[("user".to_string(), user_turn)]).await?;

    stream_prose(tx, &answer);
    state.final_answer = Some(answer);
    Ok(())
}

/// spec.md §4.7 `generate_further_questions`: malformed JSON produces an
/// empty list plus a warning event, never a failure.
pub async fn generate_further_questions(state: &mut ResearchState, tx: &EventSender) -> Result<()> {
    let Some(llm_config) = state.fast_llm() else {
        emit(tx, AgentEvent::FurtherQuestionsDelta(Vec::new()));
        return Ok(());
    };
    let client = OpenAiCompatibleClient::new(llm_config);

    let answer = state
        .final_answer
        .clone()
        .unwrap_or_else(|| state.written_sections.iter().map(|s| s.prose.clone()).collect::<Vec<_>>().join("\n\n"));

    let prompt = further_questions_prompt(&state.user_query, &answer);
    let result = client.complete("You suggest natural follow-up questions as strict JSON.", &[("user".to_string(), prompt)]).await;

    let questions = match result {
        Ok(raw) => parse_further_questions(&raw),
        Err(e) => {
            emit(tx, AgentEvent::Error(format!("further-questions generation failed: {e}")));
            Vec::new()
        }
    };

    if questions.is_empty() && state.final_answer.is_some() {
        emit(tx, AgentEvent::Error("further-questions response was malformed, skipping".to_string()));
    }

    state.further_questions = questions.clone();
    emit(tx, AgentEvent::FurtherQuestionsDelta(questions));
    Ok(())
}

fn parse_further_questions(raw: &str) -> Vec<FurtherQuestion> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw.trim()) else { return Vec::new() };
    let Some(array) = parsed.get("further_questions").and_then(|v| v.as_array()) else { return Vec::new() };
    array
        .iter()
        .enumerate()
        .filter_map(|(i, q)| {
            let question = q.get("question").and_then(|v| v.as_str())?.to_string();
            let id = q.get("id").and_then(|v| v.as_u64()).unwrap_or(i as u64) as u32;
            Some(FurtherQuestion { id, question })
        })
        .collect()
}

async fn embed_query(embedder: Option<&dyn EmbeddingProvider>, text: &str) -> Option<Vec<f32>> {
    let embedder = embedder?;
    embedder.embed(&[text.to_string()]).await.ok().and_then(|mut v| v.pop())
}

fn render_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[citation:{}] {}\n{}", c.document_id, c.title.clone().unwrap_or_default(), c.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Top-level dispatcher implementing the graph's branch (spec.md §4.7):
/// QNA goes straight to `handle_qna_workflow`; every other research mode
/// runs the outline → sections path. Both paths converge on
/// `generate_further_questions`.
pub async fn run_research(
    state: &mut ResearchState,
    store: &dyn Store,
    embedder: Option<&dyn EmbeddingProvider>,
    reranker: Option<&dyn Reranker>,
    retrieval_config: &RetrievalConfig,
    tx: &EventSender,
) -> Result<()> {
    reformulate_user_query(state).await?;

    match state.research_mode {
        ResearchMode::Qna => {
            handle_qna_workflow(state, store, embedder, reranker, retrieval_config, tx).await?;
        }
        ResearchMode::General | ResearchMode::Deep | ResearchMode::Deeper => {
            write_answer_outline(state).await?;
            process_sections(state, store, embedder, reranker, retrieval_config, tx).await?;
        }
    }

    generate_further_questions(state, tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_further_questions() {
        let raw = r#"{"further_questions": [{"id": 1, "question": "What about X?"}]}"#;
        let parsed = parse_further_questions(raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].question, "What about X?");
    }

    #[test]
    fn malformed_further_questions_json_yields_empty_list() {
        assert!(parse_further_questions("not json").is_empty());
        assert!(parse_further_questions(r#"{"wrong_key": []}"#).is_empty());
    }
}
