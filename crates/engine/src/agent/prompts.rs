//! Prompt assembly (spec.md §4.7): the three-layer system prompt, the
//! citation-format contract enforced by instruction only (the agent never
//! post-processes model output), and language control.

use kbase_core::model::LlmConfig;

pub const BASE_INSTRUCTIONS: &str =
    "You are a research assistant. Answer the user's question using only the information in the provided documents.";

pub const CITATION_INSTRUCTIONS: &str = "Cite every factual sentence inline as [citation:<source_id>], where <source_id> \
is copied verbatim from the document it came from. For multiple citations on one sentence, write them consecutively, \
e.g. [citation:1], [citation:2]. Never use markdown links, parenthetical citations, footnotes, or an id that is not \
one of the provided source ids.";

pub const NO_DOCUMENTS_INSTRUCTIONS: &str =
    "No relevant documents were found for this question. Answer from general knowledge and say plainly that no \
sources were available.";

/// spec.md §4.7 language control: one explicit language forces a directive;
/// mixing an explicit language with unspecified configs is fine; mixing two
/// distinct explicit languages still produces a directive (the first one
/// found) but also a warning, since the result is ambiguous, not invalid.
pub fn language_directive(llm_configs: &[LlmConfig]) -> (Option<String>, Option<String>) {
    let mut seen: Vec<&str> = Vec::new();
    for config in llm_configs {
        if let Some(lang) = config.language.as_deref() {
            if !seen.contains(&lang) {
                seen.push(lang);
            }
        }
    }
    match seen.len() {
        0 => (None, None),
        1 => (Some(format!("Respond in {}.", seen[0])), None),
        _ => (
            Some(format!("Respond in {}.", seen[0])),
            Some(format!("multiple distinct languages configured ({}); using '{}'", seen.join(", "), seen[0])),
        ),
    }
}

/// Builds the full system prompt from base / citation / custom-instruction
/// layers plus the language directive, returning an optional warning to
/// surface as an `AgentEvent::Error` (non-fatal).
pub fn build_system_prompt(
    has_documents: bool,
    citations_enabled: bool,
    custom_instructions: Option<&str>,
    llm_configs: &[LlmConfig],
) -> (String, Option<String>) {
    let mut layers = vec![BASE_INSTRUCTIONS.to_string()];

    if !has_documents {
        layers.push(NO_DOCUMENTS_INSTRUCTIONS.to_string());
    } else if citations_enabled {
        layers.push(CITATION_INSTRUCTIONS.to_string());
    }

    if let Some(custom) = custom_instructions {
        if !custom.trim().is_empty() {
            layers.push(custom.trim().to_string());
        }
    }

    let (directive, warning) = language_directive(llm_configs);
    if let Some(directive) = directive {
        layers.push(directive);
    }

    (layers.join("\n\n"), warning)
}

/// spec.md §4.7 `write_answer_outline`: strict JSON schema
/// `{answer_outline: [{section_id, section_title, questions: [2..5]}]}`.
pub fn outline_prompt(user_query: &str, num_sections: usize) -> String {
    format!(
        "Plan a research report answering: \"{user_query}\"\n\n\
Produce exactly {num_sections} sections. Respond with ONLY a JSON object of the exact shape:\n\
{{\"answer_outline\": [{{\"section_id\": <int>, \"section_title\": <string>, \"questions\": [<string>, ...]}}]}}\n\
Each section's \"questions\" array must contain between 2 and 5 search questions. Do not include any text \
outside the JSON object."
    )
}

/// spec.md §4.7 `generate_further_questions`: `{further_questions:
/// [{id, question}]}`.
pub fn further_questions_prompt(user_query: &str, answer: &str) -> String {
    format!(
        "Given the question \"{user_query}\" and the answer below, suggest 3-5 natural follow-up questions a user \
might ask next. Respond with ONLY a JSON object of the exact shape:\n\
{{\"further_questions\": [{{\"id\": <int>, \"question\": <string>}}]}}\n\n\
Answer:\n{answer}"
    )
}

/// spec.md §4.7 `reformulate_user_query`: rewrite into a standalone query
/// using chat history, when history is non-empty.
pub fn reformulate_prompt(user_query: &str, history: &[(String, String)]) -> String {
    let transcript: String =
        history.iter().map(|(role, content)| format!("{role}: {content}")).collect::<Vec<_>>().join("\n");
    format!(
        "Given this conversation history:\n{transcript}\n\n\
Rewrite the user's latest message into a standalone question that makes sense without the history. \
Respond with ONLY the rewritten question, no preamble.\n\nLatest message: {user_query}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(language: Option<&str>) -> LlmConfig {
        LlmConfig {
            id: 1,
            provider: "openai".to_string(),
            model_name: "gpt-test".to_string(),
            credentials: "sk-test".to_string(),
            api_base: None,
            language: language.map(str::to_string),
            parameters: serde_json::json!({}),
        }
    }

    #[test]
    fn no_language_configs_produce_no_directive() {
        let (directive, warning) = language_directive(&[config(None), config(None)]);
        assert!(directive.is_none());
        assert!(warning.is_none());
    }

    #[test]
    fn one_explicit_language_mixed_with_unspecified_is_fine() {
        let (directive, warning) = language_directive(&[config(Some("French")), config(None)]);
        assert_eq!(directive, Some("Respond in French.".to_string()));
        assert!(warning.is_none());
    }

    #[test]
    fn two_distinct_languages_warn_but_still_produce_a_directive() {
        let (directive, warning) = language_directive(&[config(Some("French")), config(Some("German"))]);
        assert!(directive.is_some());
        assert!(warning.is_some());
    }

    #[test]
    fn no_documents_variant_skips_citation_instructions() {
        let (prompt, _) = build_system_prompt(false, true, None, &[]);
        assert!(prompt.contains(NO_DOCUMENTS_INSTRUCTIONS));
        assert!(!prompt.contains(CITATION_INSTRUCTIONS));
    }

    #[test]
    fn citation_instructions_included_when_enabled_and_documents_present() {
        let (prompt, _) = build_system_prompt(true, true, None, &[]);
        assert!(prompt.contains(CITATION_INSTRUCTIONS));
    }

    #[test]
    fn custom_instructions_appended_when_set() {
        let (prompt, _) = build_system_prompt(true, false, Some("Always answer in bullet points."), &[]);
        assert!(prompt.contains("Always answer in bullet points."));
    }
}
