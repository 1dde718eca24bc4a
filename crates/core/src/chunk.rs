//! Paragraph-boundary text chunker (spec.md §4.2), grounded in the
//! teacher's `chunk.rs`.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::Chunk;

/// Rough characters-per-token approximation used to size chunks to a
/// token budget without pulling in a tokenizer for this pure step.
const CHARS_PER_TOKEN: usize = 4;

/// Split `content` into ordered chunks whose estimated token count stays
/// under `max_tokens`. Splits on paragraph boundaries (blank lines) first;
/// a single paragraph that still exceeds the budget is hard-split on
/// newline, then space, boundaries.
pub fn chunk_text(document_id: &str, content: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN).max(CHARS_PER_TOKEN);
    let paragraphs = split_paragraphs(content);

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in paragraphs {
        if para.len() > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(hard_split(&para, max_chars));
            continue;
        }

        let candidate_len = if current.is_empty() {
            para.len()
        } else {
            current.len() + 2 + para.len()
        };

        if candidate_len > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&para);
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    if pieces.is_empty() && !content.trim().is_empty() {
        pieces.push(content.to_string());
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(document_id, i as i64, text))
        .collect()
}

fn split_paragraphs(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Hard-split an oversized paragraph at newline boundaries first, falling
/// back to space boundaries, so no piece exceeds `max_chars`.
fn hard_split(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = paragraph;

    while remaining.len() > max_chars {
        let slice = &remaining[..max_chars.min(remaining.len())];
        let split_at = slice
            .rfind('\n')
            .or_else(|| slice.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(max_chars.min(remaining.len()));

        let (head, tail) = remaining.split_at(split_at);
        out.push(head.trim().to_string());
        remaining = tail.trim_start();
    }

    if !remaining.is_empty() {
        out.push(remaining.to_string());
    }

    out.into_iter().filter(|s| !s.is_empty()).collect()
}

fn make_chunk(document_id: &str, chunk_index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let content_hash = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index,
        content: text,
        content_hash,
        embedding: None,
    }
}

/// Deterministic-template summary used when no long-context LLM is
/// configured (spec.md §4.2). Mirrors the original Python indexers'
/// "Source: {type} | Title: {title} | URL: {url}" header convention.
pub fn template_summary(
    connector_type: &str,
    title: Option<&str>,
    source_url: Option<&str>,
    content: &str,
) -> String {
    let header = format!(
        "Source: {} | Title: {} | URL: {}",
        connector_type,
        title.unwrap_or("(untitled)"),
        source_url.unwrap_or("(none)"),
    );
    let preview: String = content.chars().take(500).collect();
    format!("{header}\n\n{preview}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_budget() {
        let para = "word ".repeat(50);
        let content = format!("{para}\n\n{para}\n\n{para}");
        let chunks = chunk_text("doc1", &content, 20);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.len() <= 20 * CHARS_PER_TOKEN + 64);
        }
    }

    #[test]
    fn deterministic_chunk_count_for_same_input() {
        let content = "para one.\n\npara two.\n\npara three.";
        let a = chunk_text("doc1", content, 100);
        let b = chunk_text("doc1", content, 100);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content, y.content);
            assert_eq!(x.content_hash, y.content_hash);
        }
    }

    #[test]
    fn oversized_single_paragraph_is_hard_split() {
        let huge = "x".repeat(1000);
        let chunks = chunk_text("doc1", &huge, 10);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| !c.content.is_empty()));
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(chunk_text("doc1", "", 100).is_empty());
        assert!(chunk_text("doc1", "   \n\n  ", 100).is_empty());
    }

    #[test]
    fn chunk_indices_are_sequential() {
        let content = "a\n\nb\n\nc";
        let chunks = chunk_text("doc1", content, 100);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.document_id, "doc1");
        }
    }

    #[test]
    fn template_summary_has_header() {
        let s = template_summary("slack", Some("standup"), Some("https://x"), "body text");
        assert!(s.starts_with("Source: slack | Title: standup | URL: https://x"));
        assert!(s.contains("body text"));
    }
}
