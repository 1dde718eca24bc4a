//! Generic-over-`Store` hybrid search (spec.md §4.6 C6 "Fan-out & retrieval"
//! internal scoring core), grounded in the teacher's
//! `crates/context-harness-core/src/search.rs`: fetch keyword and vector
//! candidates independently, min-max normalize each list's raw scores, fuse
//! with a configurable weight, and aggregate to one score per document by
//! taking the max across its surviving chunks.

use std::collections::HashMap;

use crate::store::{ChunkCandidate, Store};

/// A scored result after fusion, aggregated to document granularity.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document_id: String,
    pub chunk_id: String,
    pub score: f32,
}

/// Weight given to vector score in the fused score: `alpha * vector + (1 -
/// alpha) * keyword`. spec.md §4.6 leaves the exact value to the
/// implementation; 0.5 (equal weight) is the default here.
pub const DEFAULT_ALPHA: f32 = 0.5;

/// Run keyword + vector search against `store` and return document-level
/// hits ordered by descending fused score.
pub async fn hybrid_search(
    store: &dyn Store,
    search_space_id: i64,
    query: &str,
    query_embedding: Option<&[f32]>,
    connector_ids: Option<&[i64]>,
    limit: usize,
    alpha: f32,
) -> anyhow::Result<Vec<SearchHit>> {
    let keyword = store
        .keyword_search(search_space_id, query, connector_ids, limit * 4)
        .await?;
    let vector = match query_embedding {
        Some(q) => {
            store
                .vector_search(search_space_id, q, connector_ids, limit * 4)
                .await?
        }
        None => Vec::new(),
    };

    Ok(fuse(&keyword, &vector, alpha, limit))
}

/// Pure fusion step, split out from `hybrid_search` so it can be tested
/// without a `Store`.
pub fn fuse(
    keyword: &[ChunkCandidate],
    vector: &[ChunkCandidate],
    alpha: f32,
    limit: usize,
) -> Vec<SearchHit> {
    let keyword_norm = min_max_normalize(keyword);
    let vector_norm = min_max_normalize(vector);

    let mut fused: HashMap<String, f32> = HashMap::new();
    let mut doc_of: HashMap<String, String> = HashMap::new();

    for (chunk, score) in &keyword_norm {
        *fused.entry(chunk.id.clone()).or_insert(0.0) += (1.0 - alpha) * score;
        doc_of.insert(chunk.id.clone(), chunk.document_id.clone());
    }
    for (chunk, score) in &vector_norm {
        *fused.entry(chunk.id.clone()).or_insert(0.0) += alpha * score;
        doc_of.insert(chunk.id.clone(), chunk.document_id.clone());
    }

    // Document-level MAX aggregation: a document's rank is its best chunk's.
    let mut best_per_document: HashMap<String, (String, f32)> = HashMap::new();
    for (chunk_id, score) in fused {
        let document_id = doc_of.get(&chunk_id).cloned().unwrap_or_default();
        let entry = best_per_document
            .entry(document_id.clone())
            .or_insert((chunk_id.clone(), f32::MIN));
        if score > entry.1 {
            *entry = (chunk_id, score);
        }
    }

    let mut hits: Vec<SearchHit> = best_per_document
        .into_iter()
        .map(|(document_id, (chunk_id, score))| SearchHit { document_id, chunk_id, score })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    hits.truncate(limit);
    hits
}

fn min_max_normalize(candidates: &[ChunkCandidate]) -> Vec<(crate::model::Chunk, f32)> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let min = candidates.iter().map(|c| c.score).fold(f32::MAX, f32::min);
    let max = candidates.iter().map(|c| c.score).fold(f32::MIN, f32::max);
    let span = max - min;

    candidates
        .iter()
        .map(|c| {
            let normalized = if span > 0.0 { (c.score - min) / span } else { 1.0 };
            (c.chunk.clone(), normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Chunk;

    fn candidate(id: &str, document_id: &str, score: f32) -> ChunkCandidate {
        ChunkCandidate {
            chunk: Chunk {
                id: id.to_string(),
                document_id: document_id.to_string(),
                chunk_index: 0,
                content: String::new(),
                content_hash: String::new(),
                embedding: None,
            },
            score,
        }
    }

    #[test]
    fn fuse_prefers_chunk_present_in_both_lists() {
        let keyword = vec![candidate("c1", "d1", 1.0), candidate("c2", "d2", 0.5)];
        let vector = vec![candidate("c1", "d1", 1.0)];
        let hits = fuse(&keyword, &vector, 0.5, 10);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[test]
    fn fuse_aggregates_to_document_max() {
        let keyword = vec![candidate("c1", "d1", 0.2), candidate("c2", "d1", 0.9)];
        let vector: Vec<ChunkCandidate> = vec![];
        let hits = fuse(&keyword, &vector, 0.5, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c2");
    }

    #[test]
    fn fuse_respects_limit() {
        let keyword: Vec<ChunkCandidate> = (0..5)
            .map(|i| candidate(&format!("c{i}"), &format!("d{i}"), i as f32))
            .collect();
        let hits = fuse(&keyword, &[], 0.5, 2);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn empty_inputs_produce_no_hits() {
        let hits = fuse(&[], &[], 0.5, 10);
        assert!(hits.is_empty());
    }

    #[test]
    fn single_candidate_normalizes_to_full_score() {
        let keyword = vec![candidate("c1", "d1", 7.0)];
        let hits = fuse(&keyword, &[], 0.5, 10);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);
    }
}
