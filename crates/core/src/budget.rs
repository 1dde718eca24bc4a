//! Token-budget packer (spec.md §4.2): given a base prompt token count and
//! a caller-ordered list of pre-formatted documents, find the largest
//! prefix that fits `context_window - base_tokens` via binary search.
//!
//! Pure: no I/O, no LLM calls. Ordering is the caller's responsibility
//! (the reranker's output in C6).

const CHARS_PER_TOKEN: usize = 4;

/// Approximate the token count of a string the same way `chunk.rs` sizes
/// chunks, so the packer and the chunker agree on what a "token" costs.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN).max(1)
}

/// Returns the number of leading items from `formatted_docs` whose combined
/// token count fits within `context_window.saturating_sub(base_tokens)`.
///
/// Uses binary search over the monotonically non-decreasing prefix-sum of
/// token counts, per spec.md §4.2.
pub fn pack_to_budget(formatted_docs: &[String], base_tokens: usize, context_window: usize) -> usize {
    let budget = context_window.saturating_sub(base_tokens);
    if formatted_docs.is_empty() || budget == 0 {
        return 0;
    }

    let mut prefix_sums = Vec::with_capacity(formatted_docs.len());
    let mut running = 0usize;
    for d in formatted_docs {
        running += estimate_tokens(d);
        prefix_sums.push(running);
    }

    // Largest index i such that prefix_sums[i] <= budget.
    let mut lo = 0usize;
    let mut hi = prefix_sums.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if prefix_sums[mid] <= budget {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
