//! Research agent (spec.md §4.7 C7): a branching workflow graph over
//! `ResearchState`, streaming typed events to an HTTP client.
//!
//! Unlike C1-C6, the teacher has no real analog here — its `agents.rs` is
//! an MCP persona registry (named system prompts plus tool scoping), not a
//! multi-step LLM workflow. This module is built fresh, in the teacher's
//! idiom: plain `async fn`s over a shared state struct, `anyhow::Result`
//! throughout, and a raw-`reqwest` LLM client generalized from
//! `embedding.rs`'s `embed_openai` rather than pulling in an agent-framework
//! crate the rest of the repo doesn't use.

pub mod events;
pub mod graph;
pub mod llm;
pub mod prompts;
pub mod state;
