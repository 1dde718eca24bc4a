//! Core domain crate for kbase: the connector-agnostic data model, hashing
//! and chunking rules, the `Store`/`ConnectorAdapter` traits, and the
//! hybrid search algorithm. No SQLite, no HTTP, no `tokio::fs` — anything
//! that needs I/O or an async runtime feature lives in `kbase-engine`.
//!
//! ```text
//! model        -- SearchSpace, ConnectorRecord, Document, Chunk, ...
//! error        -- IndexError kinds shared by adapters and the indexer loop
//! hash         -- content_hash / unique_identifier_hash / settings_hash
//! chunk        -- paragraph-boundary chunker + template summary fallback
//! budget       -- token-budget packer for retrieval context assembly
//! embedding    -- EmbeddingProvider trait + vector utilities
//! store        -- Store trait (+ in-memory impl) and the four upsert outcomes
//! search       -- generic-over-Store hybrid keyword/vector fusion
//! connector    -- ConnectorAdapter trait and SourceItem/FetchedContent
//! ```

pub mod budget;
pub mod chunk;
pub mod connector;
pub mod embedding;
pub mod error;
pub mod hash;
pub mod model;
pub mod search;
pub mod store;
