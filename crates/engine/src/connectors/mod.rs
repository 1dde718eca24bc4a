//! Connector adapters (spec.md §4.3 C3) — one module per bespoke source
//! plus the generic profile-driven REST adapter, dispatched through
//! [`registry::AdapterRegistry`].

pub mod filesystem;
pub mod git;
pub mod registry;
pub mod rest_connector;
pub mod rss;
pub mod s3;
pub mod slack;
pub mod webcrawler;
