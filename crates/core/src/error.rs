//! Named error kinds (spec.md §7) carried inside `anyhow::Error`.
//!
//! The teacher never reaches for `thiserror`; call sites build these with
//! `anyhow::Error::from(IndexError::RateLimited)` or attach them via
//! `.context(...)`, and only the indexer loop downcasts to decide
//! per-item-skip vs. run-abort.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Required config keys absent at run start. Abort run, surface to UI.
    MissingCredentials(String),
    /// Adapter validation rejected the credential. Abort run, prompt re-auth.
    InvalidCredentials(String),
    /// OAuth refresh failed. Abort run, prompt re-auth.
    AuthenticationExpired(String),
    /// 429 / vendor backoff header. Retry with backoff, then abort after N attempts.
    RateLimited { wait_seconds: u64 },
    /// 5xx / timeout / connection drop. Retry, then per-item skip.
    Transient(String),
    /// Source payload missing required fields. Per-item skip.
    ItemMalformed(String),
    /// Binary extraction returned empty/erroring. Per-item skip (or placeholder).
    EtlFailed(String),
    /// DB transport error on flush. Rollback batch, retry once, then fail run.
    DatabaseTransient(String),
    /// Unique-violation race on content_hash. Converted to skipped-duplicate-content.
    DatabaseConstraint(String),
    /// Model returned malformed JSON or timed out.
    LlmFailure(String),
}

impl IndexError {
    /// Per spec.md §7 recovery policy: true if this error kind is local to a
    /// single item (recovered: counted + skipped) rather than global to the
    /// run (recovered: abort).
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            IndexError::ItemMalformed(_) | IndexError::EtlFailed(_) | IndexError::Transient(_)
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            IndexError::MissingCredentials(_) => "MissingCredentials",
            IndexError::InvalidCredentials(_) => "InvalidCredentials",
            IndexError::AuthenticationExpired(_) => "AuthenticationExpired",
            IndexError::RateLimited { .. } => "RateLimited",
            IndexError::Transient(_) => "Transient",
            IndexError::ItemMalformed(_) => "ItemMalformed",
            IndexError::EtlFailed(_) => "EtlFailed",
            IndexError::DatabaseTransient(_) => "DatabaseTransient",
            IndexError::DatabaseConstraint(_) => "DatabaseConstraint",
            IndexError::LlmFailure(_) => "LlmFailure",
        }
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::MissingCredentials(m) => write!(f, "missing credentials: {m}"),
            IndexError::InvalidCredentials(m) => write!(f, "invalid credentials: {m}"),
            IndexError::AuthenticationExpired(m) => write!(f, "authentication expired: {m}"),
            IndexError::RateLimited { wait_seconds } => {
                write!(f, "rate limited, retry after {wait_seconds}s")
            }
            IndexError::Transient(m) => write!(f, "transient error: {m}"),
            IndexError::ItemMalformed(m) => write!(f, "item malformed: {m}"),
            IndexError::EtlFailed(m) => write!(f, "etl failed: {m}"),
            IndexError::DatabaseTransient(m) => write!(f, "database transient error: {m}"),
            IndexError::DatabaseConstraint(m) => write!(f, "database constraint race: {m}"),
            IndexError::LlmFailure(m) => write!(f, "llm failure: {m}"),
        }
    }
}

impl std::error::Error for IndexError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimit,
    ServerError,
    Timeout,
}

/// Callback signature invoked by adapters on each retry attempt
/// (spec.md §4.3: "a user-visible retry callback").
pub type RetryCallback<'a> = &'a dyn Fn(RetryReason, u32, u32, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_item_classification() {
        assert!(IndexError::ItemMalformed("x".into()).is_per_item());
        assert!(IndexError::EtlFailed("x".into()).is_per_item());
        assert!(IndexError::Transient("x".into()).is_per_item());
        assert!(!IndexError::MissingCredentials("x".into()).is_per_item());
        assert!(!IndexError::DatabaseConstraint("x".into()).is_per_item());
    }
}
