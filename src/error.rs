//! Error taxonomy for the copilot core.
//!
//! Most plumbing uses `anyhow::Result` with context, but the conditions a
//! caller needs to distinguish are typed here and stay downcastable after
//! crossing an `anyhow` boundary:
//!
//! - [`CopilotError::ModelInvocation`] — a language-model or embedding call
//!   failed, or its output could not be coerced to the expected schema.
//! - [`CopilotError::IndexNotFound`] — the persisted index is absent; a setup
//!   problem, not a query-time problem.
//! - [`CopilotError::SourceCrawl`] — a documentation source could not be
//!   crawled during an index build.
//! - [`CopilotError::CacheWrite`] — persisting classification results failed.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopilotError {
    /// The model call errored (network, quota, non-success status) or
    /// returned output that does not match the requested schema.
    #[error("model invocation failed: {0}")]
    ModelInvocation(String),

    /// No persisted index exists at the configured path. Run the index
    /// build first.
    #[error("index not found at {0}; run `copilot build-index` first")]
    IndexNotFound(PathBuf),

    /// A source crawl failed during index build. A partial corpus silently
    /// degrades answer quality, so this is fatal for the build.
    #[error("crawl of {url} failed: {message}")]
    SourceCrawl { url: String, message: String },

    /// Writing the classification cache to disk failed.
    #[error("failed to write classification cache: {0}")]
    CacheWrite(String),
}
