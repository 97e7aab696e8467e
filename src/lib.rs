//! Support Copilot — ticket triage and grounded answering over a
//! documentation corpus.
//!
//! The crate has two halves. The triage half classifies incoming support
//! tickets into closed vocabularies (topic tags, sentiment, priority) with
//! a schema-constrained model call, and routes each ticket either to the
//! answer generator or to a specialist team. The answering half builds a
//! vector index over crawled documentation and streams grounded answers
//! with source citations.
//!
//! ```text
//!   sitemap sources ──► crawl ──► chunk ──► embedding ──► index (SQLite)
//!                                                            │
//!   question + history ──► retriever ──► answer ──► AnswerEvent stream
//!
//!   tickets.json ──► classify ──► pipeline ──► classification cache
//! ```
//!
//! | Module       | Responsibility                                         |
//! |--------------|--------------------------------------------------------|
//! | [`config`]   | TOML configuration and the provider credential         |
//! | [`models`]   | Tickets, classifications, conversation turns           |
//! | [`error`]    | Typed failures callers need to distinguish             |
//! | [`crawl`]    | Sitemap crawl and HTML-to-text extraction              |
//! | [`chunk`]    | Overlapping text chunking                              |
//! | [`embedding`]| Gemini batch embeddings with retry                     |
//! | [`index`]    | Persisted vector index: build, load, cosine search     |
//! | [`retriever`]| Query embedding + nearest-neighbor lookup              |
//! | [`llm`]      | Structured and streamed Gemini calls                   |
//! | [`classify`] | Ticket classification and routing                      |
//! | [`answer`]   | Grounded answer streaming with citations               |
//! | [`pipeline`] | Bulk classification with a JSON cache                  |

pub mod answer;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod crawl;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod retriever;
