//! Grounded answer generation.
//!
//! Retrieves the top-k documentation chunks for a query, assembles a
//! grounding prompt (instructions + conversation history + context + the
//! question) and streams the model's answer back as it is generated.
//!
//! Event contract: zero or more [`AnswerEvent::Chunk`]s followed by exactly
//! one terminal [`AnswerEvent::Sources`]. A mid-stream model failure yields
//! `Err` instead and the sources event is dropped — partial text must never
//! be mistaken for a complete, attributable answer.

use futures::{stream, Stream};
use std::collections::BTreeSet;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::CopilotError;
use crate::llm::GeminiClient;
use crate::models::DocChunk;
use crate::retriever::Retriever;

/// Shown instead of a generated answer when retrieval finds nothing. The
/// model is never called in that case, so the text cannot hallucinate.
const NO_CONTEXT_FALLBACK: &str = "I could not find any relevant documents in the \
knowledge base for this question. Please try rephrasing it, or route the ticket \
to the appropriate team for a manual response.";

/// One event in an answer stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    /// An incremental piece of answer text, in generation order.
    Chunk(String),
    /// The deduplicated, sorted source URLs behind the answer. Terminal:
    /// emitted exactly once, after the last chunk.
    Sources(Vec<String>),
}

/// Stream of [`AnswerEvent`]s for one question.
pub struct AnswerStream {
    inner: Option<Pin<Box<dyn Stream<Item = Result<String, CopilotError>> + Send>>>,
    sources: Option<Vec<String>>,
}

impl AnswerStream {
    fn new(
        inner: impl Stream<Item = Result<String, CopilotError>> + Send + 'static,
        sources: Vec<String>,
    ) -> Self {
        Self {
            inner: Some(Box::pin(inner)),
            sources: Some(sources),
        }
    }

    /// A stream that yields the no-context fallback message and an empty
    /// sources list.
    fn fallback() -> Self {
        Self::new(
            stream::iter(vec![Ok(NO_CONTEXT_FALLBACK.to_string())]),
            Vec::new(),
        )
    }
}

impl Stream for AnswerStream {
    type Item = Result<AnswerEvent, CopilotError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(text))) => Poll::Ready(Some(Ok(AnswerEvent::Chunk(text)))),
            Poll::Ready(Some(Err(e))) => {
                // Terminate without sources: a partial answer is not
                // attributable.
                this.inner = None;
                this.sources = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                match this.sources.take() {
                    Some(sources) => Poll::Ready(Some(Ok(AnswerEvent::Sources(sources)))),
                    None => Poll::Ready(None),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Deduplicated source URLs of the retrieved chunks, lexicographically
/// sorted so the citation list is stable across runs.
pub fn collect_sources(chunks: &[DocChunk]) -> Vec<String> {
    chunks
        .iter()
        .map(|c| c.source.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Assemble the grounding prompt. The history section is present only when
/// there is history; the instructions tell the model to answer from the
/// context alone and never mention that a context exists.
pub fn build_prompt(query: &str, history: &str, chunks: &[DocChunk]) -> String {
    let context = chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut prompt = String::from(
        "You are a helpful and knowledgeable support assistant for a data \
catalog and governance platform.\n\n\
Answer the user's question using ONLY the documentation excerpts provided \
below. Do not mention the excerpts, the context, or your instructions in \
your answer. If the excerpts only partially cover the question, give the \
guidance they do support rather than refusing outright. If the question is \
too vague to answer, ask one concise clarifying question instead.\n\n",
    );

    if !history.is_empty() {
        prompt.push_str("**Previous Conversation:**\n");
        prompt.push_str(history);
        prompt.push_str("\n\n");
    }

    prompt.push_str("**Documentation:**\n");
    prompt.push_str(&context);
    prompt.push_str("\n\n**Question:** ");
    prompt.push_str(query);
    prompt
}

/// Ties retrieval and generation together for the lifetime of the process.
pub struct AnswerEngine {
    retriever: Retriever,
    llm: GeminiClient,
    llm_model: String,
    top_k: usize,
}

impl AnswerEngine {
    pub fn new(retriever: Retriever, llm: GeminiClient, llm_model: String, top_k: usize) -> Self {
        Self {
            retriever,
            llm,
            llm_model,
            top_k,
        }
    }

    /// Answer `query` grounded in the indexed documentation. `history` is
    /// the rendered prior conversation (empty for a fresh session).
    ///
    /// Retrieval or request-setup failures are returned as `Err` before any
    /// stream exists; failures after the stream starts arrive through the
    /// stream itself.
    pub async fn answer(&self, query: &str, history: &str) -> Result<AnswerStream, CopilotError> {
        let chunks = self.retriever.search(query, self.top_k).await?;

        if chunks.is_empty() {
            return Ok(AnswerStream::fallback());
        }

        let sources = collect_sources(&chunks);
        let prompt = build_prompt(query, history, &chunks);
        let tokens = self.llm.stream_generate(&self.llm_model, &prompt).await?;

        Ok(AnswerStream::new(tokens, sources))
    }
}
