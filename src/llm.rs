//! Gemini language-model client.
//!
//! Two call shapes cover everything the core needs:
//! - [`GeminiClient::generate_structured`] — single-shot `generateContent`
//!   with a JSON response schema and temperature 0, so field presence and
//!   types are enforced at the call boundary.
//! - [`GeminiClient::stream_generate`] — `streamGenerateContent?alt=sse`,
//!   returning a [`TokenStream`] of text deltas. The consumer drives the
//!   stream; each poll waits for the next delta (synchronous backpressure).
//!
//! Model-call failures of either shape surface as
//! [`CopilotError::ModelInvocation`]. No retry happens here — callers decide.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::embedding::DEFAULT_BASE_URL;
use crate::error::CopilotError;

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self, CopilotError> {
        Self::with_base_url(api_key, timeout_secs, DEFAULT_BASE_URL.to_string())
    }

    /// Point the client at an alternate endpoint. Used by tests.
    pub fn with_base_url(
        api_key: String,
        timeout_secs: u64,
        base_url: String,
    ) -> Result<Self, CopilotError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CopilotError::ModelInvocation(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    /// Single-shot generation constrained to a JSON schema. Returns the
    /// model's JSON text, ready to deserialize into the target type.
    ///
    /// Temperature is pinned to 0 for minimal sampling variance; output is
    /// still not guaranteed bit-identical across calls.
    pub async fn generate_structured(
        &self,
        model: &str,
        system: &str,
        user: &str,
        schema: &serde_json::Value,
    ) -> Result<String, CopilotError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": {
                "temperature": 0.0,
                "responseMimeType": "application/json",
                "responseSchema": schema,
            },
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CopilotError::ModelInvocation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CopilotError::ModelInvocation(format!(
                "generateContent returned {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CopilotError::ModelInvocation(format!("invalid response body: {}", e)))?;

        extract_text(&json).ok_or_else(|| {
            CopilotError::ModelInvocation("response contained no candidate text".to_string())
        })
    }

    /// Streamed generation. Yields text deltas as they arrive.
    pub async fn stream_generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<TokenStream, CopilotError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.0 },
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CopilotError::ModelInvocation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CopilotError::ModelInvocation(format!(
                "streamGenerateContent returned {}: {}",
                status, body_text
            )));
        }

        Ok(TokenStream::new(response.bytes_stream()))
    }
}

/// Concatenated text of the first candidate's parts, if any.
fn extract_text(json: &serde_json::Value) -> Option<String> {
    let parts = json
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            out.push_str(text);
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Parses a Server-Sent Events byte stream into text deltas.
///
/// The SSE body is a sequence of `data: {json}` events separated by blank
/// lines; each event is a `GenerateContentResponse` whose candidate parts
/// carry the incremental text. Events without text (usage metadata, finish
/// markers) are skipped.
pub struct TokenStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: BytesMut,
}

impl TokenStream {
    pub fn new(byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: BytesMut::new(),
        }
    }

    /// Parse one SSE event's worth of text. `None` when the event carries
    /// no text delta.
    fn parse_event(event_text: &str) -> Result<Option<String>, CopilotError> {
        let mut data = String::new();
        for line in event_text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(':') {
                continue;
            }
            if let Some(value) = trimmed.strip_prefix("data:") {
                data.push_str(value.trim());
            }
        }

        if data.is_empty() {
            return Ok(None);
        }

        let json: serde_json::Value = serde_json::from_str(&data).map_err(|e| {
            CopilotError::ModelInvocation(format!("invalid SSE event payload: {}", e))
        })?;

        if let Some(error) = json.get("error") {
            return Err(CopilotError::ModelInvocation(format!(
                "stream error event: {}",
                error
            )));
        }

        Ok(extract_text(&json))
    }
}

impl Stream for TokenStream {
    type Item = Result<String, CopilotError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            // Emit any complete event already buffered. The buffer holds raw
            // bytes so a multibyte character split across network chunks is
            // only decoded once its event is complete; scanning for the
            // delimiter is byte-safe because 0x0A never occurs inside a
            // multibyte UTF-8 sequence.
            if let Some(event_end) = this.buffer.windows(2).position(|w| w == b"\n\n") {
                let event_bytes = this.buffer.split_to(event_end + 2);
                let event_text = String::from_utf8_lossy(&event_bytes[..event_end]).into_owned();

                match Self::parse_event(&event_text) {
                    Ok(Some(text)) => return Poll::Ready(Some(Ok(text))),
                    Ok(None) => continue,
                    Err(e) => return Poll::Ready(Some(Err(e))),
                }
            }

            // Need more bytes.
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    // Normalize CRLF event separators up front.
                    this.buffer
                        .extend(bytes.iter().copied().filter(|&b| b != b'\r'));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(CopilotError::ModelInvocation(e.to_string()))));
                }
                Poll::Ready(None) => {
                    // Flush a final event that arrived without a trailing
                    // blank line.
                    if !this.buffer.is_empty() {
                        let remaining = std::mem::take(&mut this.buffer);
                        let event_text = String::from_utf8_lossy(&remaining).into_owned();
                        if event_text.trim().is_empty() {
                            return Poll::Ready(None);
                        }
                        match Self::parse_event(&event_text) {
                            Ok(Some(text)) => return Poll::Ready(Some(Ok(text))),
                            Ok(None) => return Poll::Ready(None),
                            Err(e) => return Poll::Ready(Some(Err(e))),
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};

    fn delta_event(text: &str) -> String {
        format!(
            "data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":\"{}\"}}]}}}}]}}\n\n",
            text
        )
    }

    #[tokio::test]
    async fn test_token_stream_yields_deltas_in_order() {
        let body = format!("{}{}{}", delta_event("Hello"), delta_event(", "), delta_event("world"));
        let byte_stream = stream::iter(vec![Ok(Bytes::from(body))]);
        let mut tokens = TokenStream::new(byte_stream);

        assert_eq!(tokens.next().await.unwrap().unwrap(), "Hello");
        assert_eq!(tokens.next().await.unwrap().unwrap(), ", ");
        assert_eq!(tokens.next().await.unwrap().unwrap(), "world");
        assert!(tokens.next().await.is_none());
    }

    #[tokio::test]
    async fn test_token_stream_handles_chunked_events() {
        let event = delta_event("split");
        let (a, b) = event.split_at(20);
        let byte_stream = stream::iter(vec![
            Ok(Bytes::from(a.to_string())),
            Ok(Bytes::from(b.to_string())),
        ]);
        let mut tokens = TokenStream::new(byte_stream);

        assert_eq!(tokens.next().await.unwrap().unwrap(), "split");
        assert!(tokens.next().await.is_none());
    }

    #[tokio::test]
    async fn test_token_stream_multibyte_char_split_across_chunks() {
        let bytes = delta_event("café au lait").into_bytes();
        // Split inside the two-byte 'é' sequence.
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let (a, b) = bytes.split_at(split);
        let byte_stream = stream::iter(vec![
            Ok(Bytes::copy_from_slice(a)),
            Ok(Bytes::copy_from_slice(b)),
        ]);
        let mut tokens = TokenStream::new(byte_stream);

        assert_eq!(tokens.next().await.unwrap().unwrap(), "café au lait");
        assert!(tokens.next().await.is_none());
    }

    #[tokio::test]
    async fn test_token_stream_skips_textless_events() {
        let body = format!(
            "{}data: {{\"usageMetadata\":{{\"totalTokenCount\":42}}}}\n\n{}",
            delta_event("a"),
            delta_event("b")
        );
        let byte_stream = stream::iter(vec![Ok(Bytes::from(body))]);
        let mut tokens = TokenStream::new(byte_stream);

        assert_eq!(tokens.next().await.unwrap().unwrap(), "a");
        assert_eq!(tokens.next().await.unwrap().unwrap(), "b");
        assert!(tokens.next().await.is_none());
    }

    #[tokio::test]
    async fn test_token_stream_surfaces_error_events() {
        let body = format!(
            "{}data: {{\"error\":{{\"code\":429,\"message\":\"quota\"}}}}\n\n",
            delta_event("partial")
        );
        let byte_stream = stream::iter(vec![Ok(Bytes::from(body))]);
        let mut tokens = TokenStream::new(byte_stream);

        assert_eq!(tokens.next().await.unwrap().unwrap(), "partial");
        let err = tokens.next().await.unwrap().unwrap_err();
        assert!(matches!(err, CopilotError::ModelInvocation(_)));
    }

    #[tokio::test]
    async fn test_token_stream_crlf_separators() {
        let body = delta_event("crlf").replace("\n\n", "\r\n\r\n");
        let byte_stream = stream::iter(vec![Ok(Bytes::from(body))]);
        let mut tokens = TokenStream::new(byte_stream);

        assert_eq!(tokens.next().await.unwrap().unwrap(), "crlf");
        assert!(tokens.next().await.is_none());
    }

    #[test]
    fn test_extract_text_concatenates_parts() {
        let json = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "foo" }, { "text": "bar" }
            ]}}]
        });
        assert_eq!(extract_text(&json).unwrap(), "foobar");
    }

    #[test]
    fn test_extract_text_no_candidates() {
        let json = serde_json::json!({ "promptFeedback": {} });
        assert!(extract_text(&json).is_none());
    }

    #[tokio::test]
    async fn test_generate_structured_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let reply = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "{\"answer\":42}" }
            ]}}]
        });
        let mock = server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"/models/gemini-1.5-flash:generateContent.*".into()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply.to_string())
            .create_async()
            .await;

        let client =
            GeminiClient::with_base_url("test-key".into(), 30, server.url()).unwrap();
        let schema = serde_json::json!({ "type": "OBJECT" });
        let text = client
            .generate_structured("gemini-1.5-flash", "system", "user", &schema)
            .await
            .unwrap();
        assert_eq!(text, "{\"answer\":42}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_structured_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"/models/.*:generateContent.*".into()),
            )
            .with_status(429)
            .with_body(r#"{"error":{"message":"rate limited"}}"#)
            .create_async()
            .await;

        let client =
            GeminiClient::with_base_url("test-key".into(), 30, server.url()).unwrap();
        let schema = serde_json::json!({ "type": "OBJECT" });
        let err = client
            .generate_structured("gemini-1.5-flash", "s", "u", &schema)
            .await
            .unwrap_err();
        assert!(matches!(err, CopilotError::ModelInvocation(_)));
        assert!(err.to_string().contains("429"));
    }
}
