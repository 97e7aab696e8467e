//! Structured ticket classification.
//!
//! A single static instruction prompt enumerates the closed vocabularies
//! (topic tags, sentiment, priority) with per-value descriptions, and the
//! model call is constrained by a JSON response schema so field presence
//! and types are enforced at the call boundary. No ticket-specific few-shot
//! examples; the prompt never changes within a process.
//!
//! Classification is best-effort: temperature 0 minimizes sampling
//! variance, but output is not guaranteed bit-identical across calls.

use async_trait::async_trait;

use crate::error::CopilotError;
use crate::llm::GeminiClient;
use crate::models::Classification;

/// Closed topic vocabulary. 1–3 tags per ticket.
pub const TOPIC_TAGS: [&str; 17] = [
    "How-to",
    "Product",
    "Connector",
    "Lineage",
    "API/SDK",
    "SSO",
    "Glossary",
    "Best practices",
    "Sensitive data",
    "Bug",
    "Feature request",
    "Documentation",
    "Performance",
    "Integration",
    "Security",
    "Onboarding",
    "Troubleshooting",
];

/// Closed sentiment vocabulary.
pub const SENTIMENTS: [&str; 8] = [
    "Frustrated",
    "Angry",
    "Curious",
    "Neutral",
    "Satisfied",
    "Confused",
    "Urgent",
    "Appreciative",
];

/// Closed priority vocabulary, fixed label format.
pub const PRIORITIES: [&str; 3] = ["P0 (High)", "P1 (Medium)", "P2 (Low)"];

/// Topics whose questions are answerable from the documentation corpus.
/// Anything else is routed to a specialist team instead of the answer
/// generator. Compared case-insensitively.
pub const ROUTABLE_TOPICS: [&str; 8] = [
    "how-to",
    "product",
    "best practices",
    "api/sdk",
    "sso",
    "glossary",
    "lineage",
    "connector",
];

const SYSTEM_PROMPT: &str = "\
You are an expert customer support analyst specializing in data platform and analytics tools.

Analyze the following ticket and provide comprehensive classification:

TOPIC TAGS - Choose 1-3 most relevant from:
- How-to: Step-by-step guidance requests
- Product: General product questions or feedback
- Connector: Data source connection issues
- Lineage: Data lineage and flow questions
- API/SDK: Programming interface questions
- SSO: Single sign-on and authentication
- Glossary: Data dictionary and terminology
- Best practices: Methodology and optimization
- Sensitive data: Privacy and security concerns
- Bug: System errors or malfunctions
- Feature request: New capability suggestions
- Documentation: Missing or unclear docs
- Performance: Speed and efficiency issues
- Integration: Third-party tool connections
- Security: Access control and permissions
- Onboarding: New user setup and training
- Troubleshooting: Problem diagnosis help

SENTIMENT - Assess the user's emotional state:
- Frustrated: Repeated issues, blocked workflow
- Angry: Strong negative emotions, escalation language
- Curious: Learning-focused, exploratory questions
- Neutral: Matter-of-fact, professional tone
- Satisfied: Positive feedback or acknowledgment
- Confused: Unclear about concepts or processes
- Urgent: Time-sensitive, business-critical needs
- Appreciative: Thankful, positive interaction

PRIORITY - Business impact assessment:
- P0 (High): Production issues, angry customers, security concerns, complete workflow blockage
- P1 (Medium): Important features needed, significant delays, frustrated users
- P2 (Low): General questions, nice-to-have features, documentation requests

SUMMARY: Provide a concise overview of the main issue
SUGGESTED_ACTION: Recommend next steps or team assignment";

/// The response schema sent with every classification call. Enumerated
/// fields are constrained to the closed vocabularies.
pub fn classification_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "topic_tags": {
                "type": "ARRAY",
                "items": { "type": "STRING", "enum": TOPIC_TAGS },
                "minItems": 1,
                "maxItems": 3,
            },
            "sentiment": { "type": "STRING", "enum": SENTIMENTS },
            "priority": { "type": "STRING", "enum": PRIORITIES },
            "summary": { "type": "STRING" },
            "suggested_action": { "type": "STRING" },
        },
        "required": ["topic_tags", "sentiment", "priority", "summary", "suggested_action"],
    })
}

/// The classification boundary. A trait so the bulk pipeline and tests can
/// substitute the model call.
#[async_trait]
pub trait TicketClassifier: Send + Sync {
    /// Classify raw ticket text. Fails with
    /// [`CopilotError::ModelInvocation`] when the model call errors or the
    /// output cannot be coerced to the schema. No internal retry — the
    /// caller decides.
    async fn classify(&self, ticket_text: &str) -> Result<Classification, CopilotError>;
}

/// Production classifier backed by the Gemini API.
pub struct GeminiClassifier {
    client: GeminiClient,
    model: String,
    schema: serde_json::Value,
}

impl GeminiClassifier {
    pub fn new(client: GeminiClient, model: String) -> Self {
        Self {
            client,
            model,
            schema: classification_schema(),
        }
    }
}

#[async_trait]
impl TicketClassifier for GeminiClassifier {
    async fn classify(&self, ticket_text: &str) -> Result<Classification, CopilotError> {
        let user = format!("Ticket Content:\n{}", ticket_text);

        let text = self
            .client
            .generate_structured(&self.model, SYSTEM_PROMPT, &user, &self.schema)
            .await?;

        let classification: Classification = serde_json::from_str(&text).map_err(|e| {
            CopilotError::ModelInvocation(format!(
                "classification did not match schema: {} (payload: {})",
                e, text
            ))
        })?;

        if classification.topic_tags.is_empty() {
            return Err(CopilotError::ModelInvocation(
                "classification returned no topic tags".to_string(),
            ));
        }

        Ok(classification)
    }
}

impl Classification {
    /// Whether this classification routes to the grounded answer
    /// generator (at least one topic tag is answerable from docs).
    pub fn is_routable(&self) -> bool {
        self.topic_tags
            .iter()
            .any(|t| ROUTABLE_TOPICS.contains(&t.to_lowercase().as_str()))
    }

    /// The canned response shown when a ticket is routed to a specialist
    /// team instead of the answer generator.
    pub fn routing_notice(&self) -> String {
        let topic = self
            .topic_tags
            .first()
            .map(String::as_str)
            .unwrap_or("General");
        format!(
            "This ticket has been classified as a '{}' issue and has been routed to the appropriate specialist team based on its {} priority level.",
            topic, self.priority
        )
    }

    /// Vocabulary membership checks, used by tests and consumers that want
    /// to verify the model boundary's contract.
    pub fn is_vocabulary_valid(&self) -> bool {
        let tags_ok = !self.topic_tags.is_empty()
            && self.topic_tags.len() <= 3
            && self.topic_tags.iter().all(|t| TOPIC_TAGS.contains(&t.as_str()));
        let sentiment_ok = SENTIMENTS.contains(&self.sentiment.as_str());
        let priority_ok = PRIORITIES.contains(&self.priority.as_str());
        tags_ok && sentiment_ok && priority_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(tags: &[&str], priority: &str) -> Classification {
        Classification {
            topic_tags: tags.iter().map(|t| t.to_string()).collect(),
            sentiment: "Curious".into(),
            priority: priority.into(),
            summary: "summary".into(),
            suggested_action: "action".into(),
        }
    }

    #[test]
    fn test_schema_enumerates_closed_vocabularies() {
        let schema = classification_schema();
        let tag_enum = &schema["properties"]["topic_tags"]["items"]["enum"];
        assert_eq!(tag_enum.as_array().unwrap().len(), 17);
        let sentiment_enum = &schema["properties"]["sentiment"]["enum"];
        assert_eq!(sentiment_enum.as_array().unwrap().len(), 8);
        let priority_enum = &schema["properties"]["priority"]["enum"];
        assert_eq!(priority_enum.as_array().unwrap().len(), 3);
        assert_eq!(schema["required"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_sso_question_is_routable() {
        let c = classification(&["SSO"], "P1 (Medium)");
        assert!(c.is_routable());
    }

    #[test]
    fn test_feature_request_is_not_routable() {
        let c = classification(&["Feature request"], "P2 (Low)");
        assert!(!c.is_routable());
    }

    #[test]
    fn test_routing_is_case_insensitive() {
        let c = classification(&["Lineage", "Documentation"], "P2 (Low)");
        assert!(c.is_routable());
    }

    #[test]
    fn test_routing_notice_names_topic_and_priority() {
        let c = classification(&["Bug"], "P0 (High)");
        let notice = c.routing_notice();
        assert!(notice.contains("'Bug'"));
        assert!(notice.contains("P0 (High)"));
    }

    #[test]
    fn test_vocabulary_validation() {
        assert!(classification(&["SSO"], "P2 (Low)").is_vocabulary_valid());
        assert!(!classification(&["Nonsense"], "P2 (Low)").is_vocabulary_valid());
        assert!(!classification(&["SSO"], "critical").is_vocabulary_valid());
        assert!(!classification(&[], "P2 (Low)").is_vocabulary_valid());
        assert!(
            !classification(&["SSO", "Bug", "How-to", "Product"], "P2 (Low)")
                .is_vocabulary_valid()
        );
    }

    #[tokio::test]
    async fn test_classifier_parses_schema_valid_payload() {
        let mut server = mockito::Server::new_async().await;
        let payload = serde_json::json!({
            "topic_tags": ["SSO", "How-to"],
            "sentiment": "Curious",
            "priority": "P2 (Low)",
            "summary": "User asks how to configure Azure AD SSO.",
            "suggested_action": "Share the SSO setup guide.",
        });
        let reply = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": payload.to_string() }
            ]}}]
        });
        server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"/models/.*:generateContent.*".into()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply.to_string())
            .create_async()
            .await;

        let client = GeminiClient::with_base_url("k".into(), 30, server.url()).unwrap();
        let classifier = GeminiClassifier::new(client, "gemini-1.5-flash".into());

        let c = classifier
            .classify("How do I set up SSO with Azure AD?")
            .await
            .unwrap();
        assert!(c.is_vocabulary_valid());
        assert!(c.is_routable());
        assert_eq!(c.topic_tags[0], "SSO");
    }

    #[tokio::test]
    async fn test_classifier_rejects_malformed_payload() {
        let mut server = mockito::Server::new_async().await;
        let reply = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "not json at all" }
            ]}}]
        });
        server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"/models/.*:generateContent.*".into()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply.to_string())
            .create_async()
            .await;

        let client = GeminiClient::with_base_url("k".into(), 30, server.url()).unwrap();
        let classifier = GeminiClassifier::new(client, "gemini-1.5-flash".into());

        let err = classifier.classify("anything").await.unwrap_err();
        assert!(matches!(err, CopilotError::ModelInvocation(_)));
    }
}
