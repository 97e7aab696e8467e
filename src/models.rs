//! Core data types that flow through the triage and answering pipelines.

use serde::{Deserialize, Serialize};

/// A raw support ticket. Immutable input; identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub subject: String,
    pub body: String,
}

impl Ticket {
    /// The text handed to the classifier: subject and body separated by a
    /// blank line.
    pub fn classification_text(&self) -> String {
        format!("{}\n\n{}", self.subject, self.body)
    }
}

/// Structured classification of a ticket, produced once by the classifier
/// and treated as immutable once cached.
///
/// The fields are open strings steered by the prompt and the response
/// schema; membership in the closed vocabularies is the model boundary's
/// contract (see [`crate::classify`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// 1–3 tags drawn from the fixed topic vocabulary.
    pub topic_tags: Vec<String>,
    /// One of the fixed sentiment labels.
    pub sentiment: String,
    /// "P0 (High)", "P1 (Medium)" or "P2 (Low)".
    pub priority: String,
    /// Brief 1–2 sentence summary of the ticket's main issue.
    pub summary: String,
    /// Recommended next step or team assignment.
    pub suggested_action: String,
}

/// A ticket together with its classification; the unit of persistence in
/// the bulk classification cache (see the wire format in `pipeline`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedTicket {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub classification: Classification,
}

impl ClassifiedTicket {
    pub fn new(ticket: Ticket, classification: Classification) -> Self {
        Self {
            id: ticket.id,
            subject: ticket.subject,
            body: ticket.body,
            classification,
        }
    }
}

/// A retrieved documentation chunk with its provenance URL.
#[derive(Debug, Clone, PartialEq)]
pub struct DocChunk {
    pub content: String,
    pub source: String,
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a session-scoped conversation. Turns are append-only and
/// never persisted; the core only consumes them as a rendered history
/// string via [`render_history`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

/// Render the most recent `max_turns` turns as the plain-text history block
/// the answer generator consumes. Oldest first, `role: content` per line.
pub fn render_history(turns: &[ConversationTurn], max_turns: usize) -> String {
    let start = turns.len().saturating_sub(max_turns);
    turns[start..]
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_text_joins_with_blank_line() {
        let t = Ticket {
            id: "T-1".into(),
            subject: "Cannot log in".into(),
            body: "SSO redirect loops forever.".into(),
        };
        assert_eq!(
            t.classification_text(),
            "Cannot log in\n\nSSO redirect loops forever."
        );
    }

    #[test]
    fn test_classified_ticket_wire_format() {
        let ct = ClassifiedTicket {
            id: "T-2".into(),
            subject: "s".into(),
            body: "b".into(),
            classification: Classification {
                topic_tags: vec!["SSO".into()],
                sentiment: "Neutral".into(),
                priority: "P2 (Low)".into(),
                summary: "sum".into(),
                suggested_action: "act".into(),
            },
        };
        let json = serde_json::to_value(&ct).unwrap();
        assert_eq!(json["id"], "T-2");
        assert_eq!(json["classification"]["topic_tags"][0], "SSO");
        assert_eq!(json["classification"]["priority"], "P2 (Low)");
    }

    #[test]
    fn test_render_history_bounded_window() {
        let turns: Vec<ConversationTurn> = (0..5)
            .map(|i| ConversationTurn {
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("message {}", i),
                sources: None,
            })
            .collect();

        let rendered = render_history(&turns, 2);
        assert_eq!(rendered, "assistant: message 3\nuser: message 4");
    }

    #[test]
    fn test_render_history_empty() {
        assert_eq!(render_history(&[], 4), "");
    }
}
