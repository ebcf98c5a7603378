use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who wrote a relayed message, as seen by the source platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorKind {
    PrimaryUser,
    Lead,
    Staff,
    System,
}

impl AuthorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorKind::PrimaryUser => "primary-user",
            AuthorKind::Lead => "lead",
            AuthorKind::Staff => "staff",
            AuthorKind::System => "system",
        }
    }

    /// Map a provider author `type` field. `None` for types we do not relay.
    pub fn from_provider(kind: &str) -> Option<Self> {
        match kind {
            "user" => Some(AuthorKind::PrimaryUser),
            "lead" | "contact" => Some(AuthorKind::Lead),
            "admin" | "team" => Some(AuthorKind::Staff),
            "bot" => Some(AuthorKind::System),
            _ => None,
        }
    }
}

/// Whether the source event opened a conversation or added to one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    ConversationCreated,
    ConversationReply,
}

/// Notification category, fixed once at enqueue time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    NewThread,
    NewMessage,
    System,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::NewThread => "new-thread",
            Classification::NewMessage => "new-message",
            Classification::System => "system",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "new-thread" => Some(Classification::NewThread),
            "new-message" => Some(Classification::NewMessage),
            "system" => Some(Classification::System),
            _ => None,
        }
    }

    /// System authors always classify as `System`; otherwise the event kind decides.
    pub fn derive(author: AuthorKind, event: EventKind) -> Self {
        match (author, event) {
            (AuthorKind::System, _) => Classification::System,
            (_, EventKind::ConversationCreated) => Classification::NewThread,
            (_, EventKind::ConversationReply) => Classification::NewMessage,
        }
    }
}

/// Provider-agnostic representation of one chat event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalMessage {
    /// Message-level id from the provider. Never the conversation id.
    pub id: String,
    pub conversation_id: Option<String>,
    pub event_kind: EventKind,
    pub author_kind: AuthorKind,
    pub author_id: Option<String>,
    pub author_name: String,
    pub author_contact: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl CanonicalMessage {
    pub fn classification(&self) -> Classification {
        Classification::derive(self.author_kind, self.event_kind)
    }
}

/// Persisted marker proving a message id has been delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DedupRecord {
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
    pub conversation_id: Option<String>,
    pub notification_kind: Classification,
}

/// Per-author notification switches. Missing rows mean "notify".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPreference {
    pub user_id: String,
    pub notify_new_thread: bool,
    pub notify_new_message: bool,
    pub notify_system: bool,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    pub fn allows(&self, classification: Classification) -> bool {
        match classification {
            Classification::NewThread => self.notify_new_thread,
            Classification::NewMessage => self.notify_new_message,
            Classification::System => self.notify_system,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_event_kind() {
        assert_eq!(
            Classification::derive(AuthorKind::Lead, EventKind::ConversationCreated),
            Classification::NewThread
        );
        assert_eq!(
            Classification::derive(AuthorKind::Staff, EventKind::ConversationReply),
            Classification::NewMessage
        );
        assert_eq!(
            Classification::derive(AuthorKind::System, EventKind::ConversationCreated),
            Classification::System
        );
    }

    #[test]
    fn classification_str_roundtrip() {
        for c in [
            Classification::NewThread,
            Classification::NewMessage,
            Classification::System,
        ] {
            assert_eq!(Classification::parse_kind(c.as_str()), Some(c));
        }
        assert_eq!(Classification::parse_kind("bogus"), None);
    }

    #[test]
    fn author_kind_mapping() {
        assert_eq!(AuthorKind::from_provider("user"), Some(AuthorKind::PrimaryUser));
        assert_eq!(AuthorKind::from_provider("lead"), Some(AuthorKind::Lead));
        assert_eq!(AuthorKind::from_provider("admin"), Some(AuthorKind::Staff));
        assert_eq!(AuthorKind::from_provider("bot"), Some(AuthorKind::System));
        assert_eq!(AuthorKind::from_provider("visitor"), None);
    }
}
