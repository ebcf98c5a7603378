//! Maps Intercom conversation webhooks onto [`CanonicalMessage`].
//!
//! Creation topics relay the conversation `source`; reply, note, close and
//! open topics relay the most recent conversation part. Every other topic,
//! and events without message content, are skipped rather than rejected.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::model::{AuthorKind, CanonicalMessage, EventKind};
use crate::normalize::model::{Author, Conversation, NotificationEnvelope};

pub mod model;

pub const MAX_BODY_CHARS: usize = 3000;
pub const TRUNCATION_MARKER: &str = "… [truncated]";

/// A payload the relay cannot interpret. Callers drop the event and log it.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("invalid envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("invalid conversation item: {0}")]
    Item(#[source] serde_json::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unsupported author type: {0}")]
    UnknownAuthorType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Message(CanonicalMessage),
    Skip(&'static str),
}

pub fn normalize(raw: &Value) -> Result<Normalized, NormalizeError> {
    let envelope = NotificationEnvelope::deserialize(raw).map_err(NormalizeError::Envelope)?;

    let Some(event_kind) = message_event(&envelope.topic) else {
        debug!(topic = %envelope.topic, "ignoring topic without a new message");
        return Ok(Normalized::Skip("topic carries no new message"));
    };

    let item = envelope
        .data
        .and_then(|d| d.item)
        .ok_or(NormalizeError::MissingField("data.item"))?;
    let conversation = Conversation::deserialize(item).map_err(NormalizeError::Item)?;

    // (message id, raw body, author, created_at) of the most recent message.
    let latest = match event_kind {
        EventKind::ConversationCreated => conversation.source.map(|s| {
            (s.id, s.body, s.author, conversation.created_at)
        }),
        EventKind::ConversationReply => conversation
            .conversation_parts
            .and_then(|p| p.conversation_parts.into_iter().last())
            .map(|p| (p.id, p.body, p.author, p.created_at)),
    };

    let Some((message_id, raw_body, author, created_at)) = latest else {
        return Ok(Normalized::Skip("no message in payload"));
    };

    let body = raw_body.as_deref().map(strip_markup).unwrap_or_default();
    if body.is_empty() {
        return Ok(Normalized::Skip("message has no content"));
    }

    let message_id = message_id.ok_or(NormalizeError::MissingField("message id"))?;
    let author = author.ok_or(NormalizeError::MissingField("author"))?;
    let author_kind = author_kind(&author)?;

    let created_at = created_at
        .or(envelope.created_at)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    let author_name = author
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| author.email.clone())
        .unwrap_or_else(|| fallback_name(author_kind).to_string());

    Ok(Normalized::Message(CanonicalMessage {
        id: message_id,
        conversation_id: conversation.id,
        event_kind,
        author_kind,
        author_id: author.id,
        author_name,
        author_contact: author.email.filter(|e| !e.trim().is_empty()),
        body: truncate_body(&body, MAX_BODY_CHARS),
        created_at,
    }))
}

/// Topics that add a message to a conversation. Everything else (reads,
/// ratings, assignment, priority, tags) repeats parts that were already relayed.
fn message_event(topic: &str) -> Option<EventKind> {
    match topic {
        "conversation.user.created" | "conversation.admin.single.created" => {
            Some(EventKind::ConversationCreated)
        }
        // Close and open parts only count when they carry a body.
        "conversation.user.replied"
        | "conversation.admin.replied"
        | "conversation.admin.noted"
        | "conversation.admin.closed"
        | "conversation.admin.opened" => Some(EventKind::ConversationReply),
        _ => None,
    }
}

fn author_kind(author: &Author) -> Result<AuthorKind, NormalizeError> {
    let typ = author
        .typ
        .as_deref()
        .ok_or(NormalizeError::MissingField("author.type"))?;
    AuthorKind::from_provider(typ).ok_or_else(|| NormalizeError::UnknownAuthorType(typ.to_string()))
}

fn fallback_name(kind: AuthorKind) -> &'static str {
    match kind {
        AuthorKind::PrimaryUser => "Unknown user",
        AuthorKind::Lead => "Unknown lead",
        AuthorKind::Staff => "Support team",
        AuthorKind::System => "Bot",
    }
}

static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\s*br\s*/?\s*>").unwrap());
static BLOCK_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*/\s*(p|div|li|h[1-6]|blockquote|pre|tr)\s*>").unwrap()
});
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\s*li(\s[^>]*)?>").unwrap());
static IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\s*img\b[^>]*>").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Convert an HTML fragment to plain text.
pub fn strip_markup(html: &str) -> String {
    let text = LINE_BREAK.replace_all(html, "\n");
    let text = BLOCK_END.replace_all(&text, "\n");
    let text = LIST_ITEM.replace_all(&text, "• ");
    let text = IMAGE.replace_all(&text, "[image]");
    let text = TAG.replace_all(&text, "");
    let text = ENTITY.replace_all(&text, |caps: &Captures| decode_entity(&caps[0], &caps[1]));

    let joined = text
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_RUN.replace_all(&joined, "\n\n").trim().to_string()
}

fn decode_entity(whole: &str, name: &str) -> String {
    let decoded = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
        }
    };
    decoded.map(String::from).unwrap_or_else(|| whole.to_string())
}

/// Cap `body` at `max_chars` characters, appending [`TRUNCATION_MARKER`] when cut.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        None => body.to_string(),
        Some((cut, _)) => format!("{}{}", body[..cut].trim_end(), TRUNCATION_MARKER),
    }
}
