//! Intercom webhook payload shapes. Only the fields the relay reads are
//! modelled; everything else is ignored by serde.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Deserialize, Debug)]
pub struct NotificationEnvelope {
    #[serde(default, deserialize_with = "opt_id")]
    pub id: Option<String>,
    pub topic: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub data: Option<NotificationData>,
}

#[derive(Deserialize, Debug)]
pub struct NotificationData {
    #[serde(default)]
    pub item: Option<Value>,
}

#[derive(Deserialize, Debug)]
pub struct Conversation {
    #[serde(default, deserialize_with = "opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub source: Option<ConversationSource>,
    #[serde(default)]
    pub conversation_parts: Option<ConversationParts>,
}

#[derive(Deserialize, Debug)]
pub struct ConversationSource {
    #[serde(default, deserialize_with = "opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub author: Option<Author>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ConversationParts {
    #[serde(default)]
    pub conversation_parts: Vec<ConversationPart>,
}

#[derive(Deserialize, Debug)]
pub struct ConversationPart {
    #[serde(default, deserialize_with = "opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub part_type: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub author: Option<Author>,
}

#[derive(Deserialize, Debug)]
pub struct Author {
    #[serde(rename = "type", default)]
    pub typ: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Intercom sends most ids as strings but some older payloads use numbers.
fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
