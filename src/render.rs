//! Telegram HTML rendering for canonical messages.

use crate::model::{AuthorKind, CanonicalMessage, Classification};
use crate::telegram::RenderedMessage;

#[derive(Debug, Clone, Default)]
pub struct Renderer {
    inbox_url: Option<String>,
}

impl Renderer {
    /// `inbox_url` is a prefix; the conversation id is appended to form the link.
    pub fn new(inbox_url: Option<String>) -> Self {
        Self {
            inbox_url: inbox_url.filter(|u| !u.trim().is_empty()),
        }
    }

    pub fn render(&self, msg: &CanonicalMessage, classification: Classification) -> RenderedMessage {
        let header = match classification {
            Classification::NewThread => "🆕 <b>New conversation</b>",
            Classification::NewMessage => "💬 <b>New message</b>",
            Classification::System => "🤖 <b>System message</b>",
        };

        let mut author = format!(
            "<b>{}</b> ({})",
            escape_html(&msg.author_name),
            author_label(msg.author_kind)
        );
        if let Some(contact) = msg.author_contact.as_deref() {
            author.push_str(" · ");
            author.push_str(&escape_html(contact));
        }

        let text = format!("{}\n{}\n\n{}", header, author, escape_html(&msg.body));

        let link = match (&self.inbox_url, &msg.conversation_id) {
            (Some(base), Some(conv)) => Some(format!("{}{}", base, conv)),
            _ => None,
        };

        RenderedMessage { text, link }
    }
}

fn author_label(kind: AuthorKind) -> &'static str {
    match kind {
        AuthorKind::PrimaryUser => "user",
        AuthorKind::Lead => "lead",
        AuthorKind::Staff => "team",
        AuthorKind::System => "bot",
    }
}

/// Escape the three characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// First `max_chars` characters of `text`, for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}…", &text[..cut]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventKind;
    use chrono::Utc;

    fn message() -> CanonicalMessage {
        CanonicalMessage {
            id: "msg-1".into(),
            conversation_id: Some("conv-1".into()),
            event_kind: EventKind::ConversationCreated,
            author_kind: AuthorKind::Lead,
            author_id: None,
            author_name: "Ada <admin>".into(),
            author_contact: Some("ada@example.com".into()),
            body: "1 < 2 & 3 > 2".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn renders_header_author_and_escaped_body() {
        let out = Renderer::default().render(&message(), Classification::NewThread);
        assert!(out.text.starts_with("🆕 <b>New conversation</b>"));
        assert!(out.text.contains("<b>Ada &lt;admin&gt;</b> (lead) · ada@example.com"));
        assert!(out.text.ends_with("1 &lt; 2 &amp; 3 &gt; 2"));
        assert_eq!(out.link, None);
    }

    #[test]
    fn link_requires_base_and_conversation() {
        let renderer = Renderer::new(Some("https://inbox/conversation/".into()));
        let out = renderer.render(&message(), Classification::NewMessage);
        assert_eq!(out.link.as_deref(), Some("https://inbox/conversation/conv-1"));

        let mut msg = message();
        msg.conversation_id = None;
        assert_eq!(renderer.render(&msg, Classification::NewMessage).link, None);

        assert!(Renderer::new(Some("  ".into())).render(&message(), Classification::NewMessage).link.is_none());
    }

    #[test]
    fn preview_cuts_on_char_boundary() {
        assert_eq!(preview("héllo", 2), "hé…");
        assert_eq!(preview("hi", 10), "hi");
    }
}
