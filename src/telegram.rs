use async_trait::async_trait;
use reqwest::Url;
use std::fmt;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use teloxide::RequestError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

/// Where relayed messages land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub group_id: i64,
    pub thread_id: Option<i32>,
}

impl Destination {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            group_id: cfg.telegram.group_id,
            thread_id: cfg.telegram.thread_id,
        }
    }
}

/// HTML-formatted text plus an optional link shown as an inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub link: Option<String>,
}

/// Raw outbound failure, shaped like a Bot API error response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("telegram api error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u32>,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send(&self, dest: &Destination, message: &RenderedMessage) -> Result<(), SendError>;
}

#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl fmt::Debug for TelegramSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramSender").finish_non_exhaustive()
    }
}

impl TelegramSender {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot: Bot::new(bot_token),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.telegram.bot_token.clone())
    }
}

#[async_trait]
impl ChatSender for TelegramSender {
    async fn send(&self, dest: &Destination, message: &RenderedMessage) -> Result<(), SendError> {
        let mut request = self
            .bot
            .send_message(ChatId(dest.group_id), message.text.clone())
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true);

        if let Some(thread_id) = dest.thread_id {
            request = request.message_thread_id(thread_id);
        }

        if let Some(link) = message.link.as_deref() {
            match Url::parse(link) {
                Ok(url) => {
                    let button = InlineKeyboardButton::url("Open conversation", url);
                    request = request.reply_markup(InlineKeyboardMarkup::new([[button]]));
                }
                Err(err) => warn!(?err, link, "skipping invalid conversation link"),
            }
        }

        let sent = request.await.map_err(map_request_error)?;
        debug!(chat_id = dest.group_id, message_id = sent.id.0, "telegram message sent");
        Ok(())
    }
}

fn map_request_error(err: RequestError) -> SendError {
    match err {
        RequestError::RetryAfter(wait) => SendError::Api {
            code: 429,
            description: format!("Too Many Requests: retry after {}", wait.as_secs()),
            retry_after: u32::try_from(wait.as_secs()).ok(),
        },
        // The Bot API rejects malformed requests with 400; the description
        // carries the detail the classifier looks at.
        RequestError::Api(api) => SendError::Api {
            code: 400,
            description: api.to_string(),
            retry_after: None,
        },
        other => SendError::Transport(other.to_string()),
    }
}
