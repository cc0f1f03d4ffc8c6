//! Outbound messages and inbound command updates over the Telegram Bot API.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

use crate::config::Config;
use crate::error::Error;
use crate::media::Mood;
use crate::subscriptions::SubscriberId;

const API_BASE: &str = "https://api.telegram.org";

/// Long-poll window for `getUpdates`.
pub const POLL_SECS: u64 = 30;

/// Caption text plus an optional animation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub media: Option<&'static str>,
}

impl Notice {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }

    pub fn with_mood(text: impl Into<String>, mood: Mood) -> Self {
        Self {
            text: text.into(),
            media: Some(mood.pick()),
        }
    }
}

/// The message a command came from, so a reply can thread under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub chat: SubscriberId,
    pub message_id: i64,
    /// Public `@name` of the chat, set for channels and public groups.
    pub username: Option<String>,
}

impl Origin {
    /// Whether this message was posted in `chat`, which may be given either
    /// as a numeric id or as `@name`.
    pub fn is_chat(&self, chat: &SubscriberId) -> bool {
        if *chat == self.chat {
            return true;
        }
        match (chat.as_str().strip_prefix('@'), &self.username) {
            (Some(name), Some(username)) => name.eq_ignore_ascii_case(username),
            _ => false,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &SubscriberId, notice: &Notice) -> Result<(), Error>;
    async fn reply(&self, origin: &Origin, notice: &Notice) -> Result<(), Error>;
    async fn set_description(&self, chat: &SubscriberId, text: &str) -> Result<(), Error>;
}

#[derive(Serialize)]
struct TextMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

#[derive(Serialize)]
struct DocumentMessage<'a> {
    chat_id: &'a str,
    document: &'a str,
    caption: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

#[derive(Serialize)]
struct Description<'a> {
    chat_id: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct UpdateQuery {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub username: Option<String>,
}

impl Update {
    /// Text and origin of whatever message this update carries.
    pub fn command_text(&self) -> Option<(&str, Origin)> {
        let message = self.message.as_ref().or(self.channel_post.as_ref())?;
        let text = message.text.as_deref()?;
        Some((
            text,
            Origin {
                chat: SubscriberId::from(message.chat.id),
                message_id: message.message_id,
                username: message.chat.username.clone(),
            },
        ))
    }
}

pub struct TelegramChannel {
    client: Client,
    token: Option<String>,
    timeout: Duration,
}

impl TelegramChannel {
    pub fn new(token: Option<String>, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            token,
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::new(config.telegram.bot_token.clone(), config.probe_timeout())
    }

    async fn call<P, T>(&self, method: &str, payload: &P, timeout: Duration) -> Result<T, Error>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| Error::Delivery("bot token not set".to_string()))?;

        debug!("Calling Telegram method {method}");
        let response: ApiResponse<T> = self
            .client
            .post(format!("{API_BASE}/bot{token}/{method}"))
            .timeout(timeout)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(Error::Delivery(format!(
                "{method} failed: {}",
                response
                    .description
                    .unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }

    async fn deliver(
        &self,
        chat: &SubscriberId,
        notice: &Notice,
        reply_to: Option<i64>,
    ) -> Result<(), Error> {
        match notice.media {
            Some(document) => {
                let payload = DocumentMessage {
                    chat_id: chat.as_str(),
                    document,
                    caption: &notice.text,
                    reply_to_message_id: reply_to,
                };
                self.call::<_, serde_json::Value>("sendDocument", &payload, self.timeout)
                    .await?;
            }
            None => {
                let payload = TextMessage {
                    chat_id: chat.as_str(),
                    text: &notice.text,
                    reply_to_message_id: reply_to,
                };
                self.call::<_, serde_json::Value>("sendMessage", &payload, self.timeout)
                    .await?;
            }
        }
        Ok(())
    }

    /// Long-polls for updates after `offset`.
    pub async fn updates(&self, offset: i64) -> Result<Vec<Update>, Error> {
        let query = UpdateQuery {
            offset,
            timeout: POLL_SECS,
            allowed_updates: &["message", "channel_post"],
        };
        // The request has to outlive the long-poll window
        let timeout = self.timeout + Duration::from_secs(POLL_SECS);
        self.call("getUpdates", &query, timeout).await
    }
}

#[async_trait]
impl Notifier for TelegramChannel {
    async fn send(&self, recipient: &SubscriberId, notice: &Notice) -> Result<(), Error> {
        self.deliver(recipient, notice, None).await
    }

    async fn reply(&self, origin: &Origin, notice: &Notice) -> Result<(), Error> {
        self.deliver(&origin.chat, notice, Some(origin.message_id))
            .await
    }

    async fn set_description(&self, chat: &SubscriberId, text: &str) -> Result<(), Error> {
        let payload = Description {
            chat_id: chat.as_str(),
            description: text,
        };
        self.call::<_, bool>("setChatDescription", &payload, self.timeout)
            .await?;
        Ok(())
    }
}
