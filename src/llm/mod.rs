//! Chat-completion access for the call-site adapters.
//!
//! [`LlmClient`] is a closed set of backends behind one `complete` method. The
//! backend is picked once, from [`LlmConfig::api_style`], when the client is
//! built; nothing re-inspects model names per call.

mod chat;
mod config;
pub mod extract;
mod responses;
mod retry;

use std::{path::Path, sync::Arc};

use base64::Engine;
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{RefineError, Result};

pub use chat::ChatClient;
pub use config::{ApiStyle, LlmConfig};
pub use responses::ResponsesClient;
pub use retry::{execute_with_retry, RetryPolicy};

/// Speaker of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// Inline image, base64-encoded.
    Image {
        media_type: String,
        data_base64: String,
    },
}

impl ContentPart {
    pub(crate) fn data_url(media_type: &str, data_base64: &str) -> String {
        format!("data:{media_type};base64,{data_base64}")
    }
}

/// A chat message made of text and image parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// User message carrying text plus an inline image.
    pub fn user_with_image(
        text: impl Into<String>,
        media_type: impl Into<String>,
        data_base64: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::User,
            parts: vec![
                ContentPart::Text(text.into()),
                ContentPart::Image {
                    media_type: media_type.into(),
                    data_base64: data_base64.into(),
                },
            ],
        }
    }

    /// Read an image from disk and attach it to a user message.
    ///
    /// The media type is guessed from the extension and defaults to `image/png`.
    pub async fn user_with_image_file(
        text: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let media_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "image/png".to_string());
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(Self::user_with_image(text, media_type, data))
    }

    /// All text parts joined by newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. }))
    }
}

/// Handler used to short-circuit requests during tests.
///
/// The handler sees a lightweight view of the request and returns the raw
/// completion text.
pub type MockHandler = Arc<dyn Fn(MockRequest) -> Result<String> + Send + Sync>;

/// Minimal view of a request passed to a [`MockHandler`].
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub messages: Vec<Message>,
    /// Whether a JSON object was requested.
    pub json_mode: bool,
}

impl MockRequest {
    /// Role-prefixed text of every message, as a single string.
    pub fn prompt_preview(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.text()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn has_image(&self) -> bool {
        self.messages.iter().any(Message::has_image)
    }

    /// Text of the final message, which carries the actual instruction.
    pub fn last_text(&self) -> String {
        self.messages.last().map(Message::text).unwrap_or_default()
    }
}

/// A completion backend. Cheap to clone.
#[derive(Clone)]
pub enum LlmClient {
    /// OpenAI-compatible `/chat/completions`.
    Chat(ChatClient),
    /// OpenAI `/responses`.
    Responses(ResponsesClient),
    /// In-process handler, no network.
    Mock(MockHandler),
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat(c) => f.debug_tuple("Chat").field(&c.model()).finish(),
            Self::Responses(c) => f.debug_tuple("Responses").field(&c.model()).finish(),
            Self::Mock(_) => f.write_str("Mock"),
        }
    }
}

impl LlmClient {
    /// Build the backend matching `config.api_style`.
    pub fn from_config(config: LlmConfig) -> Result<Self> {
        Ok(match config.api_style {
            ApiStyle::ChatCompletions => Self::Chat(ChatClient::new(config)?),
            ApiStyle::Responses => Self::Responses(ResponsesClient::new(config)?),
        })
    }

    /// Convenience for `from_config(LlmConfig::from_env(model)?)`.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        Self::from_config(LlmConfig::from_env(model)?)
    }

    /// Client that answers every request with `handler`.
    pub fn mock(handler: impl Fn(MockRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self::Mock(Arc::new(handler))
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Chat(c) => c.model(),
            Self::Responses(c) => c.model(),
            Self::Mock(_) => "mock",
        }
    }

    /// Send `messages` and return the completion text.
    #[instrument(skip_all, fields(model = self.model(), messages = messages.len()))]
    pub async fn complete(&self, messages: &[Message]) -> Result<String> {
        self.dispatch(messages, false).await
    }

    /// Ask for a JSON object shaped like `T`, then extract, validate and decode it.
    #[instrument(skip_all, fields(model = self.model(), target = std::any::type_name::<T>()))]
    pub async fn complete_json<T>(&self, messages: &[Message]) -> Result<T>
    where
        T: JsonSchema + DeserializeOwned,
    {
        let schema = serde_json::to_string_pretty(&extract::schema_for::<T>()?)?;
        let mut request = messages.to_vec();
        request.insert(
            0,
            Message::system(format!(
                "Respond with a single JSON object (no prose, no code fences) matching this JSON schema:\n{schema}"
            )),
        );
        let raw = self.dispatch(&request, true).await?;
        extract::parse_structured::<T>(&raw)
    }

    async fn dispatch(&self, messages: &[Message], json_mode: bool) -> Result<String> {
        if messages.is_empty() {
            return Err(RefineError::Context(
                "completion request has no messages".to_string(),
            ));
        }
        let text = match self {
            Self::Chat(client) => client.complete(messages, json_mode).await?,
            Self::Responses(client) => client.complete(messages, json_mode).await?,
            Self::Mock(handler) => handler(MockRequest {
                messages: messages.to_vec(),
                json_mode,
            })?,
        };
        debug!(chars = text.len(), "Completion received");
        Ok(text.trim().to_string())
    }
}
