use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{RefineError, Result};

use super::{config::LlmConfig, execute_with_retry, ContentPart, Message};

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone, Debug)]
pub struct ChatClient {
    http: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub(crate) fn request_body(&self, messages: &[Message], json_mode: bool) -> Value {
        let messages: Vec<Value> = messages.iter().map(encode_message).collect();
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = json!(temperature);
        }
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    pub async fn complete(&self, messages: &[Message], json_mode: bool) -> Result<String> {
        let body = self.request_body(messages, json_mode);
        let url = self.config.endpoint("chat/completions");
        execute_with_retry(&self.config.retry, || self.send(&url, &body)).await
    }

    async fn send(&self, url: &str, body: &Value) -> Result<String> {
        debug!(url, model = %self.config.model, "POST chat completion");
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefineError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RefineError::Api {
                status: status.as_u16(),
                body: "completion had no message content".to_string(),
            })
    }
}

fn encode_message(message: &Message) -> Value {
    let content = if message.has_image() {
        let parts: Vec<Value> = message
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => json!({ "type": "text", "text": text }),
                ContentPart::Image {
                    media_type,
                    data_base64,
                } => json!({
                    "type": "image_url",
                    "image_url": { "url": ContentPart::data_url(media_type, data_base64) },
                }),
            })
            .collect();
        Value::Array(parts)
    } else {
        Value::String(message.text())
    };
    json!({ "role": message.role.as_str(), "content": content })
}
