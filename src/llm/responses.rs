use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{RefineError, Result};

use super::{config::LlmConfig, execute_with_retry, ContentPart, Message, Role};

/// Client for the OpenAI `/responses` endpoint.
#[derive(Clone, Debug)]
pub struct ResponsesClient {
    http: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesReply {
    fn into_text(self) -> Option<String> {
        if let Some(text) = self.output_text.filter(|t| !t.is_empty()) {
            return Some(text);
        }
        let joined: Vec<String> = self
            .output
            .into_iter()
            .flat_map(|item| item.content)
            .filter(|c| c.kind == "output_text")
            .filter_map(|c| c.text)
            .collect();
        (!joined.is_empty()).then(|| joined.join(""))
    }
}

impl ResponsesClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub(crate) fn request_body(
        &self,
        messages: &[Message],
        json_mode: bool,
        with_temperature: bool,
    ) -> Value {
        let input: Vec<Value> = messages.iter().map(encode_message).collect();
        let mut body = json!({
            "model": self.config.model,
            "input": input,
        });
        if let (true, Some(temperature)) = (with_temperature, self.config.temperature) {
            body["temperature"] = json!(temperature);
        }
        if json_mode {
            body["text"] = json!({ "format": { "type": "json_object" } });
        }
        body
    }

    /// Some models reject `temperature`; such a 400 is retried once without it.
    pub async fn complete(&self, messages: &[Message], json_mode: bool) -> Result<String> {
        let url = self.config.endpoint("responses");
        let body = self.request_body(messages, json_mode, true);
        match execute_with_retry(&self.config.retry, || self.send(&url, &body)).await {
            Err(err) if self.config.temperature.is_some() && rejects_temperature(&err) => {
                warn!(model = %self.config.model, "Model rejected temperature; retrying without it");
                let body = self.request_body(messages, json_mode, false);
                execute_with_retry(&self.config.retry, || self.send(&url, &body)).await
            }
            other => other,
        }
    }

    async fn send(&self, url: &str, body: &Value) -> Result<String> {
        debug!(url, model = %self.config.model, "POST response");
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

        let reply: ResponsesReply = response.json().await?;
        reply.into_text().ok_or_else(|| RefineError::Api {
            status: status.as_u16(),
            body: "response had no output text".to_string(),
        })
    }
}

fn rejects_temperature(err: &RefineError) -> bool {
    match err {
        RefineError::Api { status: 400, body } => {
            let body = body.to_lowercase();
            body.contains("temperature") && body.contains("not supported")
        }
        _ => false,
    }
}

fn encode_message(message: &Message) -> Value {
    let text_kind = match message.role {
        Role::Assistant => "output_text",
        Role::System | Role::User => "input_text",
    };
    let content: Vec<Value> = message
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => json!({ "type": text_kind, "text": text }),
            ContentPart::Image {
                media_type,
                data_base64,
            } => json!({
                "type": "input_image",
                "image_url": ContentPart::data_url(media_type, data_base64),
            }),
        })
        .collect();
    json!({ "role": message.role.as_str(), "content": content })
}
