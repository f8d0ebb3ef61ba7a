use std::time::Duration;

use crate::error::{RefineError, Result};

use super::retry::RetryPolicy;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Wire protocol a model is served through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiStyle {
    /// `/chat/completions`, the common OpenAI-compatible surface.
    ChatCompletions,
    /// `/responses`, required by some newer OpenAI models.
    Responses,
}

impl ApiStyle {
    /// Pick the protocol for a model name (provider prefix allowed).
    pub fn infer(model: &str) -> Self {
        let name = normalize_model(model).to_lowercase();
        if name.starts_with("gpt-5") || name.contains("codex-mini") || name.starts_with("gpt-image-")
        {
            Self::Responses
        } else {
            Self::ChatCompletions
        }
    }
}

/// Drop a `provider:` prefix such as `openai:gpt-4o`.
pub(crate) fn normalize_model(model: &str) -> &str {
    model.rsplit_once(':').map_or(model, |(_, name)| name)
}

/// Connection settings for one model.
#[derive(Clone)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    /// Omitted from the request when `None`.
    pub temperature: Option<f32>,
    pub api_style: ApiStyle,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("api_style", &self.api_style)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LlmConfig {
    /// The API style is inferred here, once, from the model name.
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let model = model.into();
        let api_style = ApiStyle::infer(&model);
        Self {
            model: normalize_model(&model).to_string(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: None,
            api_style,
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }

    /// Read `OPENAI_API_KEY` and, when set, `OPENAI_BASE_URL`.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RefineError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let mut config = Self::new(model, api_key);
        if let Some(base_url) = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
        {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Override the inferred protocol, e.g. for a proxy that only speaks chat completions.
    pub fn with_api_style(mut self, api_style: ApiStyle) -> Self {
        self.api_style = api_style;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}
