use thiserror::Error;

/// Errors surfaced by the refinement loop and its collaborators.
///
/// [`crate::run_refinement`] returns [`RefineError::Config`] for an invalid
/// configuration and [`RefineError::Producer`] when no first candidate could be
/// produced. Other variants come from collaborators (LLM calls, renderers,
/// query runners) and end up in the iteration history.
#[derive(Debug, Error)]
pub enum RefineError {
    /// The first candidate could not be produced, so the run has nothing to return.
    #[error("no initial candidate could be produced: {0}")]
    Producer(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {message}\n\nRaw response:\n{raw_text}\n\nSuggestion: {suggestion}")]
    ParseWithContext {
        message: String,
        raw_text: String,
        suggestion: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Schema generation failed: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Context error: {0}")]
    Context(String),
}

impl RefineError {
    /// Create a parse error with helpful context.
    pub fn parse_error(err: serde_json::Error, raw_text: &str) -> Self {
        let suggestion = Self::suggest_parse_fix(&err, raw_text);
        Self::ParseWithContext {
            message: err.to_string(),
            raw_text: Self::truncate_for_display(raw_text, 500),
            suggestion,
        }
    }

    /// Wrap any displayable failure of the candidate producer.
    pub fn producer(cause: impl std::fmt::Display) -> Self {
        Self::Producer(cause.to_string())
    }

    /// Check if this error is worth retrying at the transport level.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => is_retryable_status(*status),
            Self::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().is_some_and(|s| is_retryable_status(s.as_u16()))
            }
            _ => false,
        }
    }

    /// Get suggested retry delay in seconds, if applicable.
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::Api { status: 429, body } => parse_retry_delay(body),
            Self::Api { status: 503, .. } => Some(5),
            _ => None,
        }
    }

    fn suggest_parse_fix(err: &serde_json::Error, raw_text: &str) -> String {
        let err_msg = err.to_string().to_lowercase();

        if err_msg.contains("expected value at line 1 column 1") {
            if raw_text.trim().is_empty() {
                return "The model returned an empty response. Try adding more context \
                        or adjusting the temperature."
                    .to_string();
            }
            if !raw_text.trim().starts_with(['{', '[']) {
                return "The model returned prose instead of JSON. Ask for a single JSON \
                        object and nothing else."
                    .to_string();
            }
        }

        if err_msg.contains("missing field") {
            return "The model omitted a required field. Repeat the expected keys in the \
                    prompt or make the field optional."
                .to_string();
        }

        if err_msg.contains("invalid type") {
            return "Type mismatch in response. Check that the requested JSON shape matches \
                    the Rust type."
                .to_string();
        }

        "Check that the prompt describes the expected response format.".to_string()
    }

    fn truncate_for_display(text: &str, max_len: usize) -> String {
        if text.len() <= max_len {
            return text.to_string();
        }
        let mut cut = max_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated, {} total chars]", &text[..cut], text.len())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Parse delays like "Please try again in 20s" or "retry in 488ms" out of an error body.
fn parse_retry_delay(body: &str) -> Option<u64> {
    let lower = body.to_lowercase();
    let marker = ["try again in ", "retry in "]
        .iter()
        .find_map(|m| lower.find(m).map(|idx| idx + m.len()))?;
    let remainder = &lower[marker..];
    let end = remainder
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != 'm' && c != 's')
        .unwrap_or(remainder.len());
    parse_duration_string(remainder[..end].trim_end_matches('.'))
}

/// Parse duration strings like "44s", "44.5s", "500ms" into whole seconds.
fn parse_duration_string(s: &str) -> Option<u64> {
    let s = s.trim();

    if let Some(ms_part) = s.strip_suffix("ms") {
        let ms = ms_part.parse::<f64>().ok()?;
        if ms <= 0.0 {
            return Some(0);
        }
        return Some(((ms / 1000.0).ceil() as u64).max(1));
    }

    s.strip_suffix('s')
        .and_then(|secs| secs.parse::<f64>().ok())
        .map(|secs| secs.ceil() as u64)
}

pub type Result<T> = std::result::Result<T, RefineError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn with_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<RefineError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let base_err = e.into();
            RefineError::Context(format!("{}: {}", context.into(), base_err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_is_read_from_rate_limit_body() {
        let err = RefineError::Api {
            status: 429,
            body: "Rate limit reached. Please try again in 20s.".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay(), Some(20));

        let err = RefineError::Api {
            status: 429,
            body: "retry in 488ms".to_string(),
        };
        assert_eq!(err.retry_delay(), Some(1));
    }

    #[test]
    fn trailing_period_does_not_hide_retry_delay() {
        let delay = |body: &str| {
            RefineError::Api {
                status: 429,
                body: body.to_string(),
            }
            .retry_delay()
        };
        assert_eq!(delay("Limit hit. Please try again in 1.5s."), Some(2));
        assert_eq!(delay("Slow down, retry in 250ms."), Some(1));
        assert_eq!(delay("Please try again in 7s. Thanks!"), Some(7));
        assert_eq!(delay("Please try again later."), None);
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = RefineError::Api {
            status: 400,
            body: "bad request".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!RefineError::Producer("boom".into()).is_retryable());
    }

    #[test]
    fn parse_error_suggests_fix_for_prose() {
        let raw = "Sure! Here is the critique.";
        let err = serde_json::from_str::<serde_json::Value>(raw).unwrap_err();
        match RefineError::parse_error(err, raw) {
            RefineError::ParseWithContext { suggestion, .. } => {
                assert!(suggestion.contains("prose"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn with_context_prefixes_message() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::other("disk full"));
        let err = res.with_context("writing run.json").unwrap_err();
        assert!(err.to_string().contains("writing run.json"));
        assert!(err.to_string().contains("disk full"));
    }
}
