//! Pulling structured payloads out of free-form model replies.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{RefineError, Result};

/// Body of the first fenced block, preferring one tagged `lang`.
///
/// Returns `None` when the text has no complete fence.
pub fn fenced_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let tagged = format!("```{lang}");
    let start = text
        .find(&tagged)
        .map(|i| i + tagged.len())
        .or_else(|| text.find("```").map(|i| i + 3))?;
    let rest = &text[start..];
    // skip whatever info string follows the opening fence
    let body_start = rest.find('\n').map_or(0, |n| n + 1);
    let body = &rest[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Content between `<tag>` and `</tag>`, trimmed.
pub fn tagged_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim())
}

/// Best-effort JSON object isolation: a fenced block first, then the span from
/// the first `{` to the last `}`, else the trimmed input.
pub fn extract_json_block(text: &str) -> &str {
    let text = text.trim();
    if let Some(body) = fenced_block(text, "json") {
        if !body.is_empty() {
            return body;
        }
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start <= end => &text[start..=end],
        _ => text,
    }
}

/// JSON schema for `T` as a plain value.
pub fn schema_for<T: JsonSchema>() -> Result<Value> {
    let schema = schemars::schema_for!(T);
    Ok(serde_json::to_value(schema)?)
}

/// Extract, validate against `T`'s schema, then decode.
pub fn parse_structured<T>(raw: &str) -> Result<T>
where
    T: JsonSchema + DeserializeOwned,
{
    let cleaned = extract_json_block(raw);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| RefineError::parse_error(e, raw))?;

    let schema = schema_for::<T>()?;
    let validator =
        jsonschema::validator_for(&schema).map_err(|e| RefineError::Schema(e.to_string()))?;
    if !validator.is_valid(&value) {
        let problems = validator
            .iter_errors(&value)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(RefineError::Validation(problems));
    }

    serde_json::from_value(value).map_err(|e| RefineError::parse_error(e, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Critique {
        feedback: String,
        refined_code: Option<String>,
    }

    #[test]
    fn fenced_block_prefers_language_tag() {
        let text = "Notes:\n```\nplain\n```\nand\n```sql\nSELECT 1;\n```";
        assert_eq!(fenced_block(text, "sql"), Some("SELECT 1;"));
        assert_eq!(fenced_block(text, "python"), Some("plain"));
        assert_eq!(fenced_block("no fences here", "sql"), None);
        assert_eq!(fenced_block("```sql\nunterminated", "sql"), None);
    }

    #[test]
    fn tagged_block_extracts_inner_text() {
        let text = "Here you go\n<execute_python>\nimport matplotlib\n</execute_python>\n";
        assert_eq!(tagged_block(text, "execute_python"), Some("import matplotlib"));
        assert_eq!(tagged_block("<execute_python> open only", "execute_python"), None);
    }

    #[test]
    fn json_block_is_found_inside_prose() {
        let raw = "Sure! {\"feedback\": \"ok\", \"refined_code\": null} Hope that helps.";
        assert_eq!(
            extract_json_block(raw),
            "{\"feedback\": \"ok\", \"refined_code\": null}"
        );
    }

    #[test]
    fn parse_structured_decodes_valid_payload() {
        let raw = "```json\n{\"feedback\": \"Add a title.\", \"refined_code\": \"plt.title('x')\"}\n```";
        let critique: Critique = parse_structured(raw).unwrap();
        assert_eq!(critique.feedback, "Add a title.");
        assert_eq!(critique.refined_code.as_deref(), Some("plt.title('x')"));
    }

    #[test]
    fn parse_structured_reports_prose() {
        let err = parse_structured::<Critique>("I could not critique this.").unwrap_err();
        match err {
            RefineError::ParseWithContext { raw_text, .. } => {
                assert!(raw_text.contains("could not"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_structured_validates_types() {
        let err = parse_structured::<Critique>("{\"feedback\": 42}").unwrap_err();
        assert!(matches!(err, RefineError::Validation(_)));
    }
}
