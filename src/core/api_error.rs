//! Formatting of error bodies returned by the inference server, either as a
//! non-2xx response body or as an error object sent inside the event stream.

use serde_json::Value;

/// Pulls a one-line human summary out of common error envelopes:
/// `{"error":{"message":..}}`, `{"error":".."}`, `{"message":..}` and
/// `{"detail":..}`.
pub fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        .or_else(|| value.get("detail").and_then(|v| v.as_str().map(str::to_owned)));

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// Renders an error body for display. JSON bodies are reduced to their
/// summary when one exists; anything else is trimmed and truncated.
pub fn format_api_error(error_text: &str) -> String {
    const MAX_CHARS: usize = 400;

    let trimmed = error_text.trim();
    if trimmed.is_empty() {
        return "<empty response body>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            return summary;
        }
    }

    let mut excerpt: String = trimmed.chars().take(MAX_CHARS).collect();
    if trimmed.chars().count() > MAX_CHARS {
        excerpt.push('…');
    }
    excerpt
}
