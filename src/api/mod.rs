//! Wire payloads exchanged with the serving, management and OpenAI-compatible
//! endpoints of a Takeoff deployment.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Body of `POST {inference_url}` (OpenAI-compatible chat completions).
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub top_p: f64,
    pub max_tokens: u32,
    pub temperature: f64,
    pub stream: bool,
}

/// Body of `POST /generate_stream` on the serving port.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct GenerateRequest {
    pub text: String,
    pub consumer_group: String,
    pub sampling_temperature: f64,
    pub sampling_topp: f64,
    pub sampling_topk: u32,
    pub max_new_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
}

#[derive(Deserialize, Default, Debug)]
pub struct ChatResponseDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ChatResponseChoice {
    #[serde(default)]
    pub delta: ChatResponseDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ChatResponse {
    pub choices: Vec<ChatResponseChoice>,
}

/// `GET /status` on the serving port: `ports[1]` is the management port.
#[derive(Deserialize, Debug)]
pub struct ServingStatus {
    pub ports: Vec<u16>,
}

#[derive(Deserialize, Debug)]
pub struct ManagementConfig {
    pub openai_port: u16,
}

/// `GET {management_url}/status`.
#[derive(Deserialize, Debug)]
pub struct ManagementStatus {
    pub config: ManagementConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ReaderInfo {
    pub reader_id: String,
}

/// `GET {management_url}/reader_groups`, keyed by consumer group.
pub type ReaderGroups = HashMap<String, Vec<ReaderInfo>>;

#[derive(Serialize, Debug)]
pub struct ChatTemplateRequest {
    pub inputs: Vec<Vec<ChatMessage>>,
    pub add_generation_prompt: bool,
}

#[derive(Deserialize, Debug)]
pub struct ChatTemplateResponse {
    pub messages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_omits_unset_grammar_fields() {
        let request = GenerateRequest {
            text: "hi".into(),
            consumer_group: "primary".into(),
            sampling_temperature: 0.7,
            sampling_topp: 0.1,
            sampling_topk: 50,
            max_new_tokens: 300,
            regex_string: None,
            json_schema: None,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        let object = value.as_object().expect("object");
        assert!(!object.contains_key("regex_string"));
        assert!(!object.contains_key("json_schema"));
        assert_eq!(object["consumer_group"], "primary");
    }

    #[test]
    fn chat_response_tolerates_missing_delta() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"finish_reason":"stop"}]}"#).expect("parse");
        assert!(parsed.choices[0].delta.content.is_none());
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn management_status_reads_nested_openai_port() {
        let parsed: ManagementStatus =
            serde_json::from_str(r#"{"config":{"openai_port":3003,"other":true}}"#)
                .expect("parse");
        assert_eq!(parsed.config.openai_port, 3003);
    }
}
