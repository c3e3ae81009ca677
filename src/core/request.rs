//! Canonical generation requests and the pure builder that turns them into
//! backend wire payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{ChatMessage, ChatRequest, GenerateRequest};
use crate::core::message::Role;

/// Which backend API a surface talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// `POST /generate_stream` on the serving port, raw text frames.
    Native,
    /// OpenAI-compatible chat completions on the discovered inference port.
    #[default]
    OpenAi,
}

impl Schema {
    pub fn as_str(self) -> &'static str {
        match self {
            Schema::Native => "native",
            Schema::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schema {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Schema::Native),
            "openai" | "open-ai" => Ok(Schema::OpenAi),
            other => Err(format!("unknown schema '{other}' (expected 'native' or 'openai')")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_new_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.1,
            top_k: 50,
            max_new_tokens: 300,
        }
    }
}

/// Out-of-range sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingError {
    Temperature(f64),
    TopP(f64),
    MaxNewTokens,
}

impl fmt::Display for SamplingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingError::Temperature(value) => {
                write!(f, "temperature must be a finite value >= 0 (got {value})")
            }
            SamplingError::TopP(value) => write!(f, "top_p must be within [0, 1] (got {value})"),
            SamplingError::MaxNewTokens => write!(f, "max_new_tokens must be at least 1"),
        }
    }
}

impl std::error::Error for SamplingError {}

impl SamplingParams {
    pub fn validate(&self) -> Result<(), SamplingError> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(SamplingError::Temperature(self.temperature));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(SamplingError::TopP(self.top_p));
        }
        if self.max_new_tokens == 0 {
            return Err(SamplingError::MaxNewTokens);
        }
        Ok(())
    }
}

/// Optional constrained-decoding payload. Passed through untouched apart from
/// JSON schemas, which are sent as JSON when they parse as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum GrammarConstraint {
    Regex(String),
    JsonSchema(String),
}

impl GrammarConstraint {
    /// Empty strings mean "unset". A regex wins when both are present.
    pub fn from_parts(regex: Option<&str>, json_schema: Option<&str>) -> Option<Self> {
        let non_empty = |value: Option<&str>| value.filter(|v| !v.is_empty()).map(str::to_string);
        non_empty(regex)
            .map(GrammarConstraint::Regex)
            .or_else(|| non_empty(json_schema).map(GrammarConstraint::JsonSchema))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptInput {
    Text(String),
    Messages(Vec<(Role, String)>),
}

/// An immutable generation request; fields are only readable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    input: PromptInput,
    sampling: SamplingParams,
    consumer_group: String,
    constraint: Option<GrammarConstraint>,
}

impl GenerationRequest {
    pub fn new(
        input: PromptInput,
        sampling: SamplingParams,
        consumer_group: impl Into<String>,
        constraint: Option<GrammarConstraint>,
    ) -> Result<Self, SamplingError> {
        sampling.validate()?;
        Ok(Self {
            input,
            sampling,
            consumer_group: consumer_group.into(),
            constraint,
        })
    }

    pub fn input(&self) -> &PromptInput {
        &self.input
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn constraint(&self) -> Option<&GrammarConstraint> {
        self.constraint.as_ref()
    }
}

/// A wire payload for exactly one schema.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum RequestPayload {
    Native(GenerateRequest),
    OpenAi(ChatRequest),
}

impl RequestPayload {
    pub fn schema(&self) -> Schema {
        match self {
            RequestPayload::Native(_) => Schema::Native,
            RequestPayload::OpenAi(_) => Schema::OpenAi,
        }
    }
}

pub fn build(request: &GenerationRequest, schema: Schema) -> RequestPayload {
    match schema {
        Schema::Native => RequestPayload::Native(build_native(request)),
        Schema::OpenAi => RequestPayload::OpenAi(build_openai(request)),
    }
}

fn build_native(request: &GenerationRequest) -> GenerateRequest {
    let text = match &request.input {
        PromptInput::Text(text) => text.clone(),
        PromptInput::Messages(messages) => messages
            .iter()
            .map(|(role, content)| format!("{role}: {content}"))
            .collect::<Vec<_>>()
            .join("\n"),
    };

    let (regex_string, json_schema) = match &request.constraint {
        Some(GrammarConstraint::Regex(regex)) => (Some(regex.clone()), None),
        Some(GrammarConstraint::JsonSchema(schema)) => (None, Some(json_schema_value(schema))),
        None => (None, None),
    };

    GenerateRequest {
        text,
        consumer_group: request.consumer_group.clone(),
        sampling_temperature: request.sampling.temperature,
        sampling_topp: request.sampling.top_p,
        sampling_topk: request.sampling.top_k,
        max_new_tokens: request.sampling.max_new_tokens,
        regex_string,
        json_schema,
    }
}

fn json_schema_value(schema: &str) -> Value {
    serde_json::from_str(schema).unwrap_or_else(|_| Value::String(schema.to_string()))
}

fn build_openai(request: &GenerationRequest) -> ChatRequest {
    let messages = match &request.input {
        PromptInput::Text(text) => vec![ChatMessage::new(Role::User.as_str(), text.clone())],
        PromptInput::Messages(messages) => messages
            .iter()
            .map(|(role, content)| ChatMessage::new(role.as_str(), content.clone()))
            .collect(),
    };

    ChatRequest {
        model: request.consumer_group.clone(),
        messages,
        top_p: request.sampling.top_p,
        max_tokens: request.sampling.max_new_tokens,
        temperature: request.sampling.temperature,
        stream: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(input: PromptInput, constraint: Option<GrammarConstraint>) -> GenerationRequest {
        GenerationRequest::new(
            input,
            SamplingParams {
                temperature: 1.0,
                top_p: 0.5,
                top_k: 10,
                max_new_tokens: 64,
            },
            "primary",
            constraint,
        )
        .expect("valid sampling")
    }

    #[test]
    fn native_payload_has_native_fields_only() {
        let payload = build(&request(PromptInput::Text("Once".into()), None), Schema::Native);
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(
            value,
            json!({
                "text": "Once",
                "consumer_group": "primary",
                "sampling_temperature": 1.0,
                "sampling_topp": 0.5,
                "sampling_topk": 10,
                "max_new_tokens": 64
            })
        );
    }

    #[test]
    fn openai_payload_has_openai_fields_only() {
        let input = PromptInput::Messages(vec![
            (Role::User, "hi".into()),
            (Role::Assistant, "hello".into()),
            (Role::User, "how are you".into()),
        ]);
        let payload = build(
            &request(input, Some(GrammarConstraint::Regex("[a-z]+".into()))),
            Schema::OpenAi,
        );
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(
            value,
            json!({
                "model": "primary",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "how are you"}
                ],
                "top_p": 0.5,
                "max_tokens": 64,
                "temperature": 1.0,
                "stream": true
            })
        );
    }

    #[test]
    fn json_schema_is_sent_as_json_when_it_parses() {
        let parsed = build(
            &request(
                PromptInput::Text("x".into()),
                Some(GrammarConstraint::JsonSchema(r#"{"type":"object"}"#.into())),
            ),
            Schema::Native,
        );
        let value = serde_json::to_value(&parsed).expect("serialize");
        assert_eq!(value["json_schema"], json!({"type": "object"}));
        assert!(value.get("regex_string").is_none());

        let raw = build(
            &request(
                PromptInput::Text("x".into()),
                Some(GrammarConstraint::JsonSchema("{not json".into())),
            ),
            Schema::Native,
        );
        let value = serde_json::to_value(&raw).expect("serialize");
        assert_eq!(value["json_schema"], json!("{not json"));
    }

    #[test]
    fn empty_grammar_strings_count_as_unset() {
        assert_eq!(GrammarConstraint::from_parts(Some(""), Some("")), None);
        assert_eq!(
            GrammarConstraint::from_parts(Some(""), Some("{}")),
            Some(GrammarConstraint::JsonSchema("{}".into()))
        );
        assert_eq!(
            GrammarConstraint::from_parts(Some("a|b"), None),
            Some(GrammarConstraint::Regex("a|b".into()))
        );
    }

    #[test]
    fn out_of_range_sampling_is_rejected() {
        let bad_top_p = SamplingParams {
            top_p: 1.5,
            ..SamplingParams::default()
        };
        assert_eq!(bad_top_p.validate(), Err(SamplingError::TopP(1.5)));

        let no_tokens = SamplingParams {
            max_new_tokens: 0,
            ..SamplingParams::default()
        };
        assert!(GenerationRequest::new(PromptInput::Text("x".into()), no_tokens, "g", None)
            .is_err());
    }

    #[test]
    fn schema_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<Schema>(), Ok(Schema::OpenAi));
        assert_eq!("native".parse::<Schema>(), Ok(Schema::Native));
        assert!("grpc".parse::<Schema>().is_err());
    }
}
