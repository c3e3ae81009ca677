//! Per-schema decoding of SSE frames into text fragments.

use std::fmt;

use serde_json::Value;

use crate::api::ChatResponse;
use crate::core::api_error::extract_error_summary;
use crate::core::request::Schema;
use crate::core::sse::SseFrame;

/// One decoded piece of generated text.
///
/// Deliberately not `Clone`: a fragment is moved from the decoder to the
/// accumulator and consumed there.
#[derive(Debug, PartialEq, Eq)]
pub struct DeltaFragment {
    text: String,
}

impl DeltaFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The frame could not be parsed at all. Tolerated up to a threshold.
    Malformed(String),
    /// The frame parsed but has the wrong shape, or carries a server error.
    Protocol(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Malformed(message) => write!(f, "malformed frame: {message}"),
            CodecError::Protocol(message) => write!(f, "unexpected frame: {message}"),
        }
    }
}

impl std::error::Error for CodecError {}

pub trait FrameCodec: Send + Sync {
    fn schema(&self) -> Schema;

    /// `Ok(None)` means the frame is the terminal sentinel.
    fn decode(&self, frame: &SseFrame) -> Result<Option<DeltaFragment>, CodecError>;
}

/// Native `/generate_stream`: the frame data is the text delta itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCodec;

impl FrameCodec for NativeCodec {
    fn schema(&self) -> Schema {
        Schema::Native
    }

    fn decode(&self, frame: &SseFrame) -> Result<Option<DeltaFragment>, CodecError> {
        Ok(Some(DeltaFragment::new(frame.data.as_str())))
    }
}

/// OpenAI-compatible chat completion chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiCodec;

impl OpenAiCodec {
    pub const SENTINEL: &'static str = "[DONE]";
}

impl FrameCodec for OpenAiCodec {
    fn schema(&self) -> Schema {
        Schema::OpenAi
    }

    fn decode(&self, frame: &SseFrame) -> Result<Option<DeltaFragment>, CodecError> {
        let payload = frame.data.trim();
        if payload == Self::SENTINEL {
            return Ok(None);
        }
        if payload.is_empty() {
            return Ok(Some(DeltaFragment::new("")));
        }

        let value: Value = serde_json::from_str(payload)
            .map_err(|error| CodecError::Malformed(error.to_string()))?;

        if value.get("error").is_some_and(|error| !error.is_null()) {
            let summary = extract_error_summary(&value)
                .unwrap_or_else(|| "server reported an error mid-stream".to_string());
            return Err(CodecError::Protocol(summary));
        }

        let response: ChatResponse = serde_json::from_value(value).map_err(|error| {
            CodecError::Protocol(format!("not a chat completion chunk: {error}"))
        })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .unwrap_or_default();
        Ok(Some(DeltaFragment::new(content)))
    }
}

pub fn codec_for(schema: Schema) -> Box<dyn FrameCodec> {
    match schema {
        Schema::Native => Box::new(NativeCodec),
        Schema::OpenAi => Box::new(OpenAiCodec),
    }
}
