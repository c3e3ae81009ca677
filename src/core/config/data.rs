use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::constants::{
    DEFAULT_BOT_NAME, DEFAULT_CONSUMER_GROUP, DEFAULT_HOST, DEFAULT_MAX_CONSECUTIVE_DECODE_ERRORS,
    DEFAULT_READ_TIMEOUT_SECS, DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_NAME,
};
use crate::core::decoder::DecoderConfig;
use crate::core::request::{GrammarConstraint, SamplingParams, Schema};
use crate::utils::url::normalize_host;

/// Generation defaults applied to every request unless overridden on the
/// command line.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct GenerationConfig {
    pub consumer_group: Option<String>,
    pub max_new_tokens: Option<u32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f64>,
    pub temperature: Option<f64>,
    /// Only used by one-shot generation; chat never sends a constraint.
    pub regex_string: Option<String>,
    pub json_schema: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct StreamConfig {
    /// Seconds to wait for the next chunk; 0 disables the limit.
    pub read_timeout_secs: Option<u64>,
    pub max_consecutive_decode_errors: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Serving address of the Takeoff deployment, e.g. `http://localhost:8000`
    pub host: Option<String>,
    pub schema: Option<Schema>,
    pub system_prompt: Option<String>,
    pub user_name: Option<String>,
    pub bot_name: Option<String>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn host(&self) -> String {
        normalize_host(self.host.as_deref().unwrap_or(DEFAULT_HOST))
    }

    pub fn schema(&self) -> Schema {
        self.schema.unwrap_or_default()
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn user_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or(DEFAULT_USER_NAME)
    }

    pub fn bot_name(&self) -> &str {
        self.bot_name.as_deref().unwrap_or(DEFAULT_BOT_NAME)
    }

    pub fn consumer_group(&self) -> &str {
        self.generation
            .consumer_group
            .as_deref()
            .filter(|group| !group.is_empty())
            .unwrap_or(DEFAULT_CONSUMER_GROUP)
    }

    pub fn sampling_params(&self) -> SamplingParams {
        let defaults = SamplingParams::default();
        SamplingParams {
            temperature: self.generation.temperature.unwrap_or(defaults.temperature),
            top_p: self.generation.top_p.unwrap_or(defaults.top_p),
            top_k: self.generation.top_k.unwrap_or(defaults.top_k),
            max_new_tokens: self
                .generation
                .max_new_tokens
                .unwrap_or(defaults.max_new_tokens),
        }
    }

    pub fn grammar_constraint(&self) -> Option<GrammarConstraint> {
        GrammarConstraint::from_parts(
            self.generation.regex_string.as_deref(),
            self.generation.json_schema.as_deref(),
        )
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        let read_timeout = match self
            .stream
            .read_timeout_secs
            .unwrap_or(DEFAULT_READ_TIMEOUT_SECS)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        DecoderConfig {
            max_consecutive_errors: self
                .stream
                .max_consecutive_decode_errors
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_DECODE_ERRORS),
            read_timeout,
        }
    }
}
