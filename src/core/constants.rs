//! Shared constants used across the application

/// Serving host used when neither the config file nor `--host` sets one.
pub const DEFAULT_HOST: &str = "http://localhost:8000";

pub const DEFAULT_CONSUMER_GROUP: &str = "primary";

/// Prepended to flattened chat prompts sent to the native endpoint.
pub const DEFAULT_SYSTEM_PROMPT: &str = "The following is a discussion between a human and a knowledgeable and empathetic assistant. You are the Assistant. Please give a single response, in your role as the Assistant. \n\n";

pub const DEFAULT_USER_NAME: &str = "user";
pub const DEFAULT_BOT_NAME: &str = "assistant";

pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;

/// Malformed frames tolerated in a row before a stream is abandoned.
pub const DEFAULT_MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 3;

/// Environment variable holding the `tracing` filter directive.
pub const LOG_FILTER_ENV: &str = "TAKEOFF_LOG";
