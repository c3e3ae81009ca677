//! Named config keys for `takeoff set` / `takeoff unset`.

use std::fmt;
use std::str::FromStr;

use crate::core::config::data::Config;
use crate::core::request::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Host,
    Schema,
    SystemPrompt,
    UserName,
    BotName,
    ConsumerGroup,
    MaxNewTokens,
    TopK,
    TopP,
    Temperature,
    RegexString,
    JsonSchema,
    ReadTimeoutSecs,
    MaxConsecutiveDecodeErrors,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 14] = [
        ConfigKey::Host,
        ConfigKey::Schema,
        ConfigKey::SystemPrompt,
        ConfigKey::UserName,
        ConfigKey::BotName,
        ConfigKey::ConsumerGroup,
        ConfigKey::MaxNewTokens,
        ConfigKey::TopK,
        ConfigKey::TopP,
        ConfigKey::Temperature,
        ConfigKey::RegexString,
        ConfigKey::JsonSchema,
        ConfigKey::ReadTimeoutSecs,
        ConfigKey::MaxConsecutiveDecodeErrors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::Host => "host",
            ConfigKey::Schema => "schema",
            ConfigKey::SystemPrompt => "system-prompt",
            ConfigKey::UserName => "user-name",
            ConfigKey::BotName => "bot-name",
            ConfigKey::ConsumerGroup => "consumer-group",
            ConfigKey::MaxNewTokens => "max-new-tokens",
            ConfigKey::TopK => "top-k",
            ConfigKey::TopP => "top-p",
            ConfigKey::Temperature => "temperature",
            ConfigKey::RegexString => "regex",
            ConfigKey::JsonSchema => "json-schema",
            ConfigKey::ReadTimeoutSecs => "read-timeout",
            ConfigKey::MaxConsecutiveDecodeErrors => "max-decode-errors",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    UnknownKey(String),
    InvalidValue { key: ConfigKey, reason: String },
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::UnknownKey(key) => {
                let known: Vec<_> = ConfigKey::ALL.iter().map(|k| k.name()).collect();
                write!(f, "unknown config key '{key}' (known: {})", known.join(", "))
            }
            KeyError::InvalidValue { key, reason } => {
                write!(f, "invalid value for '{key}': {reason}")
            }
        }
    }
}

impl std::error::Error for KeyError {}

impl FromStr for ConfigKey {
    type Err = KeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.name() == normalized)
            .ok_or_else(|| KeyError::UnknownKey(value.to_string()))
    }
}

fn parse<T: FromStr>(key: ConfigKey, value: &str) -> Result<T, KeyError>
where
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| KeyError::InvalidValue {
        key,
        reason: err.to_string(),
    })
}

impl Config {
    /// Sets `key`, leaving the config untouched if the value is rejected.
    pub fn set_key(&mut self, key: ConfigKey, value: &str) -> Result<(), KeyError> {
        let mut updated = self.clone();
        updated.assign(key, value)?;
        if let Err(err) = updated.sampling_params().validate() {
            return Err(KeyError::InvalidValue {
                key,
                reason: err.to_string(),
            });
        }
        *self = updated;
        Ok(())
    }

    fn assign(&mut self, key: ConfigKey, value: &str) -> Result<(), KeyError> {
        let text = Some(value.to_string());
        match key {
            ConfigKey::Host => self.host = text,
            ConfigKey::Schema => self.schema = Some(parse::<Schema>(key, value)?),
            ConfigKey::SystemPrompt => self.system_prompt = text,
            ConfigKey::UserName => self.user_name = text,
            ConfigKey::BotName => self.bot_name = text,
            ConfigKey::ConsumerGroup => self.generation.consumer_group = text,
            ConfigKey::MaxNewTokens => self.generation.max_new_tokens = Some(parse(key, value)?),
            ConfigKey::TopK => self.generation.top_k = Some(parse(key, value)?),
            ConfigKey::TopP => self.generation.top_p = Some(parse(key, value)?),
            ConfigKey::Temperature => self.generation.temperature = Some(parse(key, value)?),
            ConfigKey::RegexString => self.generation.regex_string = text,
            ConfigKey::JsonSchema => self.generation.json_schema = text,
            ConfigKey::ReadTimeoutSecs => self.stream.read_timeout_secs = Some(parse(key, value)?),
            ConfigKey::MaxConsecutiveDecodeErrors => {
                self.stream.max_consecutive_decode_errors = Some(parse(key, value)?)
            }
        }
        Ok(())
    }

    pub fn unset_key(&mut self, key: ConfigKey) {
        match key {
            ConfigKey::Host => self.host = None,
            ConfigKey::Schema => self.schema = None,
            ConfigKey::SystemPrompt => self.system_prompt = None,
            ConfigKey::UserName => self.user_name = None,
            ConfigKey::BotName => self.bot_name = None,
            ConfigKey::ConsumerGroup => self.generation.consumer_group = None,
            ConfigKey::MaxNewTokens => self.generation.max_new_tokens = None,
            ConfigKey::TopK => self.generation.top_k = None,
            ConfigKey::TopP => self.generation.top_p = None,
            ConfigKey::Temperature => self.generation.temperature = None,
            ConfigKey::RegexString => self.generation.regex_string = None,
            ConfigKey::JsonSchema => self.generation.json_schema = None,
            ConfigKey::ReadTimeoutSecs => self.stream.read_timeout_secs = None,
            ConfigKey::MaxConsecutiveDecodeErrors => {
                self.stream.max_consecutive_decode_errors = None
            }
        }
    }
}
