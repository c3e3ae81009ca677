use crate::core::config::data::Config;
use crate::core::config::keys::ConfigKey;

impl Config {
    /// The stored value for `key`, or `None` when unset.
    pub fn raw_value(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::Host => self.host.clone(),
            ConfigKey::Schema => self.schema.map(|schema| schema.to_string()),
            ConfigKey::SystemPrompt => self.system_prompt.clone(),
            ConfigKey::UserName => self.user_name.clone(),
            ConfigKey::BotName => self.bot_name.clone(),
            ConfigKey::ConsumerGroup => self.generation.consumer_group.clone(),
            ConfigKey::MaxNewTokens => self.generation.max_new_tokens.map(|v| v.to_string()),
            ConfigKey::TopK => self.generation.top_k.map(|v| v.to_string()),
            ConfigKey::TopP => self.generation.top_p.map(|v| v.to_string()),
            ConfigKey::Temperature => self.generation.temperature.map(|v| v.to_string()),
            ConfigKey::RegexString => self.generation.regex_string.clone(),
            ConfigKey::JsonSchema => self.generation.json_schema.clone(),
            ConfigKey::ReadTimeoutSecs => self.stream.read_timeout_secs.map(|v| v.to_string()),
            ConfigKey::MaxConsecutiveDecodeErrors => self
                .stream
                .max_consecutive_decode_errors
                .map(|v| v.to_string()),
        }
    }

    /// The value a session will actually use for `key`.
    pub fn effective_value(&self, key: ConfigKey) -> String {
        let sampling = self.sampling_params();
        let decoder = self.decoder_config();
        match key {
            ConfigKey::Host => self.host(),
            ConfigKey::Schema => self.schema().to_string(),
            ConfigKey::SystemPrompt => self.system_prompt().to_string(),
            ConfigKey::UserName => self.user_name().to_string(),
            ConfigKey::BotName => self.bot_name().to_string(),
            ConfigKey::ConsumerGroup => self.consumer_group().to_string(),
            ConfigKey::MaxNewTokens => sampling.max_new_tokens.to_string(),
            ConfigKey::TopK => sampling.top_k.to_string(),
            ConfigKey::TopP => sampling.top_p.to_string(),
            ConfigKey::Temperature => sampling.temperature.to_string(),
            ConfigKey::RegexString | ConfigKey::JsonSchema => {
                self.raw_value(key).unwrap_or_default()
            }
            ConfigKey::ReadTimeoutSecs => decoder
                .read_timeout
                .map(|limit| limit.as_secs().to_string())
                .unwrap_or_else(|| "0".to_string()),
            ConfigKey::MaxConsecutiveDecodeErrors => decoder.max_consecutive_errors.to_string(),
        }
    }

    pub fn print_all(&self) {
        println!("Current configuration:");
        for key in ConfigKey::ALL {
            match self.raw_value(key) {
                Some(_) => println!("  {key}: {}", display_line(&self.effective_value(key))),
                None => {
                    let effective = self.effective_value(key);
                    if effective.is_empty() {
                        println!("  {key}: (unset)");
                    } else {
                        println!("  {key}: {} (default)", display_line(&effective));
                    }
                }
            }
        }
    }
}

/// Multi-line values such as the system prompt are shown on one line.
fn display_line(value: &str) -> String {
    const MAX_CHARS: usize = 60;
    let flat = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > MAX_CHARS {
        let mut truncated: String = flat.chars().take(MAX_CHARS).collect();
        truncated.push('…');
        truncated
    } else {
        flat
    }
}
