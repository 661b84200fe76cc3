use crate::core::config::data::Config;
use crate::core::config::io::ConfigError;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080/api/v1";
pub const DEFAULT_MODEL: &str = "base";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
/// Ten exchanges of context.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Keys accepted by `set` / `unset`.
pub const CONFIG_KEYS: &[&str] = &[
    "server-url",
    "model",
    "temperature",
    "max-tokens",
    "system-prompt",
    "history-limit",
    "request-timeout",
    "database-path",
];

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

impl Config {
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let trimmed = value.trim();
        match key {
            "server-url" => self.server_url = Some(trimmed.to_string()),
            "model" => self.model = Some(trimmed.to_string()),
            "temperature" => {
                let parsed: f32 = trimmed
                    .parse()
                    .map_err(|_| invalid(key, value, "expected a number"))?;
                if !(0.0..=2.0).contains(&parsed) {
                    return Err(invalid(key, value, "must be between 0.0 and 2.0"));
                }
                self.temperature = Some(parsed);
            }
            "max-tokens" => {
                let parsed: u32 = trimmed
                    .parse()
                    .map_err(|_| invalid(key, value, "expected a positive integer"))?;
                self.max_tokens = Some(parsed);
            }
            "system-prompt" => self.system_prompt = Some(value.to_string()),
            "history-limit" => {
                let parsed: usize = trimmed
                    .parse()
                    .map_err(|_| invalid(key, value, "expected a whole number, 0 for no limit"))?;
                self.history_limit = Some(parsed);
            }
            "request-timeout" => {
                let parsed: u64 = trimmed
                    .parse()
                    .map_err(|_| invalid(key, value, "expected seconds"))?;
                self.request_timeout_secs = Some(parsed);
            }
            "database-path" => self.database_path = Some(trimmed.into()),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), ConfigError> {
        match key {
            "server-url" => self.server_url = None,
            "model" => self.model = None,
            "temperature" => self.temperature = None,
            "max-tokens" => self.max_tokens = None,
            "system-prompt" => self.system_prompt = None,
            "history-limit" => self.history_limit = None,
            "request-timeout" => self.request_timeout_secs = None,
            "database-path" => self.database_path = None,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}
