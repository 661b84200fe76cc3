use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::defaults::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_MODEL, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SERVER_URL,
    DEFAULT_TEMPERATURE,
};

/// On-disk configuration. Every field is optional; unset fields fall back
/// to the defaults when converted into [`AppSettings`].
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the completions server (e.g. `http://127.0.0.1:8080/api/v1`)
    pub server_url: Option<String>,
    /// Model identifier sent with every request
    pub model: Option<String>,
    /// Sampling temperature, clamped to 0.0-2.0 when used
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens; omitted from requests when unset
    pub max_tokens: Option<u32>,
    /// Prepended as a system message when non-blank
    pub system_prompt: Option<String>,
    /// Only the most recent N messages of a thread are sent as context
    /// (20 when unset, 0 for no limit)
    pub history_limit: Option<usize>,
    /// Timeout for non-streaming requests
    pub request_timeout_secs: Option<u64>,
    /// Override for the conversation database location
    pub database_path: Option<PathBuf>,
}

/// Settings consumed when building each request.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub server_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
    pub history_limit: Option<usize>,
    pub request_timeout_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            system_prompt: String::new(),
            history_limit: Some(DEFAULT_HISTORY_LIMIT),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl AppSettings {
    pub fn clamped_temperature(&self) -> f32 {
        if self.temperature.is_nan() {
            return DEFAULT_TEMPERATURE;
        }
        self.temperature.clamp(0.0, 2.0)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Config {
    pub fn to_settings(&self) -> AppSettings {
        let defaults = AppSettings::default();
        AppSettings {
            server_url: self
                .server_url
                .clone()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.server_url),
            model: self
                .model
                .clone()
                .filter(|model| !model.trim().is_empty())
                .unwrap_or(defaults.model),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt.clone().unwrap_or_default(),
            // 0 disables the cap
            history_limit: match self.history_limit {
                Some(0) => None,
                Some(limit) => Some(limit),
                None => defaults.history_limit,
            },
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
        }
    }
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
