use std::error::Error as StdError;
use std::fmt;

/// Failures surfaced by the transport client.
///
/// Undecodable stream fragments never appear here; they are skipped while
/// reading. `Decode` only covers whole bodies (non-streaming completions,
/// model listings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The configured server address cannot be used. Not retried.
    Configuration { url: String, reason: String },
    /// Connection or transport failure while sending or reading.
    Network { message: String },
    /// The server answered with a non-2xx status.
    Server { status: u16, body: String },
    /// A complete response body did not have the expected shape.
    Decode { message: String },
}

impl ChatError {
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return ChatError::Configuration {
                url: err
                    .url()
                    .map(|url| url.to_string())
                    .unwrap_or_default(),
                reason: err.to_string(),
            };
        }
        ChatError::Network {
            message: err.without_url().to_string(),
        }
    }

    pub(crate) fn from_decode(err: serde_json::Error) -> Self {
        ChatError::Decode {
            message: err.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ChatError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text suitable for an error banner.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Server { status, body } => {
                format!("HTTP {status}\n{}", format_api_error(body))
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Configuration { url, reason } => {
                write!(f, "Invalid server URL '{url}': {reason}")
            }
            ChatError::Network { message } => write!(f, "Network error: {message}"),
            ChatError::Server { status, body } => {
                let body = body.trim();
                if body.is_empty() {
                    write!(f, "Server returned HTTP {status}")
                } else {
                    write!(f, "Server returned HTTP {status}: {body}")
                }
            }
            ChatError::Decode { message } => write!(f, "Failed to decode response: {message}"),
        }
    }
}

impl StdError for ChatError {}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Render an error body for display, pretty-printing JSON when possible.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
                return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}
