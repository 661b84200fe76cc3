//! Endpoint address handling.
//!
//! Server URLs come from user configuration, so they are normalized before
//! an endpoint path is appended and validated before any request is built.

use reqwest::Url;

use crate::core::chat_stream::ChatError;

/// Strip trailing slashes from a base URL.
///
/// ```
/// use threadline::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://127.0.0.1:8080/api/v1/"), "http://127.0.0.1:8080/api/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path without doubling slashes.
///
/// ```
/// use threadline::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:8080/v1///", "/chat/completions"),
///     "http://localhost:8080/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Build and validate an endpoint URL.
///
/// Anything that is not an absolute http(s) URL with a host is a
/// configuration error; those are never retried.
pub fn parse_api_url(base_url: &str, endpoint: &str) -> Result<Url, ChatError> {
    let candidate = construct_api_url(base_url, endpoint);
    let url = Url::parse(&candidate).map_err(|err| ChatError::Configuration {
        url: base_url.to_string(),
        reason: err.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ChatError::Configuration {
            url: base_url.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ChatError::Configuration {
            url: base_url.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}
