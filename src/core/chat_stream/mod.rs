//! Transport client for OpenAI-compatible chat completion endpoints.
//!
//! [`ChatClient::send`] exposes a streamed completion as a lazy sequence of
//! content increments. Nothing touches the network until the sequence is
//! first polled, and it stops reading as soon as its cancellation token
//! fires or the consumer drops it.

mod error;
pub mod sse;

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ChatMessage, ChatRequest, CompletionResponse};
use crate::core::config::AppSettings;
use crate::core::message::Message;
use crate::utils::url::parse_api_url;

pub use error::{format_api_error, ChatError};
use sse::{SseDecoder, SseEvent};

pub const CHAT_COMPLETIONS_ENDPOINT: &str = "chat/completions";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Seam between the conversation runtime and the network.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Start a streamed completion. The returned sequence is finite and
    /// cannot be restarted.
    fn stream(
        &self,
        messages: Vec<Message>,
        settings: &AppSettings,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<String, ChatError>>;

    /// Request a complete, non-streamed answer.
    async fn complete(
        &self,
        messages: Vec<Message>,
        settings: &AppSettings,
    ) -> Result<String, ChatError>;
}

/// Map conversation messages onto a request body.
///
/// A non-blank system prompt from the settings is sent first; the messages
/// follow in their original order.
pub fn build_request(messages: &[Message], settings: &AppSettings, stream: bool) -> ChatRequest {
    let mut api_messages = Vec::with_capacity(messages.len() + 1);
    if !settings.system_prompt.trim().is_empty() {
        api_messages.push(ChatMessage {
            role: "system".to_string(),
            content: settings.system_prompt.clone(),
        });
    }
    api_messages.extend(messages.iter().map(ChatMessage::from));

    ChatRequest {
        model: settings.model.clone(),
        messages: api_messages,
        stream,
        max_tokens: settings.max_tokens,
        temperature: Some(settings.clamped_temperature()),
    }
}

#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new() -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(ChatError::from_transport)?;
        Ok(Self { http })
    }

    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Stream a completion as content increments.
    ///
    /// Configuration, connection and HTTP status failures are yielded as a
    /// single `Err` item that ends the sequence. Increments yielded before a
    /// failure stay valid.
    pub fn send(
        &self,
        messages: &[Message],
        settings: &AppSettings,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<String, ChatError>> + Send + 'static {
        let initial = match parse_api_url(&settings.server_url, CHAT_COMPLETIONS_ENDPOINT) {
            Ok(url) => {
                let request = build_request(messages, settings, true);
                debug!(
                    url = %url,
                    model = %request.model,
                    messages = request.messages.len(),
                    "Opening completion stream"
                );
                StreamState::Connect {
                    request: self
                        .http
                        .post(url)
                        .header("Content-Type", "application/json")
                        .header("Accept", "text/event-stream")
                        .json(&request),
                    cancel,
                }
            }
            Err(err) => StreamState::Failed(err),
        };

        stream::unfold(initial, advance)
    }

    /// Request a full completion with `stream = false`.
    pub async fn send_once(
        &self,
        messages: &[Message],
        settings: &AppSettings,
    ) -> Result<String, ChatError> {
        let url = parse_api_url(&settings.server_url, CHAT_COMPLETIONS_ENDPOINT)?;
        let request = build_request(messages, settings, false);

        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(settings.request_timeout())
            .json(&request)
            .send()
            .await
            .map_err(ChatError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ChatError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(ChatError::from_transport)?;
        let completion: CompletionResponse =
            serde_json::from_str(&body).map_err(ChatError::from_decode)?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::Decode {
                message: "response contained no message content".to_string(),
            })
    }
}

#[async_trait]
impl CompletionBackend for ChatClient {
    fn stream(
        &self,
        messages: Vec<Message>,
        settings: &AppSettings,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<String, ChatError>> {
        self.send(&messages, settings, cancel).boxed()
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        settings: &AppSettings,
    ) -> Result<String, ChatError> {
        self.send_once(&messages, settings).await
    }
}

enum StreamState {
    Connect {
        request: reqwest::RequestBuilder,
        cancel: CancellationToken,
    },
    Reading {
        body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
        decoder: SseDecoder,
        pending: VecDeque<String>,
        cancel: CancellationToken,
    },
    Failed(ChatError),
    Finished,
}

fn queue_increments(pending: &mut VecDeque<String>, events: Vec<SseEvent>) {
    pending.extend(events.into_iter().filter_map(|event| match event {
        SseEvent::Increment(content) => Some(content),
        SseEvent::Done => None,
    }));
}

async fn advance(mut state: StreamState) -> Option<(Result<String, ChatError>, StreamState)> {
    loop {
        state = match state {
            StreamState::Finished => return None,
            StreamState::Failed(err) => return Some((Err(err), StreamState::Finished)),
            StreamState::Connect { request, cancel } => {
                let response = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    response = request.send() => response,
                };

                match response {
                    Err(err) => StreamState::Failed(ChatError::from_transport(err)),
                    Ok(response) if !response.status().is_success() => {
                        let status = response.status().as_u16();
                        let body = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return None,
                            text = response.text() => {
                                text.unwrap_or_else(|_| "<no body>".to_string())
                            }
                        };
                        StreamState::Failed(ChatError::Server { status, body })
                    }
                    Ok(response) => StreamState::Reading {
                        body: response
                            .bytes_stream()
                            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                            .boxed(),
                        decoder: SseDecoder::new(),
                        pending: VecDeque::new(),
                        cancel,
                    },
                }
            }
            StreamState::Reading {
                mut body,
                mut decoder,
                mut pending,
                cancel,
            } => {
                if cancel.is_cancelled() {
                    return None;
                }
                if let Some(increment) = pending.pop_front() {
                    return Some((
                        Ok(increment),
                        StreamState::Reading {
                            body,
                            decoder,
                            pending,
                            cancel,
                        },
                    ));
                }
                if decoder.is_done() {
                    return None;
                }

                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    next = body.next() => next,
                };
                match next {
                    Some(Ok(bytes)) => queue_increments(&mut pending, decoder.push(&bytes)),
                    Some(Err(err)) => {
                        return Some((Err(ChatError::from_transport(err)), StreamState::Finished))
                    }
                    None => queue_increments(&mut pending, decoder.finish()),
                }

                StreamState::Reading {
                    body,
                    decoder,
                    pending,
                    cancel,
                }
            }
        };
    }
}

#[cfg(test)]
mod tests;
