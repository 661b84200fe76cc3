//! Shared fixtures for unit tests: a scripted HTTP server, a scripted
//! completion backend, and temporary stores.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::chat_stream::{ChatError, CompletionBackend};
use crate::core::config::AppSettings;
use crate::core::message::Message;
use crate::core::store::ThreadStore;

/// Client that never routes through an ambient proxy.
pub fn test_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("test client should build")
}

pub fn test_settings(server_url: &str) -> AppSettings {
    AppSettings {
        server_url: server_url.to_string(),
        model: "test-model".to_string(),
        ..AppSettings::default()
    }
}

pub fn temp_store() -> (TempDir, Arc<ThreadStore>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = ThreadStore::open(dir.path().join("threads.sqlite3")).expect("store should open");
    (dir, Arc::new(store))
}

/// Build an SSE `data:` frame for one content increment.
pub fn sse_delta(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
    )
}

enum MockBody {
    Full(String),
    Chunks {
        chunks: Vec<String>,
        hold: Option<CancellationToken>,
    },
}

pub struct MockResponse {
    status: u16,
    content_type: &'static str,
    body: MockBody,
}

impl MockResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: MockBody::Full(body.into()),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: MockBody::Full(body.into()),
        }
    }

    /// Event stream written one chunk at a time, then closed.
    pub fn sse<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: MockBody::Chunks {
                chunks: chunks.into_iter().map(Into::into).collect(),
                hold: None,
            },
        }
    }

    /// Like [`MockResponse::sse`] but the connection stays open until
    /// `release` is cancelled.
    pub fn held_sse<I, S>(chunks: I, release: CancellationToken) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: MockBody::Chunks {
                chunks: chunks.into_iter().map(Into::into).collect(),
                hold: Some(release),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

pub struct MockServer {
    addr: SocketAddr,
    task: JoinHandle<Result<Vec<CapturedRequest>, String>>,
}

impl MockServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for every scripted response to be served.
    pub async fn finish(self) -> Vec<CapturedRequest> {
        self.task
            .await
            .expect("mock server task should join")
            .expect("mock server should serve every response")
    }
}

/// Serve `responses` in order, one connection each.
pub async fn spawn_mock_server(responses: Vec<MockResponse>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");

    let task = tokio::spawn(async move {
        let mut captured = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let (request_line, headers, body) = read_http_request(&mut stream).await?;
            captured.push(CapturedRequest {
                request_line,
                headers,
                body,
            });
            write_response(&mut stream, response).await;
        }
        Ok(captured)
    });

    MockServer { addr, task }
}

async fn write_response(stream: &mut TcpStream, response: MockResponse) {
    let MockResponse {
        status,
        content_type,
        body,
    } = response;

    match body {
        MockBody::Full(body) => {
            let payload = format!(
                "HTTP/1.1 {status} Mock\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(payload.as_bytes()).await;
        }
        MockBody::Chunks { chunks, hold } => {
            // No content-length: the body runs until the connection closes
            let head = format!(
                "HTTP/1.1 {status} Mock\r\ncontent-type: {content_type}\r\ncache-control: no-cache\r\nconnection: close\r\n\r\n"
            );
            if stream.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            for chunk in chunks {
                if stream.write_all(chunk.as_bytes()).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            if let Some(release) = hold {
                release.cancelled().await;
            }
        }
    }
    let _ = stream.shutdown().await;
}

async fn read_http_request(
    stream: &mut TcpStream,
) -> Result<(String, Vec<(String, String)>, Vec<u8>), String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.expect("header end should exist");
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok((request_line, headers, body))
}

/// Test-side control for one scripted stream.
///
/// Dropping the feed (or calling [`StreamFeed::finish`]) ends the stream
/// normally.
pub struct StreamFeed {
    tx: mpsc::UnboundedSender<Result<String, ChatError>>,
}

impl StreamFeed {
    pub fn chunk(&self, content: &str) {
        let _ = self.tx.send(Ok(content.to_string()));
    }

    pub fn fail(self, error: ChatError) {
        let _ = self.tx.send(Err(error));
    }

    pub fn finish(self) {}
}

/// Completion backend whose streams are driven from the test.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<String, ChatError>>>>,
    answers: Mutex<VecDeque<Result<String, ChatError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the next stream and return its feed.
    pub fn expect_stream(&self) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().expect("scripts lock").push_back(rx);
        StreamFeed { tx }
    }

    /// Queue the result of the next `complete` call.
    pub fn expect_answer(&self, answer: Result<String, ChatError>) {
        self.answers.lock().expect("answers lock").push_back(answer);
    }

    /// Messages passed to each `stream`/`complete` call, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn stream(
        &self,
        messages: Vec<Message>,
        _settings: &AppSettings,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<String, ChatError>> {
        self.requests.lock().expect("requests lock").push(messages);
        let Some(rx) = self.scripts.lock().expect("scripts lock").pop_front() else {
            return stream::empty().boxed();
        };
        stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
        .take_until(cancel.cancelled_owned())
        .boxed()
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        _settings: &AppSettings,
    ) -> Result<String, ChatError> {
        self.requests.lock().expect("requests lock").push(messages);
        self.answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ChatError::Decode {
                    message: "scripted backend has no answer queued".to_string(),
                })
            })
    }
}
